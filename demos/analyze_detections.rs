use indicatif::{ProgressBar, ProgressStyle};
use pitchtrack_rs::{DetectionRecord, Pipeline, PipelineConfig};
use serde::Deserialize;
use std::{env, error::Error, fs::File, io::BufReader, path::PathBuf};
use tracing_subscriber::EnvFilter;

/// Detector output for a whole video, one entry per frame.
#[derive(Debug, Deserialize)]
struct DetectionDump {
    frames: Vec<Vec<DetectionRecord>>,
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = env::args().collect();
    if args.iter().any(|arg| arg == "-h" || arg == "--help") {
        print_usage();
        return Ok(());
    }

    let config_path = args
        .get(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("data/pipeline.json"));
    let detections_path = args
        .get(2)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("data/detections.json"));
    let max_frames = args
        .get(3)
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(0);

    let config = PipelineConfig::from_reader(BufReader::new(File::open(&config_path)?))?;
    let dump: DetectionDump =
        serde_json::from_reader(BufReader::new(File::open(&detections_path)?))?;

    let mut pipeline = Pipeline::new(config)?;

    let total_frames = if max_frames > 0 && max_frames < dump.frames.len() {
        max_frames
    } else {
        dump.frames.len()
    };
    let progress = ProgressBar::new(total_frames as u64);
    let style = ProgressStyle::with_template(
        "[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}",
    )?
    .progress_chars("=>-");
    progress.set_style(style);
    progress.set_message("tracking");

    for records in dump.frames.into_iter().take(total_frames) {
        let detections: Vec<_> = records.into_iter().map(Into::into).collect();
        let output = pipeline.process_frame(&detections)?;
        progress.set_message(format!("{} active", output.confirmed().count()));
        progress.inc(1);
    }
    progress.finish_with_message("done");

    let report = pipeline.report()?;
    let unit = if report.statistics.iter().all(|s| s.calibrated) {
        "m"
    } else {
        "units"
    };

    println!("{:>6} {:>12} {:>14} {:>14} {:>8}", "id", "distance", "avg speed", "peak speed", "points");
    for s in &report.statistics {
        println!(
            "{:>6} {:>10.2} {} {:>10.2} {}/s {:>10.2} {}/s {:>8}",
            s.id, s.distance, unit, s.average_speed, unit, s.peak_speed, unit, s.point_count
        );
    }
    println!(
        "{} frames, {} tracks, density grid {}x{} (peak {:.4}, {} tracks skipped)",
        report.frames,
        report.statistics.len(),
        report.density.width,
        report.density.height,
        report.density.max(),
        report.density.skipped.len()
    );

    Ok(())
}

fn print_usage() {
    println!(
        "Usage: cargo run --example analyze_detections -- [config_json] [detections_json] [max_frames]"
    );
    println!("Defaults:");
    println!("  config_json:     data/pipeline.json");
    println!("  detections_json: data/detections.json");
    println!("  max_frames:      0 (all)");
}
