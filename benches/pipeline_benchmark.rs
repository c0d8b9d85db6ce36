use std::time::Duration;

use criterion::{criterion_group, criterion_main, Criterion};
use pitchtrack_rs::{
    occupancy::Bandwidth,
    tracker::{AssignmentStrategy, EstimateFilter},
    CalibrationPoints, Detection, OccupancyConfig, Pipeline, PipelineConfig, Tracker,
    TrackerConfig,
};
use rand::{rngs::StdRng, Rng, SeedableRng};

const NUM_FRAMES: usize = 250;
const NUM_PLAYERS: usize = 22;

/* ----------------------------------------------------------------------------
 * Synthetic detections
 * ---------------------------------------------------------------------------- */

/// Players wandering over a 1280x720 frame with a little box jitter.
fn synthetic_detections(seed: u64) -> Vec<Vec<Detection>> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut players: Vec<(f32, f32, f32, f32)> = (0..NUM_PLAYERS)
        .map(|_| {
            (
                rng.gen_range(50.0..1200.0),
                rng.gen_range(150.0..600.0),
                rng.gen_range(-3.0..3.0),
                rng.gen_range(-2.0..2.0),
            )
        })
        .collect();

    (0..NUM_FRAMES)
        .map(|_| {
            players
                .iter_mut()
                .filter_map(|(x, y, vx, vy)| {
                    *x = (*x + *vx).clamp(0.0, 1240.0);
                    *y = (*y + *vy).clamp(100.0, 640.0);
                    // Occasional missed detection
                    if rng.gen_bool(0.05) {
                        return None;
                    }
                    let jx = rng.gen_range(-1.0..1.0);
                    let jy = rng.gen_range(-1.0..1.0);
                    Some(Detection::from_xyxy(
                        *x + jx,
                        *y + jy,
                        *x + 30.0 + jx,
                        *y + 70.0 + jy,
                        rng.gen_range(0.5..1.0),
                    ))
                })
                .collect()
        })
        .collect()
}

fn pipeline_config() -> PipelineConfig {
    let mut config = PipelineConfig::new(CalibrationPoints {
        source: [[310.0, 220.0], [970.0, 220.0], [1240.0, 700.0], [40.0, 700.0]],
        destination: [[0.0, 0.0], [105.0, 0.0], [105.0, 68.0], [0.0, 68.0]],
    });
    config.occupancy = OccupancyConfig {
        bandwidth: Bandwidth::Scott,
        ..OccupancyConfig::default()
    };
    config
}

/* ----------------------------------------------------------------------------
 * Benchmarks
 * ---------------------------------------------------------------------------- */

fn bench_tracker_greedy(c: &mut Criterion) {
    let detections = synthetic_detections(7);

    c.bench_function("tracker_greedy", |b| {
        b.iter(|| {
            let mut tracker = Tracker::new(TrackerConfig::default()).unwrap();
            for dets in detections.iter() {
                let _ = tracker.update(dets);
            }
        });
    });
}

fn bench_tracker_optimal(c: &mut Criterion) {
    let detections = synthetic_detections(7);

    c.bench_function("tracker_optimal", |b| {
        b.iter(|| {
            let config = TrackerConfig::default()
                .with_assignment(AssignmentStrategy::Optimal);
            let mut tracker = Tracker::new(config).unwrap();
            for dets in detections.iter() {
                let _ = tracker.update(dets);
            }
        });
    });
}

fn bench_tracker_constant_velocity(c: &mut Criterion) {
    let detections = synthetic_detections(7);

    c.bench_function("tracker_constant_velocity", |b| {
        b.iter(|| {
            let config = TrackerConfig::default()
                .with_estimate_filter(EstimateFilter::ConstantVelocity);
            let mut tracker = Tracker::new(config).unwrap();
            for dets in detections.iter() {
                let _ = tracker.update(dets);
            }
        });
    });
}

fn bench_full_pipeline(c: &mut Criterion) {
    let detections = synthetic_detections(11);

    c.bench_function("full_pipeline", |b| {
        b.iter(|| {
            let mut pipeline = Pipeline::new(pipeline_config()).unwrap();
            for dets in detections.iter() {
                let _ = pipeline.process_frame(dets);
            }
            pipeline.report().unwrap()
        });
    });
}

criterion_group! {
    name = benches;
    config = Criterion::default()
        .sample_size(50)
        .measurement_time(Duration::from_secs(10))
        .warm_up_time(Duration::from_secs(3));
    targets = bench_tracker_greedy, bench_tracker_optimal, bench_tracker_constant_velocity, bench_full_pipeline
}
criterion_main!(benches);
