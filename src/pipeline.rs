//! Frame-sequential analysis pipeline.
//!
//! [`Pipeline`] is the single context object holding the tracker, the
//! calibration mapping and the trajectory aggregator. Callers feed it one
//! frame of detections at a time and ask for an [`AnalysisReport`] once the
//! video ends (or whenever they stop early).

use crate::detection::Detection;
use crate::error::TrackError;
use crate::geometry::{CalibrationMapping, CalibrationPoints};
use crate::occupancy::{DensitySurface, OccupancyConfig, OccupancyEstimator, PlaneBounds};
use crate::rect::Rect;
use crate::tracker::{TrackState, Tracker, TrackerConfig};
use crate::trajectory::{TrackStatistics, Trajectories};
use nalgebra::Point2;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Read;
use tracing::{debug, info};

/* -----------------------------------------------------------------------------
 * Config
 * ----------------------------------------------------------------------------- */

/// Configuration for one video analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Calibration quadrilateral, source points in original-resolution pixels.
    pub calibration: CalibrationPoints,
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub occupancy: OccupancyConfig,
    #[serde(default = "default_frame_rate_hz")]
    pub frame_rate_hz: f64,
    /// Plane units per metre. Non-positive values leave statistics
    /// uncalibrated.
    #[serde(default = "default_pixels_per_meter")]
    pub pixels_per_meter: f64,
    /// Processing width over original width; detections are divided by it.
    #[serde(default = "default_processing_scale")]
    pub processing_scale: f64,
    /// Density grid extent; defaults to the bounding box of the destination
    /// points.
    #[serde(default)]
    pub plane_bounds: Option<PlaneBounds>,
}

fn default_frame_rate_hz() -> f64 {
    25.0
}

fn default_pixels_per_meter() -> f64 {
    1.0
}

fn default_processing_scale() -> f64 {
    1.0
}

impl PipelineConfig {
    pub fn new(calibration: CalibrationPoints) -> Self {
        Self {
            calibration,
            tracker: TrackerConfig::default(),
            occupancy: OccupancyConfig::default(),
            frame_rate_hz: default_frame_rate_hz(),
            pixels_per_meter: default_pixels_per_meter(),
            processing_scale: default_processing_scale(),
            plane_bounds: None,
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, TrackError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, TrackError> {
        let config: Self = serde_json::from_reader(reader)?;
        config.validate()?;
        Ok(config)
    }

    /// Check parameter ranges. Calibration geometry is checked when the
    /// pipeline builds its mapping.
    pub fn validate(&self) -> Result<(), TrackError> {
        self.tracker.validate()?;
        self.occupancy.validate()?;
        if !(self.processing_scale.is_finite() && self.processing_scale > 0.0) {
            return Err(TrackError::InvalidConfig(format!(
                "processing_scale must be positive, got {}",
                self.processing_scale
            )));
        }
        if let Some(bounds) = &self.plane_bounds {
            bounds.validate()?;
        }
        Ok(())
    }

    /// Configured bounds, or the extent of the destination quadrilateral.
    pub fn resolved_bounds(&self) -> Result<PlaneBounds, TrackError> {
        if let Some(bounds) = self.plane_bounds {
            return Ok(bounds);
        }
        let dest = &self.calibration.destination;
        let (min_x, max_x) = dest
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), p| {
                (lo.min(p[0]), hi.max(p[0]))
            });
        let (min_y, max_y) = dest
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), p| {
                (lo.min(p[1]), hi.max(p[1]))
            });
        PlaneBounds::new(min_x, min_y, max_x, max_y)
    }
}

/* -----------------------------------------------------------------------------
 * Outputs
 * ----------------------------------------------------------------------------- */

/// Render data for one track in one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackOverlay {
    pub id: usize,
    pub state: TrackState,
    /// Box in original-resolution pixels.
    pub rect: Rect<f32>,
    /// Plane position appended this frame; `None` while lost.
    pub position: Option<Point2<f64>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FrameOutput {
    pub frame_index: usize,
    pub tracks: Vec<TrackOverlay>,
}

impl FrameOutput {
    pub fn confirmed(&self) -> impl Iterator<Item = &TrackOverlay> + '_ {
        self.tracks.iter().filter(|t| t.state == TrackState::Confirmed)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisReport {
    pub frames: usize,
    pub statistics: Vec<TrackStatistics>,
    pub density: DensitySurface,
    /// `density` with cells below `occupancy.threshold_fraction` of the peak
    /// cleared.
    pub heatmap: DensitySurface,
}

/* -----------------------------------------------------------------------------
 * Pipeline
 * ----------------------------------------------------------------------------- */

#[derive(Debug)]
pub struct Pipeline {
    config: PipelineConfig,
    mapping: CalibrationMapping,
    bounds: PlaneBounds,
    tracker: Tracker,
    trajectories: Trajectories,
    estimator: OccupancyEstimator,
    frame_index: usize,
}

impl Pipeline {
    /// Build the pipeline, failing before any frame is processed when the
    /// calibration is degenerate or the config is out of range.
    pub fn new(config: PipelineConfig) -> Result<Self, TrackError> {
        config.validate()?;
        let mapping = config.calibration.to_mapping()?;
        let bounds = config.resolved_bounds()?;
        let tracker = Tracker::new(config.tracker.clone())?;
        let estimator = OccupancyEstimator::new(config.occupancy.clone())?;

        info!(
            frame_rate_hz = config.frame_rate_hz,
            pixels_per_meter = config.pixels_per_meter,
            processing_scale = config.processing_scale,
            "pipeline initialised"
        );

        Ok(Self {
            config,
            mapping,
            bounds,
            tracker,
            trajectories: Trajectories::new(),
            estimator,
            frame_index: 0,
        })
    }

    /// Run one frame of processing-resolution detections through the
    /// tracker and the aggregator.
    pub fn process_frame(&mut self, detections: &[Detection]) -> Result<FrameOutput, TrackError> {
        let scale = self.config.processing_scale as f32;
        let detections: Vec<Detection> = detections.iter().map(|d| d.rescaled(scale)).collect();

        let tracks = self.tracker.update(&detections)?;
        let positions: HashMap<usize, Point2<f64>> = self
            .trajectories
            .observe(self.frame_index, &tracks, &self.mapping)?
            .into_iter()
            .collect();

        let output = FrameOutput {
            frame_index: self.frame_index,
            tracks: tracks
                .iter()
                .map(|t| TrackOverlay {
                    id: t.id(),
                    state: t.state(),
                    rect: t.rect().clone(),
                    position: positions.get(&t.id()).copied(),
                })
                .collect(),
        };

        debug!(
            frame_index = self.frame_index,
            detections = detections.len(),
            tracks = output.tracks.len(),
            "frame processed"
        );
        self.frame_index += 1;
        Ok(output)
    }

    pub fn frames_processed(&self) -> usize {
        self.frame_index
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn mapping(&self) -> &CalibrationMapping {
        &self.mapping
    }

    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    pub fn trajectories(&self) -> &Trajectories {
        &self.trajectories
    }

    /// Finalise statistics and the occupancy density for everything seen so
    /// far. May be called after any frame.
    pub fn report(&self) -> Result<AnalysisReport, TrackError> {
        let statistics = self
            .trajectories
            .finalize(self.config.frame_rate_hz, self.config.pixels_per_meter);
        let density = self
            .estimator
            .estimate(self.trajectories.paths(), &self.bounds)?;
        let heatmap = density.thresholded(self.config.occupancy.threshold_fraction);

        info!(
            frames = self.frame_index,
            tracks = statistics.len(),
            "analysis report ready"
        );
        Ok(AnalysisReport {
            frames: self.frame_index,
            statistics,
            density,
            heatmap,
        })
    }
}
