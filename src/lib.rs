pub mod detection;
pub mod error;
pub mod geometry;
pub mod occupancy;
pub mod pipeline;
pub mod rect;
pub mod tracker;
pub mod trajectory;

mod lapjv;

pub use detection::{Detection, DetectionRecord};
pub use error::TrackError;
pub use geometry::{CalibrationMapping, CalibrationPoints};
pub use occupancy::{Bandwidth, DensitySurface, OccupancyConfig, OccupancyEstimator, PlaneBounds};
pub use pipeline::{AnalysisReport, FrameOutput, Pipeline, PipelineConfig, TrackOverlay};
pub use rect::Rect;
pub use tracker::{Track, TrackState, Tracker, TrackerConfig};
pub use trajectory::{TrackPath, TrackStatistics, Trajectories};
