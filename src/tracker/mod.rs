//! IoU multi-object tracker
//!
//! Tracks keep a stable id from the detection that spawns them until they go
//! unmatched for more than `max_age` consecutive frames.

pub mod assoc;
mod kalman_filter;
mod track;
#[allow(clippy::module_inception)]
mod tracker;

pub use assoc::{
    associate, iou_batch, iou_distance, linear_assignment, AssignmentResult,
    AssignmentStrategy,
};
pub use track::{EstimateFilter, Track, TrackState};
pub use tracker::{Tracker, TrackerConfig};
