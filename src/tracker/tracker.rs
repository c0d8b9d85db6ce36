//! Main Tracker implementation
//!
//! This module provides the `Tracker` struct that turns per-frame
//! detections into identity-stable tracks.

use super::assoc::{associate, AssignmentStrategy};
use super::track::{EstimateFilter, Track, TrackState};
use crate::detection::Detection;
use crate::error::TrackError;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

/// Tracker parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Maximum `1 - IoU` cost for a track/detection pair to match (exclusive)
    #[serde(default = "default_distance_threshold")]
    pub distance_threshold: f32,

    /// Frames a track may go unmatched before it is deleted
    #[serde(default = "default_max_age")]
    pub max_age: usize,

    /// Detections a track must absorb (including its first) to be confirmed
    #[serde(default = "default_min_hits")]
    pub min_hits: usize,

    #[serde(default)]
    pub assignment: AssignmentStrategy,

    #[serde(default)]
    pub estimate_filter: EstimateFilter,
}

fn default_distance_threshold() -> f32 {
    0.7
}

fn default_max_age() -> usize {
    15
}

fn default_min_hits() -> usize {
    1
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            distance_threshold: default_distance_threshold(),
            max_age: default_max_age(),
            min_hits: default_min_hits(),
            assignment: AssignmentStrategy::default(),
            estimate_filter: EstimateFilter::default(),
        }
    }
}

impl TrackerConfig {
    /// Create a config with the given threshold and tolerance, other fields
    /// at their defaults.
    ///
    /// # Example
    /// ```
    /// use pitchtrack_rs::tracker::TrackerConfig;
    /// let config = TrackerConfig::new(0.7, 15);
    /// assert_eq!(config.min_hits, 1);
    /// ```
    pub fn new(distance_threshold: f32, max_age: usize) -> Self {
        Self {
            distance_threshold,
            max_age,
            ..Self::default()
        }
    }

    pub fn with_min_hits(self, min_hits: usize) -> Self {
        Self { min_hits, ..self }
    }

    pub fn with_assignment(self, assignment: AssignmentStrategy) -> Self {
        Self { assignment, ..self }
    }

    pub fn with_estimate_filter(self, estimate_filter: EstimateFilter) -> Self {
        Self {
            estimate_filter,
            ..self
        }
    }

    pub fn validate(&self) -> Result<(), TrackError> {
        if !(self.distance_threshold.is_finite()
            && self.distance_threshold > 0.0
            && self.distance_threshold <= 1.0)
        {
            return Err(TrackError::InvalidConfig(format!(
                "distance_threshold must be in (0, 1], got {}",
                self.distance_threshold
            )));
        }
        if self.min_hits == 0 {
            return Err(TrackError::InvalidConfig(
                "min_hits must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Multi-object tracker.
///
/// Owns the live track set; [`Tracker::update`] is the only mutation.
#[derive(Debug)]
pub struct Tracker {
    config: TrackerConfig,

    frame_count: usize,
    track_id_count: usize,

    tracks: Vec<Track>,
}

impl Tracker {
    pub fn new(config: TrackerConfig) -> Result<Self, TrackError> {
        config.validate()?;
        Ok(Self {
            config,
            frame_count: 0,
            track_id_count: 0,
            tracks: Vec::new(),
        })
    }

    /// Update tracker with the detections of the next frame.
    ///
    /// # Returns
    /// Tracks in `Confirmed` or `Lost` state after this frame, ordered by id.
    /// Only `Confirmed` tracks were observed this frame.
    pub fn update(&mut self, detections: &[Detection]) -> Result<Vec<Track>, TrackError> {
        self.frame_count += 1;

        // Step 0: Drop detections with non-finite boxes
        let finite: Vec<Detection>;
        let detections = if detections.iter().all(Detection::is_finite) {
            detections
        } else {
            finite = detections.iter().filter(|d| d.is_finite()).cloned().collect();
            warn!(
                frame = self.frame_count,
                dropped = detections.len() - finite.len(),
                "non-finite detections dropped"
            );
            &finite[..]
        };

        // Step 1: Advance motion models
        for track in self.tracks.iter_mut() {
            track.predict();
        }

        // Step 2: Association
        let result = associate(
            &self.tracks,
            detections,
            self.config.distance_threshold,
            self.config.assignment,
        )?;

        // Step 3: Update matched tracks
        for &(trk_idx, det_idx) in &result.matches {
            self.tracks[trk_idx].update(&detections[det_idx], self.config.min_hits);
        }

        // Step 4: Age out unmatched tracks
        for &trk_idx in &result.unmatched_tracks {
            self.tracks[trk_idx].mark_missed(self.config.max_age);
        }

        // Step 5: Remove deleted tracks, age survivors
        let frame = self.frame_count;
        self.tracks.retain(|t| {
            let keep = t.state() != TrackState::Deleted;
            if !keep {
                debug!(track_id = t.id(), frame, misses = t.misses(), "track deleted");
            }
            keep
        });
        for track in self.tracks.iter_mut() {
            track.increment_age();
        }

        // Step 6: Spawn tracks for unmatched detections
        for &det_idx in &result.unmatched_detections {
            self.track_id_count += 1;
            let track = Track::new(
                self.track_id_count,
                &detections[det_idx],
                self.config.estimate_filter,
                self.config.min_hits,
            );
            debug!(track_id = track.id(), frame, state = ?track.state(), "track spawned");
            self.tracks.push(track);
        }

        trace!(
            frame,
            detections = detections.len(),
            matched = result.matches.len(),
            live = self.tracks.len(),
            "tracker updated"
        );

        Ok(self
            .tracks
            .iter()
            .filter(|t| matches!(t.state(), TrackState::Confirmed | TrackState::Lost))
            .cloned()
            .collect())
    }

    /// All live tracks, including tentative ones, ordered by id.
    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Get current frame count.
    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    /// Get number of live tracks.
    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }
}
