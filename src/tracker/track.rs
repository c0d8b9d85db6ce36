//! Single track state for the [`Tracker`](super::Tracker).
//!
//! A track owns its current box estimate and lifecycle counters. Mapped
//! positions are not stored here; they live in
//! [`Trajectories`](crate::trajectory::Trajectories) so that they outlive
//! the track itself.

use super::kalman_filter::KalmanFilter;
use crate::detection::Detection;
use crate::rect::Rect;
use serde::{Deserialize, Serialize};

/*----------------------------------------------------------------------------
Track state enums
----------------------------------------------------------------------------*/
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackState {
    /// Spawned but has not absorbed `min_hits` detections yet.
    Tentative,
    Confirmed,
    /// Missed at least one frame, still eligible for re-identification.
    Lost,
    Deleted,
}

/// How a track's box estimate follows its matched detections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimateFilter {
    /// The estimate is replaced by every matched detection box.
    #[default]
    Replace,
    /// Constant-velocity Kalman filter over `[cx, cy, h, r]`; the estimate
    /// is predicted forward each frame before association.
    ConstantVelocity,
}

/*----------------------------------------------------------------------------
Track struct
----------------------------------------------------------------------------*/
#[derive(Clone)]
pub struct Track {
    id: usize,
    state: TrackState,
    rect: Rect<f32>,
    score: f32,
    age: usize,
    misses: usize,
    hits: usize,
    kalman_filter: Option<KalmanFilter>,
}

impl Track {
    pub(crate) fn new(
        id: usize,
        detection: &Detection,
        filter: EstimateFilter,
        min_hits: usize,
    ) -> Self {
        let rect = detection.get_rect().clone();
        let kalman_filter = match filter {
            EstimateFilter::Replace => None,
            EstimateFilter::ConstantVelocity => {
                Some(KalmanFilter::new(&rect.get_xyhr()))
            }
        };
        let mut track = Self {
            id,
            state: TrackState::Tentative,
            rect,
            score: detection.get_prob(),
            age: 0,
            misses: 0,
            hits: 1,
            kalman_filter,
        };
        track.refresh_confirmation(min_hits);
        track
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn state(&self) -> TrackState {
        self.state
    }

    pub fn is_confirmed(&self) -> bool {
        self.state == TrackState::Confirmed
    }

    /// Current box estimate in original-resolution pixels.
    pub fn rect(&self) -> &Rect<f32> {
        &self.rect
    }

    pub fn score(&self) -> f32 {
        self.score
    }

    /// Frames survived since creation.
    pub fn age(&self) -> usize {
        self.age
    }

    /// Consecutive frames without a matching detection.
    pub fn misses(&self) -> usize {
        self.misses
    }

    /// Detections absorbed so far, including the one that spawned the track.
    pub fn hits(&self) -> usize {
        self.hits
    }

    /// Advance the motion model by one frame. No-op for `Replace`.
    pub(crate) fn predict(&mut self) {
        let Some(kf) = self.kalman_filter.as_mut() else {
            return;
        };
        if self.state != TrackState::Confirmed {
            kf.freeze_height_velocity();
        }
        let (mean, _) = kf.predict();
        self.rect = Rect::from_xyhr(mean[(0, 0)], mean[(0, 1)], mean[(0, 2)], mean[(0, 3)]);
    }

    /// Absorb a matched detection.
    pub(crate) fn update(&mut self, detection: &Detection, min_hits: usize) {
        match self.kalman_filter.as_mut() {
            Some(kf) => {
                let (mean, _) = kf.update(&detection.get_rect().get_xyhr());
                self.rect = Rect::from_xyhr(
                    mean[(0, 0)],
                    mean[(0, 1)],
                    mean[(0, 2)],
                    mean[(0, 3)],
                );
            }
            None => self.rect = detection.get_rect().clone(),
        }
        self.score = detection.get_prob();
        self.misses = 0;
        self.hits += 1;
        self.refresh_confirmation(min_hits);
    }

    /// Record a frame without a match; `Deleted` once `misses > max_age`.
    pub(crate) fn mark_missed(&mut self, max_age: usize) {
        self.misses += 1;
        self.state = if self.misses > max_age {
            TrackState::Deleted
        } else {
            TrackState::Lost
        };
    }

    pub(crate) fn increment_age(&mut self) {
        self.age += 1;
    }

    fn refresh_confirmation(&mut self, min_hits: usize) {
        self.state = if self.hits >= min_hits {
            TrackState::Confirmed
        } else {
            TrackState::Tentative
        };
    }
}

impl std::fmt::Debug for Track {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Track {{ id: {}, state: {:?}, age: {}, misses: {}, hits: {}, score: {}, rect: {:?} }}",
            self.id, self.state, self.age, self.misses, self.hits, self.score, self.rect.get_xyxy()
        )
    }
}

impl PartialEq for Track {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
