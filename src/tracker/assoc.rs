//! Association between live tracks and the detections of one frame.
//!
//! The cost of pairing a track with a detection is `1 - IoU` of the track's
//! current estimate and the detection box. A pair is only ever accepted when
//! its cost is strictly below the distance threshold.

use super::track::Track;
use crate::detection::Detection;
use crate::error::TrackError;
use crate::lapjv::lapjv;
use crate::rect::Rect;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Compute IoU between all pairs of track and detection boxes.
///
/// # Returns
/// A matrix of shape (num_tracks, num_detections)
pub fn iou_batch(tracks: &[Rect<f32>], detections: &[Rect<f32>]) -> DMatrix<f32> {
    DMatrix::from_fn(tracks.len(), detections.len(), |t, d| {
        tracks[t].calc_iou(&detections[d])
    })
}

/// `1 - IoU` cost matrix of shape (num_tracks, num_detections).
///
/// Non-finite entries (degenerate boxes) are pinned to the maximum cost 1.
pub fn iou_distance(tracks: &[Rect<f32>], detections: &[Rect<f32>]) -> DMatrix<f32> {
    iou_batch(tracks, detections).map(|iou| {
        let cost = 1.0 - iou;
        if cost.is_finite() {
            cost.clamp(0.0, 1.0)
        } else {
            1.0
        }
    })
}

/// Assignment solver used by [`linear_assignment`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStrategy {
    /// Repeatedly take the cheapest remaining pair; equal costs go to the
    /// track with the lowest id, then the lowest detection index.
    #[default]
    Greedy,
    /// Minimum total cost assignment (Jonker-Volgenant).
    Optimal,
}

/// Result of linear assignment
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AssignmentResult {
    /// Matched pairs as (track_index, detection_index), sorted by track index
    pub matches: Vec<(usize, usize)>,
    /// Indices of unmatched tracks, ascending
    pub unmatched_tracks: Vec<usize>,
    /// Indices of unmatched detections, ascending
    pub unmatched_detections: Vec<usize>,
}

impl AssignmentResult {
    fn from_matches(
        mut matches: Vec<(usize, usize)>,
        num_tracks: usize,
        num_detections: usize,
    ) -> Self {
        matches.sort_unstable();

        let mut track_taken = vec![false; num_tracks];
        let mut det_taken = vec![false; num_detections];
        for &(t, d) in &matches {
            track_taken[t] = true;
            det_taken[d] = true;
        }

        Self {
            matches,
            unmatched_tracks: (0..num_tracks).filter(|&t| !track_taken[t]).collect(),
            unmatched_detections: (0..num_detections)
                .filter(|&d| !det_taken[d])
                .collect(),
        }
    }
}

/// Match rows (tracks) to columns (detections) of a cost matrix.
///
/// # Arguments
/// * `cost_matrix` - Cost matrix of shape (num_tracks, num_detections), lower is better
/// * `track_ids` - Identifier of the track on each row, used for tie-breaking
/// * `distance_threshold` - Pairs with `cost >= distance_threshold` are never matched
/// * `strategy` - Solver to use
pub fn linear_assignment(
    cost_matrix: &DMatrix<f32>,
    track_ids: &[usize],
    distance_threshold: f32,
    strategy: AssignmentStrategy,
) -> Result<AssignmentResult, TrackError> {
    let num_trks = cost_matrix.nrows();
    let num_dets = cost_matrix.ncols();

    if track_ids.len() != num_trks {
        return Err(TrackError::LapjvError(format!(
            "expected {} track ids, got {}",
            num_trks,
            track_ids.len()
        )));
    }

    if num_trks == 0 || num_dets == 0 {
        return Ok(AssignmentResult::from_matches(vec![], num_trks, num_dets));
    }

    let matches = match strategy {
        AssignmentStrategy::Greedy => {
            greedy_matches(cost_matrix, track_ids, distance_threshold)
        }
        AssignmentStrategy::Optimal => {
            optimal_matches(cost_matrix, track_ids, distance_threshold)?
        }
    };

    Ok(AssignmentResult::from_matches(matches, num_trks, num_dets))
}

fn greedy_matches(
    cost_matrix: &DMatrix<f32>,
    track_ids: &[usize],
    distance_threshold: f32,
) -> Vec<(usize, usize)> {
    let mut candidates: Vec<(f32, usize, usize)> = Vec::new();
    for t in 0..cost_matrix.nrows() {
        for d in 0..cost_matrix.ncols() {
            let cost = cost_matrix[(t, d)];
            if cost < distance_threshold {
                candidates.push((cost, t, d));
            }
        }
    }

    candidates.sort_by(|a, b| {
        a.0.total_cmp(&b.0)
            .then_with(|| track_ids[a.1].cmp(&track_ids[b.1]))
            .then_with(|| a.2.cmp(&b.2))
    });

    let mut track_taken = vec![false; cost_matrix.nrows()];
    let mut det_taken = vec![false; cost_matrix.ncols()];
    let mut matches = Vec::new();
    for (_, t, d) in candidates {
        if track_taken[t] || det_taken[d] {
            continue;
        }
        track_taken[t] = true;
        det_taken[d] = true;
        matches.push((t, d));
    }
    matches
}

fn optimal_matches(
    cost_matrix: &DMatrix<f32>,
    track_ids: &[usize],
    distance_threshold: f32,
) -> Result<Vec<(usize, usize)>, TrackError> {
    let num_trks = cost_matrix.nrows();
    let num_dets = cost_matrix.ncols();

    // Rows in ascending track id order so the solver's own tie-breaking
    // favours older tracks.
    let mut row_order: Vec<usize> = (0..num_trks).collect();
    row_order.sort_by(|&a, &b| match track_ids[a].cmp(&track_ids[b]) {
        Ordering::Equal => a.cmp(&b),
        other => other,
    });

    // Extend to (T + D) x (T + D): every row and column may fall back to a
    // dummy partner at half the threshold, so a real pair only wins when its
    // cost is below the threshold.
    let n = num_trks + num_dets;
    let limit = distance_threshold as f64;
    let mut cost = vec![vec![limit / 2.0; n]; n];
    for row in cost.iter_mut().skip(num_trks) {
        for c in row.iter_mut().skip(num_dets) {
            *c = 0.0;
        }
    }
    for (r, &t) in row_order.iter().enumerate() {
        for d in 0..num_dets {
            cost[r][d] = cost_matrix[(t, d)] as f64;
        }
    }

    let assignment = lapjv(&cost)?;
    debug_assert!(assignment
        .x
        .iter()
        .enumerate()
        .all(|(r, &c)| assignment.y[c as usize] == r as isize));

    let mut matches = Vec::new();
    for (r, &t) in row_order.iter().enumerate() {
        let d = assignment.x[r];
        if d >= 0 && (d as usize) < num_dets {
            let d = d as usize;
            if cost_matrix[(t, d)] < distance_threshold {
                matches.push((t, d));
            }
        }
    }
    Ok(matches)
}

/// Associate live tracks with a frame's detections.
///
/// Pure function of its inputs: identical arguments always yield an
/// identical [`AssignmentResult`].
pub fn associate(
    tracks: &[Track],
    detections: &[Detection],
    distance_threshold: f32,
    strategy: AssignmentStrategy,
) -> Result<AssignmentResult, TrackError> {
    let track_rects: Vec<Rect<f32>> = tracks.iter().map(|t| t.rect().clone()).collect();
    let det_rects: Vec<Rect<f32>> =
        detections.iter().map(|d| d.get_rect().clone()).collect();
    let track_ids: Vec<usize> = tracks.iter().map(|t| t.id()).collect();

    let cost_matrix = iou_distance(&track_rects, &det_rects);
    linear_assignment(&cost_matrix, &track_ids, distance_threshold, strategy)
}
