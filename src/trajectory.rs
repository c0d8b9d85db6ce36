//! Per-track paths on the calibrated plane and the statistics derived from
//! them.
//!
//! Paths are keyed by track id and outlive the tracks that produced them, so
//! a track deleted mid-video still contributes its history at finalisation.

use crate::error::TrackError;
use crate::geometry::CalibrationMapping;
use crate::tracker::{Track, TrackState};
use nalgebra::Point2;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{trace, warn};

/*----------------------------------------------------------------------------
Paths
----------------------------------------------------------------------------*/
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PathPoint {
    pub frame_index: usize,
    pub position: Point2<f64>,
}

/// Append-only sequence of mapped anchor points for one track.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackPath {
    points: Vec<PathPoint>,
}

impl TrackPath {
    pub fn points(&self) -> &[PathPoint] {
        &self.points
    }

    pub fn positions(&self) -> impl Iterator<Item = &Point2<f64>> + '_ {
        self.points.iter().map(|p| &p.position)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn last(&self) -> Option<&PathPoint> {
        self.points.last()
    }

    /// Sum of segment lengths in plane units.
    pub fn length(&self) -> f64 {
        self.points
            .windows(2)
            .map(|w| (w[1].position - w[0].position).norm())
            .sum()
    }

    fn push(&mut self, point: PathPoint) {
        self.points.push(point);
    }
}

/*----------------------------------------------------------------------------
Statistics
----------------------------------------------------------------------------*/
/// Final per-track summary.
///
/// `distance` is in metres when `calibrated`, otherwise in plane units.
/// Speeds are `distance` units per second.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackStatistics {
    pub id: usize,
    pub distance: f64,
    pub average_speed: f64,
    pub peak_speed: f64,
    pub point_count: usize,
    pub calibrated: bool,
}

/// Scale factor guard: non-positive or non-finite scales count as 1.
fn effective_scale(pixels_per_meter: f64) -> (f64, bool) {
    if pixels_per_meter.is_finite() && pixels_per_meter > 0.0 {
        (pixels_per_meter, true)
    } else {
        (1.0, false)
    }
}

fn valid_rate(frame_rate_hz: f64) -> Option<f64> {
    (frame_rate_hz.is_finite() && frame_rate_hz > 0.0).then_some(frame_rate_hz)
}

fn segment_speed(a: &PathPoint, b: &PathPoint, frame_rate_hz: f64, scale: f64) -> f64 {
    let frames = b.frame_index.saturating_sub(a.frame_index);
    if frames == 0 {
        return 0.0;
    }
    let seconds = frames as f64 / frame_rate_hz;
    (b.position - a.position).norm() / scale / seconds
}

/*----------------------------------------------------------------------------
Trajectories
----------------------------------------------------------------------------*/
/// Aggregates confirmed track positions frame by frame.
#[derive(Debug, Default)]
pub struct Trajectories {
    paths: HashMap<usize, TrackPath>,
    last_frame: Option<usize>,
}

impl Trajectories {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the anchor points of every confirmed track for one frame.
    ///
    /// The anchor is the bottom-centre of the track box. Frame indices must
    /// strictly increase between calls. Returns the `(track id, position)`
    /// pairs appended this frame.
    pub fn observe(
        &mut self,
        frame_index: usize,
        tracks: &[Track],
        mapping: &CalibrationMapping,
    ) -> Result<Vec<(usize, Point2<f64>)>, TrackError> {
        if let Some(last) = self.last_frame {
            if frame_index <= last {
                return Err(TrackError::FrameOutOfOrder {
                    last,
                    got: frame_index,
                });
            }
        }
        self.last_frame = Some(frame_index);

        let mut appended = Vec::new();
        for track in tracks.iter().filter(|t| t.state() == TrackState::Confirmed) {
            let path = self.paths.entry(track.id()).or_default();

            let anchor = track.rect().bottom_center();
            let anchor = Point2::new(anchor.x as f64, anchor.y as f64);
            match mapping.try_project(&anchor) {
                Ok(position) => {
                    path.push(PathPoint {
                        frame_index,
                        position,
                    });
                    appended.push((track.id(), position));
                }
                Err(err) => {
                    warn!(track_id = track.id(), frame_index, %err, "anchor point skipped");
                }
            }
        }

        trace!(frame_index, appended = appended.len(), "trajectories observed");
        Ok(appended)
    }

    pub fn path(&self, id: usize) -> Option<&TrackPath> {
        self.paths.get(&id)
    }

    pub fn paths(&self) -> &HashMap<usize, TrackPath> {
        &self.paths
    }

    /// Ids of every track that was ever observed confirmed, ascending.
    pub fn track_ids(&self) -> Vec<usize> {
        let mut ids: Vec<usize> = self.paths.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn last_frame(&self) -> Option<usize> {
        self.last_frame
    }

    /// Speed over the most recent path segment, `None` for unknown ids and
    /// paths shorter than two points.
    pub fn instantaneous_speed(
        &self,
        id: usize,
        frame_rate_hz: f64,
        pixels_per_meter: f64,
    ) -> Option<f64> {
        let points = self.paths.get(&id)?.points();
        let [.., a, b] = points else {
            return None;
        };
        let Some(rate) = valid_rate(frame_rate_hz) else {
            return Some(0.0);
        };
        let (scale, _) = effective_scale(pixels_per_meter);
        Some(segment_speed(a, b, rate, scale))
    }

    /// Summarise every path, ordered by track id.
    ///
    /// Elapsed time is the number of path points over the frame rate.
    /// Division guards yield zeros rather than errors, and a non-positive
    /// `pixels_per_meter` marks the records uncalibrated.
    pub fn finalize(&self, frame_rate_hz: f64, pixels_per_meter: f64) -> Vec<TrackStatistics> {
        let (scale, calibrated) = effective_scale(pixels_per_meter);
        let rate = valid_rate(frame_rate_hz);

        self.track_ids()
            .into_iter()
            .filter_map(|id| self.paths.get(&id).map(|path| (id, path)))
            .map(|(id, path)| {
                let point_count = path.len();
                if point_count < 2 {
                    return TrackStatistics {
                        id,
                        distance: 0.0,
                        average_speed: 0.0,
                        peak_speed: 0.0,
                        point_count,
                        calibrated,
                    };
                }

                let distance = path.length() / scale;
                let (average_speed, peak_speed) = match rate {
                    Some(rate) => {
                        let elapsed = point_count as f64 / rate;
                        let peak = path
                            .points()
                            .windows(2)
                            .map(|w| segment_speed(&w[0], &w[1], rate, scale))
                            .fold(0.0f64, f64::max);
                        (distance / elapsed, peak)
                    }
                    None => (0.0, 0.0),
                };

                TrackStatistics {
                    id,
                    distance,
                    average_speed,
                    peak_speed,
                    point_count,
                    calibrated,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::Detection;
    use crate::tracker::{Tracker, TrackerConfig};
    use nearly_eq::assert_nearly_eq;

    fn confirmed_tracks(boxes: &[[f32; 4]]) -> Vec<Track> {
        let mut tracker = Tracker::new(TrackerConfig::default()).unwrap();
        let dets: Vec<Detection> = boxes
            .iter()
            .map(|b| Detection::from_xyxy(b[0], b[1], b[2], b[3], 0.9))
            .collect();
        tracker.update(&dets).unwrap()
    }

    fn walk(trajectories: &mut Trajectories, mapping: &CalibrationMapping, xs: &[f32]) {
        let mut tracker = Tracker::new(TrackerConfig::default()).unwrap();
        for (frame, &x) in xs.iter().enumerate() {
            let tracks = tracker
                .update(&[Detection::from_xyxy(x, 0.0, x + 10.0, 20.0, 0.9)])
                .unwrap();
            trajectories.observe(frame, &tracks, mapping).unwrap();
        }
    }

    #[test]
    fn test_observe_appends_bottom_center() {
        let mut trajectories = Trajectories::new();
        let tracks = confirmed_tracks(&[[10.0, 20.0, 30.0, 60.0]]);
        let appended = trajectories
            .observe(0, &tracks, &CalibrationMapping::identity())
            .unwrap();

        assert_eq!(appended, vec![(1, Point2::new(20.0, 60.0))]);
        let path = trajectories.path(1).unwrap();
        assert_eq!(path.len(), 1);
        assert_eq!(path.points()[0].frame_index, 0);
    }

    #[test]
    fn test_observe_rejects_out_of_order_frames() {
        let mut trajectories = Trajectories::new();
        let mapping = CalibrationMapping::identity();
        let tracks = confirmed_tracks(&[[0.0, 0.0, 10.0, 20.0]]);
        trajectories.observe(3, &tracks, &mapping).unwrap();
        assert_eq!(
            trajectories.observe(3, &tracks, &mapping),
            Err(TrackError::FrameOutOfOrder { last: 3, got: 3 })
        );
        assert_eq!(trajectories.path(1).unwrap().len(), 1);
        assert_eq!(
            trajectories.observe(1, &[], &mapping),
            Err(TrackError::FrameOutOfOrder { last: 3, got: 1 })
        );
        assert!(trajectories.observe(4, &tracks, &mapping).is_ok());
        let frames: Vec<usize> = trajectories
            .path(1)
            .unwrap()
            .points()
            .iter()
            .map(|p| p.frame_index)
            .collect();
        assert_eq!(frames, vec![3, 4]);
    }

    #[test]
    fn test_lost_tracks_do_not_grow_path() {
        let mut tracker = Tracker::new(TrackerConfig::default()).unwrap();
        let mut trajectories = Trajectories::new();
        let mapping = CalibrationMapping::identity();

        let tracks = tracker
            .update(&[Detection::from_xyxy(0.0, 0.0, 10.0, 20.0, 0.9)])
            .unwrap();
        trajectories.observe(0, &tracks, &mapping).unwrap();
        let tracks = tracker.update(&[]).unwrap();
        assert_eq!(tracks[0].state(), TrackState::Lost);
        trajectories.observe(1, &tracks, &mapping).unwrap();

        assert_eq!(trajectories.path(1).unwrap().len(), 1);
    }

    #[test]
    fn test_point_at_infinity_is_skipped_but_track_registered() {
        let mapping = CalibrationMapping::from_matrix(nalgebra::Matrix3::new(
            1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 1.0, 0.0, 1.0,
        ))
        .unwrap();
        // bottom-centre x = -1 lies on the vanishing line x = -1.
        let tracks = confirmed_tracks(&[[-6.0, 0.0, 4.0, 10.0]]);
        let mut trajectories = Trajectories::new();
        let appended = trajectories.observe(0, &tracks, &mapping).unwrap();

        assert!(appended.is_empty());
        assert!(trajectories.path(1).unwrap().is_empty());
        assert_eq!(trajectories.finalize(25.0, 1.0).len(), 1);
    }

    #[test]
    fn test_finalize_distance_and_speed() {
        let mut trajectories = Trajectories::new();
        let mapping = CalibrationMapping::identity();
        // Four points, 3 px per frame.
        walk(&mut trajectories, &mapping, &[0.0, 3.0, 6.0, 9.0]);

        let stats = trajectories.finalize(2.0, 3.0);
        assert_eq!(stats.len(), 1);
        let s = &stats[0];
        assert_eq!(s.id, 1);
        assert_eq!(s.point_count, 4);
        assert!(s.calibrated);
        assert_nearly_eq!(s.distance, 3.0, 1e-9);
        // 4 points at 2 fps = 2 seconds
        assert_nearly_eq!(s.average_speed, 1.5, 1e-9);
        // 1 m per frame at 2 fps
        assert_nearly_eq!(s.peak_speed, 2.0, 1e-9);
    }

    #[test]
    fn test_finalize_uncalibrated_scale() {
        let mut trajectories = Trajectories::new();
        let mapping = CalibrationMapping::identity();
        walk(&mut trajectories, &mapping, &[0.0, 4.0]);

        for ppm in [0.0, -2.0, f64::NAN] {
            let stats = trajectories.finalize(1.0, ppm);
            assert!(!stats[0].calibrated);
            assert_nearly_eq!(stats[0].distance, 4.0, 1e-9);
            assert_nearly_eq!(stats[0].average_speed, 2.0, 1e-9);
        }
    }

    #[test]
    fn test_finalize_zero_frame_rate() {
        let mut trajectories = Trajectories::new();
        let mapping = CalibrationMapping::identity();
        walk(&mut trajectories, &mapping, &[0.0, 4.0, 8.0]);

        let stats = trajectories.finalize(0.0, 1.0);
        assert_nearly_eq!(stats[0].distance, 8.0, 1e-9);
        assert_eq!(stats[0].average_speed, 0.0);
        assert_eq!(stats[0].peak_speed, 0.0);
    }

    #[test]
    fn test_finalize_reports_short_paths() {
        let mut trajectories = Trajectories::new();
        let tracks = confirmed_tracks(&[[0.0, 0.0, 10.0, 10.0], [100.0, 0.0, 110.0, 10.0]]);
        trajectories
            .observe(0, &tracks, &CalibrationMapping::identity())
            .unwrap();

        let stats = trajectories.finalize(25.0, 10.0);
        let ids: Vec<usize> = stats.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![1, 2]);
        for s in &stats {
            assert_eq!(s.point_count, 1);
            assert_eq!(s.distance, 0.0);
            assert_eq!(s.average_speed, 0.0);
        }
    }

    #[test]
    fn test_instantaneous_speed_uses_frame_gap() {
        let mut trajectories = Trajectories::new();
        let mut tracker = Tracker::new(TrackerConfig::new(0.7, 5)).unwrap();
        let mapping = CalibrationMapping::identity();

        let det = |x: f32| Detection::from_xyxy(x, 0.0, x + 10.0, 20.0, 0.9);
        let tracks = tracker.update(&[det(0.0)]).unwrap();
        trajectories.observe(0, &tracks, &mapping).unwrap();
        let tracks = tracker.update(&[]).unwrap();
        trajectories.observe(1, &tracks, &mapping).unwrap();
        let tracks = tracker.update(&[det(2.0)]).unwrap();
        trajectories.observe(2, &tracks, &mapping).unwrap();

        // 2 px over 2 frames at 10 fps
        let speed = trajectories.instantaneous_speed(1, 10.0, 1.0).unwrap();
        assert_nearly_eq!(speed, 10.0, 1e-9);
        assert_eq!(trajectories.instantaneous_speed(99, 10.0, 1.0), None);
    }
}
