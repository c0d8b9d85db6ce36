//! Planar perspective mapping from image pixels onto the calibrated plane.

use crate::error::TrackError;
use nalgebra::{Matrix3, Point2, SMatrix, SVector, Vector3};
use serde::{Deserialize, Serialize};

/* -----------------------------------------------------------------------------
 * Tolerances
 * ----------------------------------------------------------------------------- */
// Relative to the product of the two edge lengths spanning the triangle.
const COLLINEAR_EPS: f64 = 1e-9;
// Relative to the magnitude of the terms summed into the homogeneous weight.
const INFINITY_EPS: f64 = 1e-12;
const SINGULAR_EPS: f64 = 1e-12;

/* -----------------------------------------------------------------------------
 * Calibration points
 * ----------------------------------------------------------------------------- */
/// Four image points and the plane points they correspond to.
///
/// Source points are in original-resolution pixels; destination points are
/// in plane units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationPoints {
    pub source: [[f64; 2]; 4],
    pub destination: [[f64; 2]; 4],
}

impl CalibrationPoints {
    pub fn to_mapping(&self) -> Result<CalibrationMapping, TrackError> {
        CalibrationMapping::from_points(
            &self.source.map(|[x, y]| Point2::new(x, y)),
            &self.destination.map(|[x, y]| Point2::new(x, y)),
        )
    }
}

/* -----------------------------------------------------------------------------
 * CalibrationMapping
 * ----------------------------------------------------------------------------- */
/// A 3x3 homography normalised so that its bottom-right entry is 1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationMapping {
    matrix: Matrix3<f64>,
}

impl CalibrationMapping {
    /// Solve the homography taking each `source[i]` onto `destination[i]`.
    ///
    /// # Errors
    /// `DegenerateGeometry` if a point is not finite, any three points of
    /// either quadrilateral are collinear, or the transform is singular.
    pub fn from_points(
        source: &[Point2<f64>; 4],
        destination: &[Point2<f64>; 4],
    ) -> Result<Self, TrackError> {
        check_quad(source, "source")?;
        check_quad(destination, "destination")?;

        // A h = b with h = [h11 h12 h13 h21 h22 h23 h31 h32], h33 = 1.
        let mut a = SMatrix::<f64, 8, 8>::zeros();
        let mut b = SVector::<f64, 8>::zeros();
        for (i, (s, d)) in source.iter().zip(destination.iter()).enumerate() {
            let (x, y, u, v) = (s.x, s.y, d.x, d.y);
            let r = 2 * i;
            a.row_mut(r)
                .copy_from_slice(&[x, y, 1.0, 0.0, 0.0, 0.0, -u * x, -u * y]);
            a.row_mut(r + 1)
                .copy_from_slice(&[0.0, 0.0, 0.0, x, y, 1.0, -v * x, -v * y]);
            b[r] = u;
            b[r + 1] = v;
        }

        let Some(h) = a.lu().solve(&b) else {
            return Err(TrackError::DegenerateGeometry(
                "calibration system is singular".to_string(),
            ));
        };

        Self::from_matrix(Matrix3::new(
            h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], 1.0,
        ))
    }

    /// Wrap an existing homography, rescaling it so `m[(2, 2)] == 1`.
    pub fn from_matrix(matrix: Matrix3<f64>) -> Result<Self, TrackError> {
        if matrix.iter().any(|v| !v.is_finite()) {
            return Err(TrackError::DegenerateGeometry(
                "homography has non-finite entries".to_string(),
            ));
        }
        let scale = matrix[(2, 2)];
        if scale.abs() <= f64::EPSILON * matrix.amax() {
            return Err(TrackError::DegenerateGeometry(
                "homography maps the origin to infinity".to_string(),
            ));
        }
        let matrix = matrix / scale;
        // Hadamard's bound makes the singularity test scale-free.
        let det = matrix.determinant();
        let bound: f64 = matrix.column_iter().map(|c| c.norm()).product();
        if !det.is_finite() || det.abs() <= SINGULAR_EPS * bound {
            return Err(TrackError::DegenerateGeometry(format!(
                "homography is singular (det = {:e})",
                det
            )));
        }
        Ok(Self { matrix })
    }

    pub fn identity() -> Self {
        Self {
            matrix: Matrix3::identity(),
        }
    }

    pub fn matrix(&self) -> &Matrix3<f64> {
        &self.matrix
    }

    /// Apply the transform. Points outside the calibration quadrilateral are
    /// extrapolated; points on the vanishing line come out non-finite.
    pub fn project(&self, point: &Point2<f64>) -> Point2<f64> {
        let p = self.matrix * Vector3::new(point.x, point.y, 1.0);
        Point2::new(p.x / p.z, p.y / p.z)
    }

    /// Like [`project`](Self::project) but fails on the vanishing line.
    pub fn try_project(&self, point: &Point2<f64>) -> Result<Point2<f64>, TrackError> {
        let m = &self.matrix;
        let terms = [m[(2, 0)] * point.x, m[(2, 1)] * point.y, m[(2, 2)]];
        let w: f64 = terms.iter().sum();
        let magnitude = terms.iter().fold(0.0f64, |acc, t| acc.max(t.abs()));
        if !w.is_finite() || w.abs() <= INFINITY_EPS * magnitude {
            return Err(TrackError::PointAtInfinity);
        }
        let projected = self.project(point);
        if projected.x.is_finite() && projected.y.is_finite() {
            Ok(projected)
        } else {
            Err(TrackError::PointAtInfinity)
        }
    }

    pub fn project_points(&self, points: &[Point2<f64>]) -> Vec<Point2<f64>> {
        points.iter().map(|p| self.project(p)).collect()
    }

    /// Mapping from the plane back onto the image.
    pub fn inverse(&self) -> Result<Self, TrackError> {
        let Some(inv) = self.matrix.try_inverse() else {
            return Err(TrackError::DegenerateGeometry(
                "homography is not invertible".to_string(),
            ));
        };
        Self::from_matrix(inv)
    }
}

fn check_quad(points: &[Point2<f64>; 4], which: &str) -> Result<(), TrackError> {
    if points.iter().any(|p| !(p.x.is_finite() && p.y.is_finite())) {
        return Err(TrackError::DegenerateGeometry(format!(
            "{} points must be finite",
            which
        )));
    }
    for (i, j, k) in [(0, 1, 2), (0, 1, 3), (0, 2, 3), (1, 2, 3)] {
        let ab = points[j] - points[i];
        let ac = points[k] - points[i];
        let cross = ab.x * ac.y - ab.y * ac.x;
        if cross.abs() <= COLLINEAR_EPS * ab.norm() * ac.norm() {
            return Err(TrackError::DegenerateGeometry(format!(
                "{} points {}, {} and {} are collinear",
                which, i, j, k
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nearly_eq::assert_nearly_eq;
    use quickcheck::quickcheck;

    fn pts(raw: [[f64; 2]; 4]) -> [Point2<f64>; 4] {
        raw.map(|[x, y]| Point2::new(x, y))
    }

    // Broadcast-style camera view of a 105 x 68 pitch.
    fn pitch_mapping() -> CalibrationMapping {
        CalibrationMapping::from_points(
            &pts([[310.0, 220.0], [970.0, 220.0], [1240.0, 700.0], [40.0, 700.0]]),
            &pts([[0.0, 0.0], [105.0, 0.0], [105.0, 68.0], [0.0, 68.0]]),
        )
        .unwrap()
    }

    #[test]
    fn test_round_trip_on_calibration_points() {
        let source = pts([[310.0, 220.0], [970.0, 220.0], [1240.0, 700.0], [40.0, 700.0]]);
        let destination = pts([[0.0, 0.0], [105.0, 0.0], [105.0, 68.0], [0.0, 68.0]]);
        let mapping = CalibrationMapping::from_points(&source, &destination).unwrap();

        for (s, d) in source.iter().zip(destination.iter()) {
            let p = mapping.project(s);
            assert_nearly_eq!(p.x, d.x, 1e-6);
            assert_nearly_eq!(p.y, d.y, 1e-6);
        }
    }

    #[test]
    fn test_affine_case_matches_scale_and_shift() {
        let mapping = CalibrationMapping::from_points(
            &pts([[0.0, 0.0], [10.0, 0.0], [10.0, 10.0], [0.0, 10.0]]),
            &pts([[5.0, 5.0], [25.0, 5.0], [25.0, 25.0], [5.0, 25.0]]),
        )
        .unwrap();
        let p = mapping.project(&Point2::new(3.0, 7.0));
        assert_nearly_eq!(p.x, 11.0, 1e-9);
        assert_nearly_eq!(p.y, 19.0, 1e-9);
        assert_nearly_eq!(mapping.matrix()[(2, 2)], 1.0, 1e-12);
    }

    #[test]
    fn test_extrapolates_outside_quadrilateral() {
        let mapping = CalibrationMapping::from_points(
            &pts([[0.0, 0.0], [10.0, 0.0], [10.0, 10.0], [0.0, 10.0]]),
            &pts([[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]]),
        )
        .unwrap();
        let p = mapping.project(&Point2::new(-5.0, 25.0));
        assert_nearly_eq!(p.x, -0.5, 1e-9);
        assert_nearly_eq!(p.y, 2.5, 1e-9);
    }

    #[test]
    fn test_collinear_source_is_degenerate() {
        let result = CalibrationMapping::from_points(
            &pts([[0.0, 0.0], [1.0, 1.0], [2.0, 2.0], [0.0, 5.0]]),
            &pts([[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]]),
        );
        assert!(matches!(result, Err(TrackError::DegenerateGeometry(_))));
    }

    #[test]
    fn test_all_points_on_a_line_is_degenerate() {
        let result = CalibrationMapping::from_points(
            &pts([[0.0, 0.0], [1.0, 0.0], [2.0, 0.0], [3.0, 0.0]]),
            &pts([[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]]),
        );
        assert!(matches!(result, Err(TrackError::DegenerateGeometry(_))));
    }

    #[test]
    fn test_collinear_destination_is_degenerate() {
        let result = CalibrationMapping::from_points(
            &pts([[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]]),
            &pts([[0.0, 0.0], [0.0, 1.0], [0.0, 2.0], [3.0, 3.0]]),
        );
        assert!(matches!(result, Err(TrackError::DegenerateGeometry(_))));
    }

    #[test]
    fn test_duplicate_point_is_degenerate() {
        let result = CalibrationMapping::from_points(
            &pts([[0.0, 0.0], [0.0, 0.0], [1.0, 1.0], [0.0, 1.0]]),
            &pts([[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]]),
        );
        assert!(matches!(result, Err(TrackError::DegenerateGeometry(_))));
    }

    #[test]
    fn test_non_finite_point_is_degenerate() {
        let result = CalibrationMapping::from_points(
            &pts([[f64::NAN, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]]),
            &pts([[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]]),
        );
        assert!(matches!(result, Err(TrackError::DegenerateGeometry(_))));
    }

    #[test]
    fn test_inverse_round_trip() {
        let mapping = pitch_mapping();
        let inverse = mapping.inverse().unwrap();
        for p in [Point2::new(640.0, 480.0), Point2::new(100.0, 650.0)] {
            let back = inverse.project(&mapping.project(&p));
            assert_nearly_eq!(back.x, p.x, 1e-4);
            assert_nearly_eq!(back.y, p.y, 1e-4);
        }
    }

    #[test]
    fn test_try_project_at_infinity() {
        // w = x + 1 vanishes on the line x = -1.
        let mapping = CalibrationMapping::from_matrix(Matrix3::new(
            1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 1.0, 0.0, 1.0,
        ))
        .unwrap();
        assert_eq!(
            mapping.try_project(&Point2::new(-1.0, 5.0)),
            Err(TrackError::PointAtInfinity)
        );
        assert!(!mapping.project(&Point2::new(-1.0, 5.0)).x.is_finite());
        assert!(mapping.try_project(&Point2::new(1.0, 5.0)).is_ok());
    }

    #[test]
    fn test_from_matrix_rejects_singular() {
        let singular = Matrix3::new(1.0, 2.0, 3.0, 2.0, 4.0, 6.0, 0.0, 0.0, 1.0);
        assert!(matches!(
            CalibrationMapping::from_matrix(singular),
            Err(TrackError::DegenerateGeometry(_))
        ));
    }

    #[test]
    fn test_project_points_preserves_order() {
        let mapping = CalibrationMapping::identity();
        let input = vec![Point2::new(1.0, 2.0), Point2::new(3.0, 4.0)];
        assert_eq!(mapping.project_points(&input), input);
    }

    #[test]
    fn test_calibration_points_from_json() {
        let points: CalibrationPoints = serde_json::from_str(
            r#"{"source": [[0,0],[10,0],[10,10],[0,10]],
                "destination": [[0,0],[1,0],[1,1],[0,1]]}"#,
        )
        .unwrap();
        let mapping = points.to_mapping().unwrap();
        let p = mapping.project(&Point2::new(5.0, 5.0));
        assert_nearly_eq!(p.x, 0.5, 1e-9);
        assert_nearly_eq!(p.y, 0.5, 1e-9);
    }

    #[test]
    fn test_quickcheck_inside_points_stay_finite() {
        fn prop(u: u8, v: u8) -> bool {
            let mapping = pitch_mapping();
            let x = 40.0 + 1200.0 * (u as f64 / 255.0);
            let y = 220.0 + 480.0 * (v as f64 / 255.0);
            match mapping.try_project(&Point2::new(x, y)) {
                Ok(p) => p.x.is_finite() && p.y.is_finite(),
                Err(_) => false,
            }
        }
        quickcheck(prop as fn(u8, u8) -> bool);
    }
}
