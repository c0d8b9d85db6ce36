use nalgebra::{Matrix1x4, Point2};
use num::Float;
use std::fmt::Debug;

/* ------------------------------------------------------------------------------
 * Type aliases
 * ------------------------------------------------------------------------------ */
/// Kalman measurement layout: center x, center y, height, aspect ratio (w/h).
pub type Xyhr<T> = Matrix1x4<T>;

/* ------------------------------------------------------------------------------
 * Rect struct
 * ------------------------------------------------------------------------------ */
/// Axis-aligned box stored as top-left corner plus width and height.
#[derive(Debug, Clone, PartialEq)]
pub struct Rect<T>
where
    T: Debug + Float,
{
    tlwh: Matrix1x4<T>,
}

impl<T> Rect<T>
where
    T: Clone + Debug + Float + 'static,
{
    pub fn new(x: T, y: T, width: T, height: T) -> Self {
        Self {
            tlwh: Matrix1x4::new(x, y, width, height),
        }
    }

    #[inline(always)]
    pub fn x(&self) -> T {
        self.tlwh[(0, 0)]
    }

    #[inline(always)]
    pub fn y(&self) -> T {
        self.tlwh[(0, 1)]
    }

    #[inline(always)]
    pub fn width(&self) -> T {
        self.tlwh[(0, 2)]
    }

    #[inline(always)]
    pub fn height(&self) -> T {
        self.tlwh[(0, 3)]
    }

    pub fn area(&self) -> T {
        self.width().max(T::zero()) * self.height().max(T::zero())
    }

    /// Intersection over union with continuous pixel coordinates.
    ///
    /// Identical boxes give 1, disjoint (or touching) boxes give 0. Boxes
    /// with zero area never overlap anything.
    pub fn calc_iou(&self, other: &Rect<T>) -> T {
        let [ax1, ay1, ax2, ay2] = self.get_xyxy();
        let [bx1, by1, bx2, by2] = other.get_xyxy();

        let iw = ax2.min(bx2) - ax1.max(bx1);
        if iw <= T::zero() {
            return T::zero();
        }
        let ih = ay2.min(by2) - ay1.max(by1);
        if ih <= T::zero() {
            return T::zero();
        }

        let inter = iw * ih;
        let union = self.area() + other.area() - inter;
        if union <= T::zero() {
            return T::zero();
        }
        (inter / union).min(T::one())
    }

    /// Bounding box as [x1, y1, x2, y2].
    pub fn get_xyxy(&self) -> [T; 4] {
        [
            self.x(),
            self.y(),
            self.x() + self.width(),
            self.y() + self.height(),
        ]
    }

    /// Create Rect from [x1, y1, x2, y2] format
    pub fn from_xyxy(x1: T, y1: T, x2: T, y2: T) -> Self {
        Self::new(x1, y1, x2 - x1, y2 - y1)
    }

    pub fn get_xyhr(&self) -> Xyhr<T> {
        let two = T::from(2).unwrap_or_else(T::one);
        let h = self.height();
        let r = if h > T::zero() {
            self.width() / h
        } else {
            T::zero()
        };
        Matrix1x4::new(
            self.x() + self.width() / two,
            self.y() + h / two,
            h,
            r,
        )
    }

    /// Create Rect from [x, y, h, r] format (center_x, center_y, height, aspect_ratio)
    pub fn from_xyhr(x: T, y: T, h: T, r: T) -> Self {
        let two = T::from(2).unwrap_or_else(T::one);
        let w = if r <= T::zero() { T::zero() } else { r * h };
        Self::new(x - w / two, y - h / two, w, h)
    }

    /// Ground-contact anchor: bottom edge, horizontally centred.
    pub fn bottom_center(&self) -> Point2<T> {
        let two = T::from(2).unwrap_or_else(T::one);
        Point2::new(self.x() + self.width() / two, self.y() + self.height())
    }

    /// Every coordinate divided by `scale`.
    pub fn unscaled(&self, scale: T) -> Self {
        Self::new(
            self.x() / scale,
            self.y() / scale,
            self.width() / scale,
            self.height() / scale,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nearly_eq::assert_nearly_eq;

    #[test]
    fn test_iou_identical() {
        let a = Rect::from_xyxy(100.0f32, 100.0, 200.0, 200.0);
        assert_nearly_eq!(a.calc_iou(&a.clone()), 1.0, 1e-6);
    }

    #[test]
    fn test_iou_disjoint() {
        let a = Rect::from_xyxy(0.0f32, 0.0, 100.0, 100.0);
        let b = Rect::from_xyxy(200.0f32, 200.0, 300.0, 300.0);
        assert_eq!(a.calc_iou(&b), 0.0);
        assert_eq!(b.calc_iou(&a), 0.0);
    }

    #[test]
    fn test_iou_touching_edges() {
        let a = Rect::from_xyxy(0.0f32, 0.0, 10.0, 10.0);
        let b = Rect::from_xyxy(10.0f32, 0.0, 20.0, 10.0);
        assert_eq!(a.calc_iou(&b), 0.0);
    }

    #[test]
    fn test_iou_partial_overlap() {
        // Intersection 90x90 = 8100, union 2*10000 - 8100 = 11900
        let a = Rect::from_xyxy(100.0f32, 100.0, 200.0, 200.0);
        let b = Rect::from_xyxy(110.0f32, 110.0, 210.0, 210.0);
        assert_nearly_eq!(a.calc_iou(&b), 0.6806723, 1e-5);
    }

    #[test]
    fn test_iou_zero_area() {
        let a = Rect::new(5.0f32, 5.0, 0.0, 0.0);
        assert_eq!(a.calc_iou(&a.clone()), 0.0);
    }

    #[test]
    fn test_xyhr_round_trip() {
        let rect = Rect::from_xyxy(10.0f32, 20.0, 50.0, 100.0);
        let z = rect.get_xyhr();
        assert_nearly_eq!(z[0], 30.0, 1e-5);
        assert_nearly_eq!(z[1], 60.0, 1e-5);
        assert_nearly_eq!(z[2], 80.0, 1e-5);
        assert_nearly_eq!(z[3], 0.5, 1e-5);

        let back = Rect::from_xyhr(z[0], z[1], z[2], z[3]);
        for (a, b) in back.get_xyxy().iter().zip(rect.get_xyxy().iter()) {
            assert_nearly_eq!(*a, *b, 1e-4);
        }
    }

    #[test]
    fn test_bottom_center() {
        let rect = Rect::from_xyxy(10.0f64, 20.0, 30.0, 70.0);
        let anchor = rect.bottom_center();
        assert_nearly_eq!(anchor.x, 20.0, 1e-12);
        assert_nearly_eq!(anchor.y, 70.0, 1e-12);
    }

    #[test]
    fn test_unscaled() {
        let rect = Rect::from_xyxy(32.0f32, 16.0, 64.0, 48.0);
        let big = rect.unscaled(0.5);
        assert_eq!(big.get_xyxy(), [64.0, 32.0, 128.0, 96.0]);
    }
}
