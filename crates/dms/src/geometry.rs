//! Geometry kernel shared by pose and eye-state estimation

use nalgebra::Point2;

/// Euclidean distance between two image points
pub fn distance(a: &Point2<f64>, b: &Point2<f64>) -> f64 {
    nalgebra::distance(a, b)
}

/// Eye aspect ratio of a six-point eye contour.
///
/// Point order: outer corner, two upper-lid points, inner corner, two
/// lower-lid points, so that `p1-p5` and `p2-p4` are the vertical gaps and
/// `p0-p3` the horizontal one:
///
/// ```text
/// EAR = (|p1 - p5| + |p2 - p4|) / (2 * |p0 - p3|)
/// ```
///
/// Returns `None` when the horizontal gap vanishes or the result is not finite.
pub fn eye_aspect_ratio(points: &[Point2<f64>; 6]) -> Option<f64> {
    let vertical_1 = distance(&points[1], &points[5]);
    let vertical_2 = distance(&points[2], &points[4]);
    let horizontal = distance(&points[0], &points[3]);

    if horizontal <= f64::EPSILON {
        return None;
    }

    let ratio = (vertical_1 + vertical_2) / (2.0 * horizontal);
    ratio.is_finite().then_some(ratio)
}
