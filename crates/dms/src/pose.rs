//! Head pose from six facial anchors and a rigid 3D face model
//!
//! The pose is recovered with a linear DLT estimate refined by
//! Levenberg-Marquardt on the reprojection error, under a pinhole camera
//! whose focal length equals the frame width (no calibration, no distortion).

use nalgebra::{
    Matrix3, Matrix3x4, Matrix4, Matrix6, DMatrix, Point2, Point3, Rotation3, SMatrix, Vector2, Vector3,
    Vector6,
};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::landmarks::{anchors, LandmarkSet};

/// Rigid face model, same order as [`anchors::POSE`]: nose tip, chin,
/// eye outer corners, mouth corners. Units are arbitrary but consistent.
pub const FACE_MODEL: [[f64; 3]; 6] = [
    [0.0, 0.0, 0.0],
    [0.0, -330.0, -65.0],
    [-225.0, 170.0, -135.0],
    [225.0, 170.0, -135.0],
    [-150.0, -150.0, -125.0],
    [150.0, -150.0, -125.0],
];

/// Euler angles of the head in degrees. All zero for a face looking straight
/// into the camera; yaw turns about the vertical axis, pitch nods, roll tilts.
///
/// The rotation is flipped into the camera's y-down, z-forward frame before
/// decomposing, so these differ from the raw angles of an OpenCV-style
/// `decomposeProjectionMatrix`, which reads about ±180° for a frontal face.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct HeadPose {
    pub yaw: f64,
    pub pitch: f64,
    pub roll: f64,
}

/// Approximate pinhole intrinsics
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraIntrinsics {
    pub focal: f64,
    pub cx: f64,
    pub cy: f64,
}

impl CameraIntrinsics {
    /// Focal length equal to the frame width, principal point at the center
    pub fn approximate(width: u32, height: u32) -> Self {
        Self {
            focal: width as f64,
            cx: width as f64 / 2.0,
            cy: height as f64 / 2.0,
        }
    }

    fn normalize(&self, p: &Point2<f64>) -> Point2<f64> {
        Point2::new((p.x - self.cx) / self.focal, (p.y - self.cy) / self.focal)
    }

    /// Pixel position of a camera-space point
    pub fn project(&self, p: &Point3<f64>) -> Option<Point2<f64>> {
        (p.z > f64::EPSILON).then(|| Point2::new(self.focal * p.x / p.z + self.cx, self.focal * p.y / p.z + self.cy))
    }
}

/// Model-to-camera transform
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PnpSolution {
    pub rotation: Rotation3<f64>,
    pub translation: Vector3<f64>,
}

impl PnpSolution {
    pub fn transform(&self, p: &Point3<f64>) -> Point3<f64> {
        self.rotation * p + self.translation
    }

    /// `[R | t]`
    pub fn pose_matrix(&self) -> Matrix3x4<f64> {
        let mut m = Matrix3x4::zeros();
        m.fixed_view_mut::<3, 3>(0, 0).copy_from(self.rotation.matrix());
        m.set_column(3, &self.translation);
        m
    }
}

/// Stateless head pose solver
#[derive(Debug, Clone)]
pub struct HeadPoseSolver {
    model: [Point3<f64>; 6],
}

impl Default for HeadPoseSolver {
    fn default() -> Self {
        Self {
            model: FACE_MODEL.map(|[x, y, z]| Point3::new(x, y, z)),
        }
    }
}

impl HeadPoseSolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn model_points(&self) -> &[Point3<f64>; 6] {
        &self.model
    }

    /// Pose of the face in a `width` x `height` frame, or `None` when the
    /// anchors are missing or the solve is degenerate.
    pub fn solve(&self, landmarks: &LandmarkSet, width: u32, height: u32) -> Option<HeadPose> {
        if width == 0 || height == 0 {
            return None;
        }
        let image = landmarks.pixels(&anchors::POSE, width, height)?;
        let solution = solve_pnp(&self.model, &image, &CameraIntrinsics::approximate(width, height))?;
        let pose = decompose_pose_matrix(&solution.pose_matrix());
        trace!("Head pose yaw={:.1} pitch={:.1} roll={:.1}", pose.yaw, pose.pitch, pose.roll);
        Some(pose)
    }
}

/// Recover the model-to-camera transform from 2D/3D correspondences.
///
/// Needs at least six non-coplanar model points. Returns `None` on a
/// degenerate configuration, a non-finite result, or a solution that puts
/// any model point behind the camera.
pub fn solve_pnp(model: &[Point3<f64>], image: &[Point2<f64>], camera: &CameraIntrinsics) -> Option<PnpSolution> {
    if model.len() != image.len() || model.len() < 6 || camera.focal <= 0.0 {
        return None;
    }
    if image.iter().any(|p| !p.x.is_finite() || !p.y.is_finite()) {
        return None;
    }

    let normalized: Vec<Point2<f64>> = image.iter().map(|p| camera.normalize(p)).collect();
    let initial = direct_linear_transform(model, &normalized)?;
    let solution = refine(initial, model, &normalized);

    let finite = solution.rotation.matrix().iter().all(|v| v.is_finite())
        && solution.translation.iter().all(|v| v.is_finite());
    let in_front = model.iter().all(|p| solution.transform(p).z > 0.0);
    (finite && in_front).then_some(solution)
}

/// Linear estimate of `[R | t]` from normalized image coordinates
fn direct_linear_transform(model: &[Point3<f64>], image: &[Point2<f64>]) -> Option<PnpSolution> {
    let n = model.len();

    // Center the model and scale it to a mean distance of sqrt(3)
    let centroid = model.iter().fold(Vector3::zeros(), |acc, p| acc + p.coords) / n as f64;
    let spread = model.iter().map(|p| (p.coords - centroid).norm()).sum::<f64>() / n as f64;
    if spread <= f64::EPSILON {
        return None;
    }
    let s = 3f64.sqrt() / spread;
    #[rustfmt::skip]
    let conditioning = Matrix4::new(
        s, 0.0, 0.0, -s * centroid.x,
        0.0, s, 0.0, -s * centroid.y,
        0.0, 0.0, s, -s * centroid.z,
        0.0, 0.0, 0.0, 1.0,
    );

    let mut a = DMatrix::<f64>::zeros(2 * n, 12);
    for (i, (p, q)) in model.iter().zip(image).enumerate() {
        let x = (p.coords - centroid) * s;
        let xh = [x.x, x.y, x.z, 1.0];
        for (k, v) in xh.iter().enumerate() {
            a[(2 * i, k)] = *v;
            a[(2 * i, 8 + k)] = -q.x * v;
            a[(2 * i + 1, 4 + k)] = *v;
            a[(2 * i + 1, 8 + k)] = -q.y * v;
        }
    }

    let eigen = (a.transpose() * &a).symmetric_eigen();
    let mut order: Vec<usize> = (0..12).collect();
    order.sort_by(|&i, &j| eigen.eigenvalues[i].total_cmp(&eigen.eigenvalues[j]));
    let largest = eigen.eigenvalues[order[11]];
    // A second null direction means the correspondences do not pin the projection
    if !(largest > 0.0) || eigen.eigenvalues[order[1]] <= 1e-9 * largest {
        return None;
    }

    let p: Vec<f64> = eigen.eigenvectors.column(order[0]).iter().copied().collect();
    let projection = Matrix3x4::from_row_slice(&p) * conditioning;

    let mut m: Matrix3<f64> = projection.fixed_view::<3, 3>(0, 0).into_owned();
    let mut last = projection.column(3).into_owned();
    if m.determinant() < 0.0 {
        m = -m;
        last = -last;
    }

    let svd = m.svd(true, true);
    let (u, v_t) = (svd.u?, svd.v_t?);
    let sv = svd.singular_values;
    let (max_sv, min_sv) = (sv.max(), sv.min());
    if !(max_sv > 0.0) || min_sv / max_sv < 1e-3 {
        return None;
    }

    let rotation = u * v_t;
    if rotation.determinant() <= 0.0 {
        return None;
    }
    let scale = sv.sum() / 3.0;

    Some(PnpSolution {
        rotation: Rotation3::from_matrix_unchecked(rotation),
        translation: last / scale,
    })
}

const MAX_ITERATIONS: usize = 50;

/// Levenberg-Marquardt on the normalized reprojection error, parameterized by
/// rotation vector and translation
fn refine(initial: PnpSolution, model: &[Point3<f64>], image: &[Point2<f64>]) -> PnpSolution {
    let omega = initial.rotation.scaled_axis();
    let mut params = Vector6::new(
        omega.x,
        omega.y,
        omega.z,
        initial.translation.x,
        initial.translation.y,
        initial.translation.z,
    );
    let Some(mut cost) = reprojection_cost(&params, model, image) else {
        return initial;
    };
    let mut lambda = 1e-3;

    for _ in 0..MAX_ITERATIONS {
        if cost <= 1e-24 {
            break;
        }
        let Some((h, g)) = normal_equations(&params, model, image) else {
            break;
        };

        let mut stepped = None;
        while lambda < 1e12 {
            let mut damped = h;
            for i in 0..6 {
                damped[(i, i)] += lambda * h[(i, i)].max(1e-12);
            }
            if let Some(delta) = damped.cholesky().map(|c| c.solve(&(-g))) {
                let candidate = params + delta;
                if let Some(c) = reprojection_cost(&candidate, model, image).filter(|c| *c < cost) {
                    stepped = Some((candidate, c));
                    lambda = (lambda / 10.0).max(1e-12);
                    break;
                }
            }
            lambda *= 10.0;
        }

        let Some((candidate, new_cost)) = stepped else {
            break;
        };
        let gain = cost - new_cost;
        params = candidate;
        cost = new_cost;
        if gain <= 1e-12 * cost {
            break;
        }
    }

    PnpSolution {
        rotation: Rotation3::from_scaled_axis(Vector3::new(params[0], params[1], params[2])),
        translation: Vector3::new(params[3], params[4], params[5]),
    }
}

fn project(params: &Vector6<f64>, p: &Point3<f64>) -> Option<Vector2<f64>> {
    let rotation = Rotation3::from_scaled_axis(Vector3::new(params[0], params[1], params[2]));
    let c = rotation * p + Vector3::new(params[3], params[4], params[5]);
    (c.z > f64::EPSILON).then(|| Vector2::new(c.x / c.z, c.y / c.z))
}

fn reprojection_cost(params: &Vector6<f64>, model: &[Point3<f64>], image: &[Point2<f64>]) -> Option<f64> {
    model.iter().zip(image).try_fold(0.0, |acc, (p, q)| {
        let r = project(params, p)? - q.coords;
        Some(acc + r.norm_squared())
    })
}

/// `J^T J` and `J^T r` with a central-difference Jacobian
fn normal_equations(
    params: &Vector6<f64>,
    model: &[Point3<f64>],
    image: &[Point2<f64>],
) -> Option<(Matrix6<f64>, Vector6<f64>)> {
    let mut h = Matrix6::zeros();
    let mut g = Vector6::zeros();

    for (p, q) in model.iter().zip(image) {
        let residual = project(params, p)? - q.coords;
        let mut jacobian = SMatrix::<f64, 2, 6>::zeros();
        for j in 0..6 {
            let step = 1e-6 * params[j].abs().max(1.0);
            let mut plus = *params;
            let mut minus = *params;
            plus[j] += step;
            minus[j] -= step;
            let column = (project(&plus, p)? - project(&minus, p)?) / (2.0 * step);
            jacobian.set_column(j, &column);
        }
        h += jacobian.transpose() * jacobian;
        g += jacobian.transpose() * residual;
    }

    Some((h, g))
}

/// Euler angles of a `[R | t]` pose matrix.
///
/// The camera looks down +Z with +Y pointing down while the face model has
/// +Y up and the nose along +Z, so the rotation is first re-expressed
/// relative to a frontal face, `H = R * diag(1, -1, -1)`, and then split as
/// `H = Rz(roll) * Ry(yaw) * Rx(pitch)`.
pub fn decompose_pose_matrix(pose: &Matrix3x4<f64>) -> HeadPose {
    let r: Matrix3<f64> = pose.fixed_view::<3, 3>(0, 0).into_owned();
    let h = r * Matrix3::from_diagonal(&Vector3::new(1.0, -1.0, -1.0));

    let yaw = (-h[(2, 0)]).clamp(-1.0, 1.0).asin();
    let (pitch, roll) = if yaw.cos() > 1e-6 {
        (h[(2, 1)].atan2(h[(2, 2)]), h[(1, 0)].atan2(h[(0, 0)]))
    } else {
        ((-h[(1, 2)]).atan2(h[(1, 1)]), 0.0)
    };

    HeadPose {
        yaw: yaw.to_degrees(),
        pitch: pitch.to_degrees(),
        roll: roll.to_degrees(),
    }
}
