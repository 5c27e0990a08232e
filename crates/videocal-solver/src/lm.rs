//! Levenberg-Marquardt refinement of reprojection error.
//!
//! Camera block: `[fx, fy, cx, cy, k1, k2, p1, p2]` (`k3` held at zero).
//! Pose block: `[rx, ry, rz, tx, ty, tz]` with an axis-angle rotation.
//! Jacobians are central differences; a pose column only touches the rows
//! of its own view.

use levenberg_marquardt_sparse::{LeastSquaresProblem, LevenbergMarquardt, SparseJacobian};
use log::debug;
use nalgebra::{
    storage::Owned, DMatrix, DVector, Dyn, Isometry3, Point2, Point3, Vector2, Vector3,
};
use serde::{Deserialize, Serialize};
use std::ops::Range;
use videocal_core::{BrownConrady5, Camera, CameraIntrinsics, PointDetection};

pub(crate) const CAMERA_PARAMS: usize = 8;
pub(crate) const POSE_PARAMS: usize = 6;

/// Stopping rules handed to the `levenberg-marquardt` solver.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LmOptions {
    /// Evaluation budget, in units of `parameters + 1` evaluations.
    pub max_iters: usize,
    /// Relative reduction of the sum of squares treated as converged.
    pub ftol: f64,
    /// Relative step size treated as converged.
    pub xtol: f64,
    pub gtol: f64,
}

impl Default for LmOptions {
    fn default() -> Self {
        Self {
            max_iters: 100,
            ftol: 1e-12,
            xtol: 1e-12,
            gtol: 0.0,
        }
    }
}

impl LmOptions {
    fn solver(&self) -> LevenbergMarquardt<f64> {
        LevenbergMarquardt::new()
            .with_ftol(self.ftol)
            .with_xtol(self.xtol)
            .with_gtol(self.gtol)
            .with_patience(self.max_iters.max(1))
    }
}

fn camera_params(c: &Camera) -> [f64; CAMERA_PARAMS] {
    let k = &c.intrinsics;
    let d = &c.distortion;
    [k.fx, k.fy, k.cx, k.cy, d.k1, d.k2, d.p1, d.p2]
}

fn camera_from(p: &[f64]) -> Camera {
    Camera::new(
        CameraIntrinsics::new(p[0], p[1], p[2], p[3]),
        BrownConrady5 {
            k1: p[4],
            k2: p[5],
            p1: p[6],
            p2: p[7],
            k3: 0.0,
        },
    )
}

fn pose_params(pose: &Isometry3<f64>) -> [f64; POSE_PARAMS] {
    let r = pose.rotation.scaled_axis();
    let t = pose.translation.vector;
    [r.x, r.y, r.z, t.x, t.y, t.z]
}

fn pose_from(p: &[f64]) -> Isometry3<f64> {
    Isometry3::new(Vector3::new(p[3], p[4], p[5]), Vector3::new(p[0], p[1], p[2]))
}

/// Reprojection residuals `(u, v)` per correspondence, written into `out`.
fn write_residuals(
    camera: &Camera,
    pose: &Isometry3<f64>,
    object: &[Point3<f64>],
    image: &[Point2<f64>],
    out: &mut [f64],
) {
    for (k, (obj, img)) in object.iter().zip(image).enumerate() {
        let pc = pose.transform_point(obj);
        let z = if pc.z.abs() < 1e-9 { 1e-9 } else { pc.z };
        let n = Vector2::new(pc.x / z, pc.y / z);
        let proj = camera
            .intrinsics
            .denormalize(camera.distortion.distort(n));
        out[2 * k] = proj.x - img.x;
        out[2 * k + 1] = proj.y - img.y;
    }
}

#[inline]
fn step(x: f64) -> f64 {
    1e-6 * x.abs().max(1.0)
}

/// Result of a bundle refinement.
#[derive(Clone, Debug)]
pub struct BundleOutcome {
    pub camera: Camera,
    pub poses: Vec<Isometry3<f64>>,
    /// Sum of squared residuals.
    pub cost: f64,
    pub evaluations: usize,
    pub converged: bool,
}

/// Camera parameters followed by one pose block per view.
struct CalibrationProblem<'a> {
    views: &'a [PointDetection],
    /// First residual row of each view.
    offsets: Vec<usize>,
    rows: usize,
    params: DVector<f64>,
}

impl<'a> CalibrationProblem<'a> {
    fn new(camera: &Camera, poses: &[Isometry3<f64>], views: &'a [PointDetection]) -> Self {
        let mut offsets = Vec::with_capacity(views.len());
        let mut rows = 0;
        for view in views {
            offsets.push(rows);
            rows += 2 * view.image_points.len();
        }

        let mut params = DVector::zeros(CAMERA_PARAMS + POSE_PARAMS * views.len());
        params
            .rows_mut(0, CAMERA_PARAMS)
            .copy_from_slice(&camera_params(camera));
        for (k, pose) in poses.iter().take(views.len()).enumerate() {
            params
                .rows_mut(CAMERA_PARAMS + POSE_PARAMS * k, POSE_PARAMS)
                .copy_from_slice(&pose_params(pose));
        }

        Self {
            views,
            offsets,
            rows,
            params,
        }
    }

    fn pose_range(view: usize) -> Range<usize> {
        let start = CAMERA_PARAMS + POSE_PARAMS * view;
        start..start + POSE_PARAMS
    }

    fn view_rows(&self, view: usize) -> Range<usize> {
        let start = self.offsets[view];
        start..start + 2 * self.views[view].image_points.len()
    }

    fn camera_at(x: &DVector<f64>) -> Camera {
        camera_from(&x.as_slice()[..CAMERA_PARAMS])
    }

    fn pose_at(x: &DVector<f64>, view: usize) -> Isometry3<f64> {
        pose_from(&x.as_slice()[Self::pose_range(view)])
    }

    fn view_residuals(&self, x: &DVector<f64>, view: usize, out: &mut [f64]) {
        let det = &self.views[view];
        write_residuals(
            &Self::camera_at(x),
            &Self::pose_at(x, view),
            &det.object_points,
            &det.image_points,
            out,
        );
    }

    fn residuals_at(&self, x: &DVector<f64>) -> DVector<f64> {
        let mut r = DVector::zeros(self.rows);
        for view in 0..self.views.len() {
            let rows = self.view_rows(view);
            self.view_residuals(x, view, &mut r.as_mut_slice()[rows]);
        }
        r
    }
}

impl LeastSquaresProblem<f64, Dyn, Dyn> for CalibrationProblem<'_> {
    type ResidualStorage = Owned<f64, Dyn>;
    type ParameterStorage = Owned<f64, Dyn>;

    fn set_params(&mut self, x: &DVector<f64>) {
        self.params.clone_from(x);
    }

    fn params(&self) -> DVector<f64> {
        self.params.clone()
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        Some(self.residuals_at(&self.params))
    }

    fn jacobian(&self) -> Option<SparseJacobian<f64>> {
        let x = &self.params;
        let mut j = DMatrix::zeros(self.rows, x.len());
        let mut shifted = x.clone();

        for c in 0..CAMERA_PARAMS {
            let h = step(x[c]);
            shifted[c] = x[c] + h;
            let plus = self.residuals_at(&shifted);
            shifted[c] = x[c] - h;
            let minus = self.residuals_at(&shifted);
            shifted[c] = x[c];
            j.set_column(c, &((plus - minus) / (2.0 * h)));
        }

        for view in 0..self.views.len() {
            let rows = self.view_rows(view);
            let mut plus = vec![0.0; rows.len()];
            let mut minus = vec![0.0; rows.len()];
            for c in Self::pose_range(view) {
                let h = step(x[c]);
                shifted[c] = x[c] + h;
                self.view_residuals(&shifted, view, &mut plus);
                shifted[c] = x[c] - h;
                self.view_residuals(&shifted, view, &mut minus);
                shifted[c] = x[c];
                for (row, (p, m)) in rows.clone().zip(plus.iter().zip(&minus)) {
                    j[(row, c)] = (p - m) / (2.0 * h);
                }
            }
        }

        Some(SparseJacobian::from_dense(j))
    }
}

/// Jointly refine camera parameters and every view pose.
///
/// Falls back to the starting point when the solver ends on a worse or
/// non-finite cost.
pub fn refine_calibration(
    camera: &Camera,
    poses: &[Isometry3<f64>],
    views: &[PointDetection],
    opts: &LmOptions,
) -> BundleOutcome {
    let problem = CalibrationProblem::new(camera, poses, views);
    let start = problem.params.clone();
    let start_cost = problem.residuals_at(&start).norm_squared();

    let (mut problem, report) = opts.solver().minimize(problem);
    debug!(
        "calibration refinement: {:?} after {} evaluations",
        report.termination, report.number_of_evaluations
    );

    let mut cost = problem.residuals_at(&problem.params).norm_squared();
    if !(cost.is_finite() && cost <= start_cost) {
        problem.set_params(&start);
        cost = start_cost;
    }

    let x = &problem.params;
    BundleOutcome {
        camera: CalibrationProblem::camera_at(x),
        poses: (0..views.len())
            .map(|view| CalibrationProblem::pose_at(x, view))
            .collect(),
        cost,
        evaluations: report.number_of_evaluations,
        converged: report.termination.was_successful(),
    }
}

/// One pose with the camera held fixed.
struct PoseProblem<'a> {
    camera: &'a Camera,
    object: &'a [Point3<f64>],
    image: &'a [Point2<f64>],
    params: DVector<f64>,
}

impl PoseProblem<'_> {
    fn residuals_at(&self, x: &DVector<f64>) -> DVector<f64> {
        let mut r = DVector::zeros(2 * self.image.len());
        write_residuals(
            self.camera,
            &pose_from(x.as_slice()),
            self.object,
            self.image,
            r.as_mut_slice(),
        );
        r
    }
}

impl LeastSquaresProblem<f64, Dyn, Dyn> for PoseProblem<'_> {
    type ResidualStorage = Owned<f64, Dyn>;
    type ParameterStorage = Owned<f64, Dyn>;

    fn set_params(&mut self, x: &DVector<f64>) {
        self.params.clone_from(x);
    }

    fn params(&self) -> DVector<f64> {
        self.params.clone()
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        Some(self.residuals_at(&self.params))
    }

    fn jacobian(&self) -> Option<SparseJacobian<f64>> {
        let x = &self.params;
        let mut j = DMatrix::zeros(2 * self.image.len(), POSE_PARAMS);
        let mut shifted = x.clone();
        for c in 0..POSE_PARAMS {
            let h = step(x[c]);
            shifted[c] = x[c] + h;
            let plus = self.residuals_at(&shifted);
            shifted[c] = x[c] - h;
            let minus = self.residuals_at(&shifted);
            shifted[c] = x[c];
            j.set_column(c, &((plus - minus) / (2.0 * h)));
        }
        Some(SparseJacobian::from_dense(j))
    }
}

/// Refine a single pose with the camera held fixed.
pub fn refine_pose(
    camera: &Camera,
    pose: &Isometry3<f64>,
    object: &[Point3<f64>],
    image: &[Point2<f64>],
    opts: &LmOptions,
) -> Isometry3<f64> {
    let problem = PoseProblem {
        camera,
        object,
        image,
        params: DVector::from_row_slice(&pose_params(pose)),
    };
    let start_cost = problem.residuals_at(&problem.params).norm_squared();

    let (problem, report) = opts.solver().minimize(problem);
    let cost = problem.residuals_at(&problem.params).norm_squared();
    if !(cost.is_finite() && cost <= start_cost) {
        debug!("pose refinement kept the start: {:?}", report.termination);
        return *pose;
    }
    pose_from(problem.params.as_slice())
}
