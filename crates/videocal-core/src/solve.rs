use crate::camera::Camera;
use crate::detection::PointDetection;
use nalgebra::{Isometry3, Point2, Point3};

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum SolveError {
    #[error("need at least {required} views to calibrate, got {got}")]
    NotEnoughViews { required: usize, got: usize },

    #[error("view {view} has {got} points, need at least {required}")]
    NotEnoughPoints {
        view: usize,
        required: usize,
        got: usize,
    },

    #[error("view {view}: object points are not planar (z != 0)")]
    NonPlanarTarget { view: usize },

    #[error("homography estimation failed for view {view}")]
    Homography { view: usize },

    #[error("degenerate view configuration: {0}")]
    Degenerate(String),
}

/// Output of one calibration solve.
#[derive(Clone, Debug, PartialEq)]
pub struct CalibrationResult {
    /// RMS reprojection error in pixels.
    pub rms: f64,
    pub camera: Camera,
    /// Board-to-camera pose per view, in input order.
    pub extrinsics: Vec<Isometry3<f64>>,
}

impl CalibrationResult {
    pub fn num_views(&self) -> usize {
        self.extrinsics.len()
    }
}

/// Estimates intrinsics, distortion and per-view poses from planar views.
pub trait CalibrationSolver {
    fn calibrate(
        &self,
        views: &[PointDetection],
        image_size: (u32, u32),
    ) -> Result<CalibrationResult, SolveError>;
}

/// Perspective-n-point: board-to-camera pose from correspondences.
pub trait PoseSolver {
    fn solve_pnp(
        &self,
        object_points: &[Point3<f64>],
        image_points: &[Point2<f64>],
        camera: &Camera,
    ) -> Option<Isometry3<f64>>;
}

impl<T: CalibrationSolver + ?Sized> CalibrationSolver for Box<T> {
    fn calibrate(
        &self,
        views: &[PointDetection],
        image_size: (u32, u32),
    ) -> Result<CalibrationResult, SolveError> {
        (**self).calibrate(views, image_size)
    }
}

impl<T: PoseSolver + ?Sized> PoseSolver for Box<T> {
    fn solve_pnp(
        &self,
        object_points: &[Point3<f64>],
        image_points: &[Point2<f64>],
        camera: &Camera,
    ) -> Option<Isometry3<f64>> {
        (**self).solve_pnp(object_points, image_points, camera)
    }
}

/// `sqrt(sum |r|^2 / N)` over every point of every view.
///
/// Points that fall behind the camera count with the residual of their
/// observation against the principal point.
pub fn reprojection_rms(
    camera: &Camera,
    poses: &[Isometry3<f64>],
    views: &[PointDetection],
) -> f64 {
    let mut sum = 0.0;
    let mut count = 0usize;
    for (pose, view) in poses.iter().zip(views) {
        for (obj, img) in view.object_points.iter().zip(&view.image_points) {
            let proj = camera.project(pose, obj).unwrap_or(Point2::new(
                camera.intrinsics.cx,
                camera.intrinsics.cy,
            ));
            sum += (proj - img).norm_squared();
            count += 1;
        }
    }
    if count == 0 {
        0.0
    } else {
        (sum / count as f64).sqrt()
    }
}
