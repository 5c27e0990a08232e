use crate::distortion_fit::fit_radial_distortion;
use crate::lm::{refine_calibration, LmOptions};
use crate::planar_pose::pose_from_homography;
use crate::zhang::intrinsics_from_homographies;
use log::debug;
use nalgebra::{Matrix3, Point2, Point3};
use videocal_core::{
    estimate_homography, reprojection_rms, CalibrationResult, CalibrationSolver, Camera,
    CameraIntrinsics, PointDetection, SolveError,
};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Object points with `|z|` above this are treated as non-planar.
pub(crate) const PLANAR_EPS: f64 = 1e-6;

pub(crate) fn is_planar(points: &[Point3<f64>]) -> bool {
    points.iter().all(|p| p.z.abs() <= PLANAR_EPS)
}

pub(crate) fn plane_coords(points: &[Point3<f64>]) -> Vec<Point2<f64>> {
    points.iter().map(|p| Point2::new(p.x, p.y)).collect()
}

/// Planar-target calibration: Zhang initialisation refined by
/// Levenberg-Marquardt over intrinsics, `k1 k2 p1 p2` and all poses.
#[derive(Clone, Debug, Default)]
pub struct ZhangCalibrator {
    pub lm: LmOptions,
}

impl ZhangCalibrator {
    pub const MIN_VIEWS: usize = 2;
    pub const MIN_POINTS: usize = 4;

    pub fn new(lm: LmOptions) -> Self {
        Self { lm }
    }

    fn check_views(views: &[PointDetection]) -> Result<(), SolveError> {
        if views.len() < Self::MIN_VIEWS {
            return Err(SolveError::NotEnoughViews {
                required: Self::MIN_VIEWS,
                got: views.len(),
            });
        }
        for (view, det) in views.iter().enumerate() {
            let got = det.image_points.len().min(det.object_points.len());
            if got < Self::MIN_POINTS {
                return Err(SolveError::NotEnoughPoints {
                    view,
                    required: Self::MIN_POINTS,
                    got,
                });
            }
            if !is_planar(&det.object_points) {
                return Err(SolveError::NonPlanarTarget { view });
            }
        }
        Ok(())
    }
}

/// Focal lengths outside `[MIN, MAX] * image scale` are rejected.
const MIN_FOCAL_SCALE: f64 = 0.05;
const MAX_FOCAL_SCALE: f64 = 50.0;

fn check_focal(k: &CameraIntrinsics, scale: f64) -> Result<(), SolveError> {
    let range = MIN_FOCAL_SCALE * scale..=MAX_FOCAL_SCALE * scale;
    let sane = |f: f64| f.is_finite() && range.contains(&f);
    if sane(k.fx) && sane(k.fy) {
        Ok(())
    } else {
        Err(SolveError::Degenerate(format!(
            "implausible focal length fx={:.3e} fy={:.3e} for image scale {scale:.0}",
            k.fx, k.fy
        )))
    }
}

/// Maps pixels to roughly unit scale around the image centre.
fn pixel_normalization(image_size: (u32, u32), views: &[PointDetection]) -> Matrix3<f64> {
    let (w, h) = (image_size.0 as f64, image_size.1 as f64);
    let (cx, cy, s) = if w > 0.0 && h > 0.0 {
        (w / 2.0, h / 2.0, (w + h) / 2.0)
    } else {
        let pts = views.iter().flat_map(|v| v.image_points.iter());
        let (min_x, max_x, min_y, max_y) = pts.fold(
            (f64::MAX, f64::MIN, f64::MAX, f64::MIN),
            |(a, b, c, d), p| (a.min(p.x), b.max(p.x), c.min(p.y), d.max(p.y)),
        );
        let s = ((max_x - min_x) + (max_y - min_y)).max(1.0) / 2.0;
        ((min_x + max_x) / 2.0, (min_y + max_y) / 2.0, s)
    };
    Matrix3::new(1.0 / s, 0.0, -cx / s, 0.0, 1.0 / s, -cy / s, 0.0, 0.0, 1.0)
}

impl CalibrationSolver for ZhangCalibrator {
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip(self, views), fields(views = views.len()))
    )]
    fn calibrate(
        &self,
        views: &[PointDetection],
        image_size: (u32, u32),
    ) -> Result<CalibrationResult, SolveError> {
        Self::check_views(views)?;

        let n = pixel_normalization(image_size, views);
        let n_inv = n
            .try_inverse()
            .ok_or_else(|| SolveError::Degenerate("pixel normalization".into()))?;

        let mut normalized_hs = Vec::with_capacity(views.len());
        for (view, det) in views.iter().enumerate() {
            let plane = plane_coords(&det.object_points);
            let img: Vec<Point2<f64>> = det
                .image_points
                .iter()
                .map(|p| n.transform_point(p))
                .collect();
            let h = estimate_homography(&plane, &img).ok_or(SolveError::Homography { view })?;
            normalized_hs.push(h.h);
        }

        let k_norm = intrinsics_from_homographies(&normalized_hs)?;
        let k = CameraIntrinsics::from_matrix(&(n_inv * k_norm.matrix()));
        debug!(
            "closed-form intrinsics fx={:.2} fy={:.2} cx={:.2} cy={:.2}",
            k.fx, k.fy, k.cx, k.cy
        );
        let scale = 1.0 / n[(0, 0)];
        check_focal(&k, scale)?;

        let kmat = k.matrix();
        let poses = normalized_hs
            .iter()
            .enumerate()
            .map(|(view, h)| {
                pose_from_homography(&kmat, &(n_inv * h)).ok_or_else(|| {
                    SolveError::Degenerate(format!("pose extraction failed for view {view}"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let distortion = fit_radial_distortion(&k, &poses, views);
        let initial = Camera::new(k, distortion);
        debug!(
            "initial rms {:.4}px",
            reprojection_rms(&initial, &poses, views)
        );

        let refined = refine_calibration(&initial, &poses, views, &self.lm);
        debug!(
            "refinement finished after {} evaluations (converged: {})",
            refined.evaluations, refined.converged
        );
        check_focal(&refined.camera.intrinsics, scale)?;

        let rms = reprojection_rms(&refined.camera, &refined.poses, views);
        if !rms.is_finite() {
            return Err(SolveError::Degenerate("refinement diverged".into()));
        }

        Ok(CalibrationResult {
            rms,
            camera: refined.camera,
            extrinsics: refined.poses,
        })
    }
}
