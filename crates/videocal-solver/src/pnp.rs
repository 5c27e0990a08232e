use crate::calibrate::{is_planar, plane_coords};
use crate::lm::{refine_pose, LmOptions};
use crate::planar_pose::pose_from_homography;
use log::debug;
use nalgebra::{Isometry3, Point2, Point3};
use videocal_core::{estimate_homography, Camera, PoseSolver};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Pose of a planar (`z = 0`) target: homography decomposition followed by
/// Levenberg-Marquardt on the reprojection error.
#[derive(Clone, Debug, Default)]
pub struct PlanarPnp {
    pub lm: LmOptions,
}

impl PlanarPnp {
    pub const MIN_POINTS: usize = 4;

    pub fn new(lm: LmOptions) -> Self {
        Self { lm }
    }
}

impl PoseSolver for PlanarPnp {
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip_all, fields(points = image_points.len()))
    )]
    fn solve_pnp(
        &self,
        object_points: &[Point3<f64>],
        image_points: &[Point2<f64>],
        camera: &Camera,
    ) -> Option<Isometry3<f64>> {
        if object_points.len() != image_points.len() || image_points.len() < Self::MIN_POINTS {
            return None;
        }
        if !is_planar(object_points) {
            debug!("PnP target is not planar");
            return None;
        }
        if !camera.intrinsics.is_invertible() {
            return None;
        }

        let ideal: Vec<Point2<f64>> = image_points
            .iter()
            .map(|p| camera.undistort_pixel(*p))
            .collect();
        let h = estimate_homography(&plane_coords(object_points), &ideal)?;
        let initial = pose_from_homography(&camera.intrinsics.matrix(), &h.h)?;
        let pose = refine_pose(camera, &initial, object_points, image_points, &self.lm);

        let finite = pose.translation.vector.iter().all(|x| x.is_finite())
            && pose.rotation.coords.iter().all(|x| x.is_finite());
        let in_front = object_points
            .iter()
            .all(|p| pose.transform_point(p).z > 0.0);
        (finite && in_front).then_some(pose)
    }
}
