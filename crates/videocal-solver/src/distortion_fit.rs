//! Linear radial distortion initialisation (Zhang, section 3.3).
//!
//! With intrinsics and poses fixed, the observed offset from the ideal
//! pinhole projection is linear in `k1`, `k2`.

use nalgebra::{Isometry3, Matrix2, Vector2};
use videocal_core::{BrownConrady5, CameraIntrinsics, PointDetection};

pub fn fit_radial_distortion(
    k: &CameraIntrinsics,
    poses: &[Isometry3<f64>],
    views: &[PointDetection],
) -> BrownConrady5 {
    let mut ata = Matrix2::<f64>::zeros();
    let mut atb = Vector2::<f64>::zeros();

    for (pose, view) in poses.iter().zip(views) {
        for (obj, img) in view.object_points.iter().zip(&view.image_points) {
            let pc = pose.transform_point(obj);
            if pc.z <= 1e-12 {
                continue;
            }
            let (x, y) = (pc.x / pc.z, pc.y / pc.z);
            let r2 = x * x + y * y;
            let u = k.fx * x + k.cx;
            let v = k.fy * y + k.cy;

            for (row, rhs) in [
                (Vector2::new((u - k.cx) * r2, (u - k.cx) * r2 * r2), img.x - u),
                (Vector2::new((v - k.cy) * r2, (v - k.cy) * r2 * r2), img.y - v),
            ] {
                ata += row * row.transpose();
                atb += row * rhs;
            }
        }
    }

    match ata.try_inverse() {
        Some(inv) => {
            let sol = inv * atb;
            if sol.iter().all(|c| c.is_finite()) {
                BrownConrady5 {
                    k1: sol[0],
                    k2: sol[1],
                    ..BrownConrady5::zero()
                }
            } else {
                BrownConrady5::zero()
            }
        }
        None => BrownConrady5::zero(),
    }
}
