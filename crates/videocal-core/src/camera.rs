use nalgebra::{Isometry3, Matrix3, Point2, Point3, Vector2};
use serde::{Deserialize, Serialize};

/// Pinhole intrinsics without skew.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
}

impl CameraIntrinsics {
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64) -> Self {
        Self { fx, fy, cx, cy }
    }

    /// Identity camera matrix, used when no calibration is available.
    pub fn identity() -> Self {
        Self::new(1.0, 1.0, 0.0, 0.0)
    }

    pub fn matrix(&self) -> Matrix3<f64> {
        Matrix3::new(
            self.fx, 0.0, self.cx, //
            0.0, self.fy, self.cy, //
            0.0, 0.0, 1.0,
        )
    }

    /// Read focal lengths and principal point from a 3x3 camera matrix.
    ///
    /// The skew term and the bottom row are ignored.
    pub fn from_matrix(k: &Matrix3<f64>) -> Self {
        Self::new(k[(0, 0)], k[(1, 1)], k[(0, 2)], k[(1, 2)])
    }

    pub fn is_invertible(&self) -> bool {
        self.fx.abs() > 1e-12 && self.fy.abs() > 1e-12
    }

    #[inline]
    pub fn normalize(&self, pixel: Point2<f64>) -> Vector2<f64> {
        Vector2::new((pixel.x - self.cx) / self.fx, (pixel.y - self.cy) / self.fy)
    }

    #[inline]
    pub fn denormalize(&self, n: Vector2<f64>) -> Point2<f64> {
        Point2::new(self.fx * n.x + self.cx, self.fy * n.y + self.cy)
    }
}

/// Brown-Conrady lens distortion in the `[k1, k2, p1, p2, k3]` coefficient order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BrownConrady5 {
    pub k1: f64,
    pub k2: f64,
    pub p1: f64,
    pub p2: f64,
    pub k3: f64,
}

impl BrownConrady5 {
    const UNDISTORT_ITERS: usize = 10;

    pub fn zero() -> Self {
        Self::default()
    }

    pub fn to_array(&self) -> [f64; 5] {
        [self.k1, self.k2, self.p1, self.p2, self.k3]
    }

    /// Build from a coefficient slice; missing trailing coefficients are zero.
    pub fn from_slice(coeffs: &[f64]) -> Self {
        let at = |i: usize| coeffs.get(i).copied().unwrap_or(0.0);
        Self {
            k1: at(0),
            k2: at(1),
            p1: at(2),
            p2: at(3),
            k3: at(4),
        }
    }

    pub fn is_zero(&self) -> bool {
        self.to_array().iter().all(|c| *c == 0.0)
    }

    /// Apply distortion to a normalized (z = 1) image point.
    pub fn distort(&self, n: Vector2<f64>) -> Vector2<f64> {
        let (x, y) = (n.x, n.y);
        let r2 = x * x + y * y;
        let radial = 1.0 + r2 * (self.k1 + r2 * (self.k2 + r2 * self.k3));
        let xy = x * y;
        let x_tan = 2.0 * self.p1 * xy + self.p2 * (r2 + 2.0 * x * x);
        let y_tan = self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * xy;
        Vector2::new(x * radial + x_tan, y * radial + y_tan)
    }

    /// Fixed-point inversion of [`BrownConrady5::distort`].
    pub fn undistort(&self, n_dist: Vector2<f64>) -> Vector2<f64> {
        let mut n = n_dist;
        for _ in 0..Self::UNDISTORT_ITERS {
            let err = self.distort(n) - n_dist;
            n -= err;
        }
        n
    }
}

/// Intrinsics plus distortion.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Camera {
    pub intrinsics: CameraIntrinsics,
    pub distortion: BrownConrady5,
}

impl Camera {
    pub fn new(intrinsics: CameraIntrinsics, distortion: BrownConrady5) -> Self {
        Self {
            intrinsics,
            distortion,
        }
    }

    /// Same intrinsics, distortion dropped.
    pub fn pinhole(&self) -> Self {
        Self::new(self.intrinsics, BrownConrady5::zero())
    }

    /// Project a point given in the camera frame. `None` behind the camera.
    pub fn project_camera_point(&self, p: &Point3<f64>) -> Option<Point2<f64>> {
        if p.z <= 1e-12 {
            return None;
        }
        let n = Vector2::new(p.x / p.z, p.y / p.z);
        Some(self.intrinsics.denormalize(self.distortion.distort(n)))
    }

    /// Project a board point through the board-to-camera pose.
    pub fn project(&self, pose: &Isometry3<f64>, p: &Point3<f64>) -> Option<Point2<f64>> {
        self.project_camera_point(&pose.transform_point(p))
    }

    /// Remove distortion from an observed pixel, returning the ideal pixel.
    pub fn undistort_pixel(&self, pixel: Point2<f64>) -> Point2<f64> {
        let n = self.intrinsics.normalize(pixel);
        self.intrinsics.denormalize(self.distortion.undistort(n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::{Translation3, UnitQuaternion, Vector3};

    fn camera() -> Camera {
        Camera::new(
            CameraIntrinsics::new(800.0, 780.0, 320.0, 240.0),
            BrownConrady5 {
                k1: -0.2,
                k2: 0.05,
                p1: 0.001,
                p2: -0.0005,
                k3: 0.0,
            },
        )
    }

    #[test]
    fn undistort_inverts_distort() {
        let cam = camera();
        for n in [
            Vector2::new(0.0, 0.0),
            Vector2::new(0.2, -0.1),
            Vector2::new(-0.3, 0.25),
        ] {
            let back = cam.distortion.undistort(cam.distortion.distort(n));
            assert_relative_eq!(back, n, epsilon = 1e-8);
        }
    }

    #[test]
    fn projects_optical_axis_to_principal_point() {
        let cam = camera();
        let pose = Isometry3::from_parts(
            Translation3::new(0.0, 0.0, 500.0),
            UnitQuaternion::identity(),
        );
        let p = cam.project(&pose, &Point3::origin()).expect("in front");
        assert_relative_eq!(p.x, 320.0, epsilon = 1e-9);
        assert_relative_eq!(p.y, 240.0, epsilon = 1e-9);
    }

    #[test]
    fn points_behind_camera_do_not_project() {
        let cam = camera();
        assert!(cam
            .project_camera_point(&Point3::from(Vector3::new(0.0, 0.0, -1.0)))
            .is_none());
    }

    #[test]
    fn coefficients_keep_opencv_order() {
        let d = BrownConrady5::from_slice(&[0.1, 0.2, 0.3, 0.4]);
        assert_eq!([0.1, 0.2, 0.3, 0.4, 0.0], d.to_array());
    }
}
