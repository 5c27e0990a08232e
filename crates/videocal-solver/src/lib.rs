//! Planar camera calibration and pose estimation for `videocal`.
//!
//! - [`ZhangCalibrator`]: per-view homographies, closed-form intrinsics,
//!   planar poses and a linear radial distortion guess, refined jointly by
//!   Levenberg-Marquardt.
//! - [`PlanarPnp`]: pose of a planar target with known intrinsics.

mod calibrate;
mod distortion_fit;
mod lm;
mod planar_pose;
mod pnp;
mod zhang;

pub use calibrate::ZhangCalibrator;
pub use distortion_fit::fit_radial_distortion;
pub use lm::{refine_calibration, refine_pose, BundleOutcome, LmOptions};
pub use planar_pose::pose_from_homography;
pub use pnp::PlanarPnp;
pub use zhang::intrinsics_from_homographies;
