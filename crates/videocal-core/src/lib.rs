//! Core types shared by the `videocal` crates.
//!
//! Camera model (pinhole + Brown-Conrady), plane homographies, frame
//! utilities and the two capability seams the drivers are generic over:
//! [`PointDetector`] and the [`CalibrationSolver`] / [`PoseSolver`] pair.

mod camera;
mod detection;
mod frame;
mod homography;
mod logger;
mod solve;

pub use camera::{BrownConrady5, Camera, CameraIntrinsics};
pub use detection::{PointDetection, PointDetector};
pub use frame::{sample_bilinear_rgb, undistort_frame, Frame};
pub use homography::{estimate_homography, normalize_points, null_vector, Homography};
pub use solve::{reprojection_rms, CalibrationResult, CalibrationSolver, PoseSolver, SolveError};

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::{init_with_level, level_from_verbosity};
