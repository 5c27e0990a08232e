//! Camera calibration from live or recorded video.
//!
//! Two drivers share one frame-grabbing core ([`VideoDriver`]):
//!
//! - [`CalibrationDriver`] accumulates chessboard views, solves for
//!   intrinsics and distortion once `minimum number of views` have been
//!   collected (and again on every later view), and optionally writes the
//!   views and results as plain-text matrices.
//! - [`CalibrationCheckerDriver`] loads a saved calibration, undistorts each
//!   frame, solves the board pose and reports translation deltas and
//!   mean/standard-deviation statistics on request.
//!
//! [`BatchController`] samples every Nth frame until the source runs dry;
//! [`InteractiveController`] processes frames only when a [`Trigger`] is
//! posted to its [`TriggerInbox`].
//!
//! ## Quickstart
//!
//! ```no_run
//! use videocal::{
//!     validate_source, BatchController, CalibrationConfig, CalibrationDriver, NoDevices,
//!     OutputLocation, SourceArg,
//! };
//!
//! let config = CalibrationConfig::load("config/video_chessboard_conf.json")?;
//! let spec = validate_source(Some(SourceArg::Text("frames/")))?;
//! let output = OutputLocation::new(Some("calibration".into()), None);
//! let driver = CalibrationDriver::open(&config, &spec, &NoDevices, output)?;
//! let summary = BatchController::new(driver).run()?;
//! println!("{} frames processed", summary.frames_processed);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod accumulator;
mod checker;
mod config;
mod controller;
mod driver;
mod persist;
mod source;

pub use accumulator::{CalibrationAccumulator, CalibrationDriver, ViewSample};
pub use checker::{CalibrationChecker, CalibrationCheckerDriver, CapturedPositionLog};
pub use config::{CalibrationConfig, ConfigError, ValidatedConfig, CHESSBOARD_METHOD};
pub use controller::{
    BatchController, BatchSummary, ControllerState, FrameSink, InteractiveController, NullSink,
    TriggerInbox,
};
pub use driver::{DriverError, FrameOutcome, FrameProcessor, FrameReport, Trigger, VideoDriver};
pub use persist::{
    format_matrix, parse_matrix, prefixed_name, read_matrix, save_params, save_view,
    write_matrix, ExistingCalibration, OutputLocation, PersistError,
};
pub use source::{
    validate_source, Capture, DeviceBackend, FrameSource, ImageSequence, NoDevices, SourceArg,
    SourceError, SourceSpec,
};

pub use videocal_chessboard::{ChessboardParams, ChessboardPointDetector};
pub use videocal_core::{
    init_with_level, level_from_verbosity, BrownConrady5, CalibrationResult, CalibrationSolver,
    Camera, CameraIntrinsics, Frame, PointDetection, PointDetector, PoseSolver, SolveError,
};
pub use videocal_solver::{PlanarPnp, ZhangCalibrator};

#[cfg(feature = "tracing")]
pub use videocal_core::init_tracing;
