//! Calibration checker: undistort with a saved calibration, solve the board
//! pose per frame and report how far the board moved.
//!
//! Moving a chessboard by a known amount (say 5 mm) and comparing that with
//! the reported translation gives a quick accuracy check of an existing
//! calibration.

use crate::config::CalibrationConfig;
use crate::driver::{DriverError, FrameOutcome, FrameProcessor, FrameReport, Trigger, VideoDriver};
use crate::persist::ExistingCalibration;
use crate::source::{DeviceBackend, FrameSource, SourceSpec};
use log::{info, warn};
use nalgebra::Vector3;
use std::path::Path;
use videocal_chessboard::{ChessboardParams, ChessboardPointDetector};
use videocal_core::{undistort_frame, Frame, PointDetector, PoseSolver};
use videocal_solver::PlanarPnp;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Append-only board positions, one per successful pose solve.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CapturedPositionLog {
    entries: Vec<Vector3<f64>>,
}

impl CapturedPositionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, position: Vector3<f64>) {
        self.entries.push(position);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[Vector3<f64>] {
        &self.entries
    }

    pub fn last(&self) -> Option<&Vector3<f64>> {
        self.entries.last()
    }

    /// Last entry minus the one before it.
    pub fn last_delta(&self) -> Option<Vector3<f64>> {
        match self.entries.as_slice() {
            [.., previous, last] => Some(last - previous),
            _ => None,
        }
    }

    pub fn mean(&self) -> Option<Vector3<f64>> {
        if self.entries.is_empty() {
            return None;
        }
        let sum: Vector3<f64> = self.entries.iter().sum();
        Some(sum / self.entries.len() as f64)
    }

    /// Per-axis population standard deviation.
    pub fn std_dev(&self) -> Option<Vector3<f64>> {
        let mean = self.mean()?;
        let n = self.entries.len() as f64;
        let var = self
            .entries
            .iter()
            .map(|p| (p - mean).component_mul(&(p - mean)))
            .sum::<Vector3<f64>>()
            / n;
        Some(var.map(f64::sqrt))
    }
}

pub struct CalibrationChecker {
    detector: Box<dyn PointDetector>,
    pose_solver: Box<dyn PoseSolver>,
    calibration: ExistingCalibration,
    corner_count: usize,
    positions: CapturedPositionLog,
}

impl std::fmt::Debug for CalibrationChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CalibrationChecker")
            .field("calibration", &self.calibration)
            .field("corner_count", &self.corner_count)
            .field("positions", &self.positions.len())
            .finish()
    }
}

impl CalibrationChecker {
    pub fn new(params: ChessboardParams, calibration: ExistingCalibration) -> Self {
        Self {
            corner_count: params.corner_count(),
            detector: Box::new(ChessboardPointDetector::new(params)),
            pose_solver: Box::new(PlanarPnp::default()),
            calibration,
            positions: CapturedPositionLog::new(),
        }
    }

    pub fn calibration(&self) -> &ExistingCalibration {
        &self.calibration
    }

    pub fn positions(&self) -> &CapturedPositionLog {
        &self.positions
    }

    fn report(&self, trigger: Option<Trigger>) -> Option<FrameReport> {
        match trigger? {
            Trigger::Translation => {
                let d = self.positions.last_delta()?;
                info!("translation: {:.6} {:.6} {:.6}", d.x, d.y, d.z);
                Some(FrameReport::Translation(d))
            }
            Trigger::MeanStdDev => {
                let mean = self.positions.mean()?;
                let std_dev = self.positions.std_dev()?;
                info!("mean: {:.6} {:.6} {:.6}", mean.x, mean.y, mean.z);
                info!("std dev: {:.6} {:.6} {:.6}", std_dev.x, std_dev.y, std_dev.z);
                Some(FrameReport::Statistics { mean, std_dev })
            }
            Trigger::Capture => {
                let p = *self.positions.last()?;
                info!("pose: {:.6} {:.6} {:.6}", p.x, p.y, p.z);
                Some(FrameReport::Position(p))
            }
            Trigger::Quit => None,
        }
    }
}

impl FrameProcessor for CalibrationChecker {
    #[cfg_attr(feature = "tracing", instrument(level = "info", skip_all))]
    fn process(
        &mut self,
        frame: &Frame,
        trigger: Option<Trigger>,
    ) -> Result<FrameOutcome, DriverError> {
        let mut undistorted = undistort_frame(frame, &self.calibration.camera);

        let detection = match self.detector.get_points(&undistorted) {
            Some(d) if !d.is_empty() => d,
            _ => {
                info!("failed to detect points");
                return Ok(FrameOutcome::empty());
            }
        };

        // Full-board count, not the detector's raw count.
        let num_points = self.corner_count;
        self.detector.draw_points(&mut undistorted, &detection);

        // The frame is already undistorted.
        let pinhole = self.calibration.camera.pinhole();
        let Some(pose) = self.pose_solver.solve_pnp(
            &detection.object_points,
            &detection.image_points,
            &pinhole,
        ) else {
            warn!("failed to solve PnP");
            return Ok(FrameOutcome {
                num_points,
                annotated: Some(undistorted),
                reports: Vec::new(),
            });
        };

        self.positions.push(pose.translation.vector);

        Ok(FrameOutcome {
            num_points,
            annotated: Some(undistorted),
            reports: self.report(trigger).into_iter().collect(),
        })
    }
}

/// Video driver that checks an existing calibration.
pub type CalibrationCheckerDriver = VideoDriver<CalibrationChecker>;

fn check_calibration_dir(dir: Option<&Path>) -> Result<&Path, DriverError> {
    let dir = dir.ok_or_else(|| DriverError::CalibrationDir("must be given".into()))?;
    if dir.as_os_str().is_empty() {
        return Err(DriverError::CalibrationDir("is an empty string".into()));
    }
    if !dir.is_dir() {
        return Err(DriverError::CalibrationDir(format!(
            "{} is not a directory",
            dir.display()
        )));
    }
    Ok(dir)
}

impl VideoDriver<CalibrationChecker> {
    /// Validates `config` and the calibration directory, loads the saved
    /// calibration and wraps an opened source.
    pub fn new(
        config: &CalibrationConfig,
        source: FrameSource,
        calibration_dir: Option<&Path>,
        prefix: Option<&str>,
    ) -> Result<Self, DriverError> {
        let config = config.validate()?;
        let dir = check_calibration_dir(calibration_dir)?;
        let calibration = ExistingCalibration::load(dir, prefix);
        let params = ChessboardParams::new(config.cols, config.rows, config.square_size_mm);
        let checker = CalibrationChecker::new(params, calibration);
        Ok(Self::from_parts(config, source, checker))
    }

    /// Validates `config` and the calibration directory before opening `spec`.
    pub fn open(
        config: &CalibrationConfig,
        spec: &SourceSpec,
        devices: &dyn DeviceBackend,
        calibration_dir: Option<&Path>,
        prefix: Option<&str>,
    ) -> Result<Self, DriverError> {
        let valid = config.validate()?;
        check_calibration_dir(calibration_dir)?;
        let source = FrameSource::open(spec, valid.window_size, devices)?;
        Self::new(config, source, calibration_dir, prefix)
    }

    pub fn with_detector(mut self, detector: impl PointDetector + 'static) -> Self {
        self.processor.detector = Box::new(detector);
        self
    }

    pub fn with_pose_solver(mut self, solver: impl PoseSolver + 'static) -> Self {
        self.processor.pose_solver = Box::new(solver);
        self
    }

    pub fn checker(&self) -> &CalibrationChecker {
        &self.processor
    }
}
