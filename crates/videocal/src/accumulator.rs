//! Calibration accumulator: collect views, solve once enough are in, and
//! persist the results.

use crate::config::{CalibrationConfig, ValidatedConfig};
use crate::driver::{DriverError, FrameOutcome, FrameProcessor, FrameReport, Trigger, VideoDriver};
use crate::persist::{save_params, save_view, OutputLocation, PersistError};
use crate::source::{DeviceBackend, FrameSource, SourceSpec};
use log::{info, warn};
use videocal_chessboard::{ChessboardParams, ChessboardPointDetector};
use videocal_core::{CalibrationResult, CalibrationSolver, Frame, PointDetection, PointDetector};
use videocal_solver::ZhangCalibrator;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// One accumulated view, borrowed from the accumulator.
#[derive(Clone, Copy, Debug)]
pub struct ViewSample<'a> {
    pub index: usize,
    pub detection: &'a PointDetection,
    /// Source frame, kept only when an output location is configured.
    pub frame: Option<&'a Frame>,
}

pub struct CalibrationAccumulator {
    detector: Box<dyn PointDetector>,
    solver: Box<dyn CalibrationSolver>,
    minimum_number_of_views: usize,
    output: Option<OutputLocation>,
    views: Vec<PointDetection>,
    frames: Vec<Option<Frame>>,
    image_size: (u32, u32),
    latest: Option<CalibrationResult>,
    solve_count: usize,
}

impl std::fmt::Debug for CalibrationAccumulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CalibrationAccumulator")
            .field("minimum_number_of_views", &self.minimum_number_of_views)
            .field("output", &self.output)
            .field("views", &self.views.len())
            .field("solve_count", &self.solve_count)
            .finish()
    }
}

impl CalibrationAccumulator {
    /// Chessboard detector and Zhang solver sized from `config`.
    pub fn new(config: &ValidatedConfig, output: Option<OutputLocation>) -> Self {
        let params = ChessboardParams::new(config.cols, config.rows, config.square_size_mm);
        Self {
            detector: Box::new(ChessboardPointDetector::new(params)),
            solver: Box::new(ZhangCalibrator::default()),
            minimum_number_of_views: config.minimum_number_of_views,
            output,
            views: Vec::new(),
            frames: Vec::new(),
            image_size: (0, 0),
            latest: None,
            solve_count: 0,
        }
    }

    pub fn num_views(&self) -> usize {
        self.views.len()
    }

    pub fn views(&self) -> impl Iterator<Item = ViewSample<'_>> + '_ {
        self.views
            .iter()
            .zip(&self.frames)
            .enumerate()
            .map(|(index, (detection, frame))| ViewSample {
                index,
                detection,
                frame: frame.as_ref(),
            })
    }

    /// Most recent successful solve.
    pub fn latest_result(&self) -> Option<&CalibrationResult> {
        self.latest.as_ref()
    }

    pub fn solve_count(&self) -> usize {
        self.solve_count
    }

    pub fn output(&self) -> Option<&OutputLocation> {
        self.output.as_ref()
    }

    fn persist(
        &self,
        output: &OutputLocation,
        result: &CalibrationResult,
    ) -> Result<(), PersistError> {
        output.ensure_dir()?;
        for sample in self.views() {
            if let Some(extrinsic) = result.extrinsics.get(sample.index) {
                save_view(output, sample.index, sample.detection, extrinsic, sample.frame)?;
            }
        }
        save_params(output, &result.camera)?;
        info!(
            "saved {} views and calibration to {}",
            self.views.len(),
            output.dir.display()
        );
        Ok(())
    }

    fn solve(&mut self) -> Result<Option<FrameReport>, DriverError> {
        let result = match self.solver.calibrate(&self.views, self.image_size) {
            Ok(result) => result,
            Err(err) => {
                warn!("calibration with {} views failed: {err}", self.views.len());
                return Ok(None);
            }
        };
        self.solve_count += 1;

        info!("reprojection (2D) error is: {:.6}", result.rms);
        info!("intrinsics are:{}", result.camera.intrinsics.matrix());
        info!("distortion matrix is: {:?}", result.camera.distortion.to_array());

        if let Some(output) = &self.output {
            self.persist(output, &result)?;
        }

        let report = FrameReport::Calibrated {
            views: result.num_views(),
            rms: result.rms,
        };
        self.latest = Some(result);
        Ok(Some(report))
    }
}

impl FrameProcessor for CalibrationAccumulator {
    #[cfg_attr(feature = "tracing", instrument(level = "info", skip_all))]
    fn process(
        &mut self,
        frame: &Frame,
        _trigger: Option<Trigger>,
    ) -> Result<FrameOutcome, DriverError> {
        let detection = match self.detector.get_points(frame) {
            Some(d) if !d.is_empty() => d,
            _ => {
                info!("failed to detect points");
                return Ok(FrameOutcome::empty());
            }
        };

        let num_points = detection.len();
        let mut annotated = frame.clone();
        self.detector.draw_points(&mut annotated, &detection);

        self.views.push(detection);
        self.frames.push(self.output.as_ref().map(|_| frame.clone()));
        self.image_size = frame.dimensions();
        info!("number of views = {}", self.views.len());

        let mut reports = Vec::new();
        if self.views.len() >= self.minimum_number_of_views {
            reports.extend(self.solve()?);
        }

        Ok(FrameOutcome {
            num_points,
            annotated: Some(annotated),
            reports,
        })
    }
}

/// Video driver that accumulates calibration views.
pub type CalibrationDriver = VideoDriver<CalibrationAccumulator>;

impl VideoDriver<CalibrationAccumulator> {
    /// Validates `config` and wraps an opened source.
    pub fn new(
        config: &CalibrationConfig,
        source: FrameSource,
        output: Option<OutputLocation>,
    ) -> Result<Self, DriverError> {
        let config = config.validate()?;
        info!(
            "minimum number of views to calibrate: {}",
            config.minimum_number_of_views
        );
        let accumulator = CalibrationAccumulator::new(&config, output);
        Ok(Self::from_parts(config, source, accumulator))
    }

    /// Validates `config`, then opens `spec`.
    pub fn open(
        config: &CalibrationConfig,
        spec: &SourceSpec,
        devices: &dyn DeviceBackend,
        output: Option<OutputLocation>,
    ) -> Result<Self, DriverError> {
        let valid = config.validate()?;
        let source = FrameSource::open(spec, valid.window_size, devices)?;
        Self::new(config, source, output)
    }

    pub fn with_detector(mut self, detector: impl PointDetector + 'static) -> Self {
        self.processor.detector = Box::new(detector);
        self
    }

    pub fn with_solver(mut self, solver: impl CalibrationSolver + 'static) -> Self {
        self.processor.solver = Box::new(solver);
        self
    }

    /// Detect points on the last grabbed frame and solve when enough views
    /// have been collected.
    pub fn extract_points(&mut self) -> Result<FrameOutcome, DriverError> {
        self.process_frame(None)
    }

    pub fn accumulator(&self) -> &CalibrationAccumulator {
        &self.processor
    }
}
