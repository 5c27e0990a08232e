//! Frame grabbing shared by the calibration and checking drivers.
//!
//! [`VideoDriver`] owns the frame source and the most recent frame and hands
//! that frame to a [`FrameProcessor`]: the calibration accumulator or the
//! calibration checker.

use crate::config::{ConfigError, ValidatedConfig};
use crate::persist::PersistError;
use crate::source::{FrameSource, SourceError};
use log::{error, info};
use nalgebra::Vector3;
use videocal_core::Frame;

#[derive(thiserror::Error, Debug)]
pub enum DriverError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Persist(#[from] PersistError),
    #[error("calibration dir {0}")]
    CalibrationDir(String),
    #[error("no frame has been grabbed")]
    NoFrame,
}

/// Operator request delivered to a running driver.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Trigger {
    /// `c`: capture the current frame.
    Capture,
    /// `t`: report the translation since the previous pose.
    Translation,
    /// `m`: report mean and standard deviation of all poses.
    MeanStdDev,
    /// `q`: stop the session.
    Quit,
}

impl Trigger {
    pub fn from_key(key: char) -> Option<Self> {
        match key {
            'c' => Some(Self::Capture),
            't' => Some(Self::Translation),
            'm' => Some(Self::MeanStdDev),
            'q' => Some(Self::Quit),
            _ => None,
        }
    }

    pub fn key(self) -> char {
        match self {
            Self::Capture => 'c',
            Self::Translation => 't',
            Self::MeanStdDev => 'm',
            Self::Quit => 'q',
        }
    }
}

/// Measurement emitted while processing a frame.
#[derive(Clone, Debug, PartialEq)]
pub enum FrameReport {
    /// A calibration solve over `views` views finished.
    Calibrated { views: usize, rms: f64 },
    /// Latest position minus the previous one, in millimetres.
    Translation(Vector3<f64>),
    /// Per-axis mean and population standard deviation of all positions.
    Statistics {
        mean: Vector3<f64>,
        std_dev: Vector3<f64>,
    },
    /// Latest board position in the camera frame.
    Position(Vector3<f64>),
}

/// Result of processing one frame.
#[derive(Clone, Debug, Default)]
pub struct FrameOutcome {
    pub num_points: usize,
    pub annotated: Option<Frame>,
    pub reports: Vec<FrameReport>,
}

impl FrameOutcome {
    /// No points found.
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Per-frame work plugged into a [`VideoDriver`].
pub trait FrameProcessor {
    fn process(
        &mut self,
        frame: &Frame,
        trigger: Option<Trigger>,
    ) -> Result<FrameOutcome, DriverError>;
}

/// Frame source plus a frame processor.
#[derive(Debug)]
pub struct VideoDriver<P> {
    pub(crate) source: Option<FrameSource>,
    pub(crate) frame: Option<Frame>,
    pub(crate) processor: P,
    pub(crate) config: ValidatedConfig,
}

impl<P: FrameProcessor> VideoDriver<P> {
    pub fn from_parts(config: ValidatedConfig, source: FrameSource, processor: P) -> Self {
        Self {
            source: Some(source),
            frame: None,
            processor,
            config,
        }
    }

    /// Read the next frame. `None` at end of stream, on a read failure, or
    /// after [`shutdown`](Self::shutdown).
    pub fn grab_frame(&mut self) -> Option<&Frame> {
        let Some(source) = self.source.as_mut() else {
            error!("grab_frame called after shutdown");
            self.frame = None;
            return None;
        };
        self.frame = source.read();
        if self.frame.is_none() {
            info!("reached end of video source or read failure");
        }
        self.frame.as_ref()
    }

    /// Run the processor on the last grabbed frame.
    pub fn process_frame(&mut self, trigger: Option<Trigger>) -> Result<FrameOutcome, DriverError> {
        let frame = self.frame.as_ref().ok_or(DriverError::NoFrame)?;
        self.processor.process(frame, trigger)
    }

    pub fn current_frame(&self) -> Option<&Frame> {
        self.frame.as_ref()
    }

    /// True when no more frames can arrive: the source ended or was released.
    pub fn source_exhausted(&self) -> bool {
        self.source.as_ref().is_none_or(FrameSource::is_exhausted)
    }

    pub fn is_shut_down(&self) -> bool {
        self.source.is_none()
    }

    /// Release the frame source. Later calls do nothing.
    pub fn shutdown(&mut self) {
        if let Some(source) = self.source.take() {
            source.close();
            info!("video source released");
        }
    }

    pub fn config(&self) -> &ValidatedConfig {
        &self.config
    }

    pub fn processor(&self) -> &P {
        &self.processor
    }

    pub fn processor_mut(&mut self) -> &mut P {
        &mut self.processor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CalibrationConfig;
    use crate::source::Capture;
    use image::RgbImage;

    struct Counted {
        left: usize,
    }

    impl Capture for Counted {
        fn read(&mut self) -> Option<Frame> {
            if self.left == 0 {
                return None;
            }
            self.left -= 1;
            Some(RgbImage::new(4, 3))
        }

        fn frame_size(&self) -> (u32, u32) {
            (4, 3)
        }

        fn is_exhausted(&self) -> bool {
            self.left == 0
        }

        fn describe(&self) -> String {
            "counted".into()
        }
    }

    #[derive(Default)]
    struct Echo {
        calls: Vec<Option<Trigger>>,
    }

    impl FrameProcessor for Echo {
        fn process(
            &mut self,
            frame: &Frame,
            trigger: Option<Trigger>,
        ) -> Result<FrameOutcome, DriverError> {
            self.calls.push(trigger);
            Ok(FrameOutcome {
                num_points: frame.width() as usize,
                ..FrameOutcome::empty()
            })
        }
    }

    fn driver(frames: usize) -> VideoDriver<Echo> {
        let config = CalibrationConfig::default().validate().unwrap();
        let source = FrameSource::from_capture(Box::new(Counted { left: frames }), None);
        VideoDriver::from_parts(config, source, Echo::default())
    }

    #[test]
    fn trigger_keys() {
        for key in ['c', 't', 'm', 'q'] {
            assert_eq!(Trigger::from_key(key).unwrap().key(), key);
        }
        assert_eq!(Trigger::from_key('x'), None);
    }

    #[test]
    fn process_needs_a_frame() {
        let mut d = driver(1);
        assert!(matches!(d.process_frame(None), Err(DriverError::NoFrame)));
        assert!(d.grab_frame().is_some());
        let outcome = d.process_frame(Some(Trigger::Capture)).unwrap();
        assert_eq!(outcome.num_points, 4);
        assert_eq!(d.processor().calls, vec![Some(Trigger::Capture)]);
    }

    #[test]
    fn grabs_until_exhausted_then_shuts_down_once() {
        let mut d = driver(2);
        assert!(d.grab_frame().is_some());
        assert!(d.grab_frame().is_some());
        assert!(d.source_exhausted());
        assert!(d.grab_frame().is_none());
        assert!(d.current_frame().is_none());

        d.shutdown();
        d.shutdown();
        assert!(d.is_shut_down());
        assert!(d.grab_frame().is_none());
    }
}
