//! Frame sources: source specifier validation, capture backends and the
//! owning [`FrameSource`] handle.

use log::{debug, info, warn};
use serde_json::Value;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use videocal_core::Frame;

const IMAGE_EXTENSIONS: [&str; 6] = ["png", "jpg", "jpeg", "bmp", "tif", "tiff"];

#[derive(thiserror::Error, Debug)]
pub enum SourceError {
    #[error("invalid video source: {reason}")]
    InvalidSourceKind { reason: String },
    #[error("failed to open video source {spec}: {reason}")]
    OpenFailure { spec: SourceSpec, reason: String },
}

fn invalid(reason: impl Into<String>) -> SourceError {
    SourceError::InvalidSourceKind {
        reason: reason.into(),
    }
}

/// Unvalidated source argument as given on a command line or in JSON.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceArg<'a> {
    Index(i64),
    Text(&'a str),
}

impl<'a> TryFrom<&'a Value> for SourceArg<'a> {
    type Error = SourceError;

    fn try_from(value: &'a Value) -> Result<Self, Self::Error> {
        match value {
            Value::Number(n) => n
                .as_i64()
                .map(SourceArg::Index)
                .ok_or_else(|| invalid(format!("{n} is not an integer device index"))),
            Value::String(s) => Ok(SourceArg::Text(s)),
            Value::Null => Err(invalid("no source given")),
            other => Err(invalid(format!("{other} is neither a number nor a string"))),
        }
    }
}

/// A validated source: a camera index or an existing file or directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceSpec {
    Device(u32),
    Path(PathBuf),
}

impl fmt::Display for SourceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceSpec::Device(index) => write!(f, "device {index}"),
            SourceSpec::Path(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Normalize a source argument.
///
/// Digit-only text is a device index; other text must name an existing
/// file or directory of frames.
pub fn validate_source(arg: Option<SourceArg<'_>>) -> Result<SourceSpec, SourceError> {
    match arg {
        None => Err(invalid("source is absent, expected a device number or filename")),
        Some(SourceArg::Index(index)) => u32::try_from(index)
            .map(SourceSpec::Device)
            .map_err(|_| invalid(format!("device index {index} is out of range"))),
        Some(SourceArg::Text(text)) => {
            if !text.is_empty() && text.bytes().all(|b| b.is_ascii_digit()) {
                return text
                    .parse::<u32>()
                    .map(SourceSpec::Device)
                    .map_err(|_| invalid(format!("device index {text} is out of range")));
            }
            let path = Path::new(text);
            if path.is_file() || path.is_dir() {
                Ok(SourceSpec::Path(path.to_path_buf()))
            } else {
                Err(invalid(format!("'{text}' is neither a device number nor a file")))
            }
        }
    }
}

/// A capture backend producing frames in stream order.
pub trait Capture {
    /// Next frame, or `None` on end of stream or read failure.
    fn read(&mut self) -> Option<Frame>;

    /// Current `(width, height)` of delivered frames.
    fn frame_size(&self) -> (u32, u32);

    /// Best-effort resize request. Returns whether the backend honoured it.
    fn request_size(&mut self, _width: u32, _height: u32) -> bool {
        false
    }

    /// True once no further frames will ever be delivered.
    fn is_exhausted(&self) -> bool;

    fn describe(&self) -> String;
}

/// Opens camera devices by index.
pub trait DeviceBackend {
    fn open_device(&self, index: u32) -> Result<Box<dyn Capture>, String>;
}

/// Backend for builds without camera support: every index fails to open.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoDevices;

impl DeviceBackend for NoDevices {
    fn open_device(&self, index: u32) -> Result<Box<dyn Capture>, String> {
        Err(format!("no camera backend available for device {index}"))
    }
}

fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            IMAGE_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// Still images replayed as a stream: one file, or every image in a
/// directory sorted by file name.
#[derive(Debug)]
pub struct ImageSequence {
    paths: Vec<PathBuf>,
    next: usize,
    pending: Option<Frame>,
    size: (u32, u32),
}

impl ImageSequence {
    pub fn open(path: &Path) -> Result<Self, String> {
        let paths = if path.is_dir() {
            let entries = fs::read_dir(path).map_err(|e| e.to_string())?;
            let mut paths = Vec::new();
            for entry in entries {
                let entry = entry.map_err(|e| e.to_string())?;
                let p = entry.path();
                if p.is_file() && is_image_file(&p) {
                    paths.push(p);
                }
            }
            paths.sort();
            paths
        } else {
            vec![path.to_path_buf()]
        };

        let first_path = paths
            .first()
            .ok_or_else(|| format!("no image files in {}", path.display()))?;
        let first = image::open(first_path)
            .map_err(|e| format!("{}: {e}", first_path.display()))?
            .to_rgb8();
        let size = first.dimensions();

        Ok(Self {
            paths,
            next: 1,
            pending: Some(first),
            size,
        })
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

impl Capture for ImageSequence {
    fn read(&mut self) -> Option<Frame> {
        if let Some(frame) = self.pending.take() {
            return Some(frame);
        }
        let path = self.paths.get(self.next)?;
        self.next += 1;
        match image::open(path) {
            Ok(img) => {
                let frame = img.to_rgb8();
                self.size = frame.dimensions();
                Some(frame)
            }
            Err(err) => {
                warn!("failed to decode {}: {err}", path.display());
                None
            }
        }
    }

    fn frame_size(&self) -> (u32, u32) {
        self.size
    }

    fn is_exhausted(&self) -> bool {
        self.pending.is_none() && self.next >= self.paths.len()
    }

    fn describe(&self) -> String {
        match self.paths.as_slice() {
            [single] => single.display().to_string(),
            paths => format!("{} images", paths.len()),
        }
    }
}

/// An opened, readable frame stream.
///
/// The capture is released when the source is closed or dropped, so a read
/// after close cannot be expressed.
pub struct FrameSource {
    capture: Box<dyn Capture>,
    frames_read: usize,
}

impl fmt::Debug for FrameSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameSource")
            .field("capture", &self.capture.describe())
            .field("frames_read", &self.frames_read)
            .finish()
    }
}

impl FrameSource {
    pub fn open(
        spec: &SourceSpec,
        window_size: Option<(u32, u32)>,
        devices: &dyn DeviceBackend,
    ) -> Result<Self, SourceError> {
        let capture = match spec {
            SourceSpec::Device(index) => devices.open_device(*index),
            SourceSpec::Path(path) => {
                ImageSequence::open(path).map(|seq| Box::new(seq) as Box<dyn Capture>)
            }
        }
        .map_err(|reason| SourceError::OpenFailure {
            spec: spec.clone(),
            reason,
        })?;

        Ok(Self::from_capture(capture, window_size))
    }

    /// Wrap an already opened backend.
    pub fn from_capture(mut capture: Box<dyn Capture>, window_size: Option<(u32, u32)>) -> Self {
        match window_size {
            Some((width, height)) => {
                capture.request_size(width, height);
                let actual = capture.frame_size();
                if actual == (width, height) {
                    info!("video feed set to ({width} x {height})");
                } else {
                    warn!(
                        "video feed requested at ({width} x {height}) but delivers ({} x {})",
                        actual.0, actual.1
                    );
                }
            }
            None => {
                let (width, height) = capture.frame_size();
                info!("video feed defaults to ({width} x {height})");
            }
        }

        Self {
            capture,
            frames_read: 0,
        }
    }

    pub fn read(&mut self) -> Option<Frame> {
        let frame = self.capture.read()?;
        self.frames_read += 1;
        Some(frame)
    }

    pub fn frame_size(&self) -> (u32, u32) {
        self.capture.frame_size()
    }

    pub fn is_exhausted(&self) -> bool {
        self.capture.is_exhausted()
    }

    pub fn frames_read(&self) -> usize {
        self.frames_read
    }

    pub fn describe(&self) -> String {
        self.capture.describe()
    }

    /// Release the underlying capture.
    pub fn close(self) {
        drop(self);
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        debug!(
            "released frame source {} after {} frames",
            self.capture.describe(),
            self.frames_read
        );
    }
}
