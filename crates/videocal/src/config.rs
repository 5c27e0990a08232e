//! JSON configuration for the calibration drivers.
//!
//! The on-disk keys keep their human-readable spelling
//! (`"square size in mm"`, `"minimum number of views"`, ...). Everything is
//! defaulted at deserialization time and checked once by
//! [`CalibrationConfig::validate`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{fs, path::Path, time::Duration};

/// The only detection method the drivers support.
pub const CHESSBOARD_METHOD: &str = "chessboard";

const DEFAULT_KEYPRESS_DELAY_MS: u64 = 1000;

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("a configuration is required (see config/video_chessboard_conf.json)")]
    Missing,
    #[error("only chessboard calibration is currently supported, got method '{0}'")]
    UnsupportedMethod(String),
    #[error("corners must be two integers >= 2, got {0:?}")]
    InvalidCorners(Vec<i64>),
    #[error("square size in mm must be positive and finite, got {0}")]
    InvalidSquareSize(f64),
    #[error("minimum number of views must be >= 1, got {0}")]
    InvalidMinimumViews(i64),
    #[error("sample frequency must be >= 1, got {0}")]
    InvalidSampleFrequency(i64),
    #[error("window size must be two positive integers, got {0:?}")]
    InvalidWindowSize(Vec<i64>),
    #[error("keypress delay must be >= 0 ms, got {0}")]
    InvalidKeypressDelay(i64),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

fn default_method() -> String {
    CHESSBOARD_METHOD.to_string()
}

fn default_corners() -> Vec<i64> {
    vec![14, 10]
}

fn default_square_size() -> f64 {
    3.0
}

fn default_minimum_views() -> i64 {
    5
}

fn default_sample_frequency() -> i64 {
    1
}

/// Raw configuration as read from JSON.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationConfig {
    #[serde(default = "default_method")]
    pub method: String,
    /// Inner corners as `[columns, rows]`.
    #[serde(default = "default_corners")]
    pub corners: Vec<i64>,
    #[serde(rename = "square size in mm", default = "default_square_size")]
    pub square_size_mm: f64,
    #[serde(rename = "minimum number of views", default = "default_minimum_views")]
    pub minimum_number_of_views: i64,
    #[serde(rename = "window size", default, skip_serializing_if = "Option::is_none")]
    pub window_size: Option<Vec<i64>>,
    #[serde(rename = "sample frequency", default = "default_sample_frequency")]
    pub sample_frequency: i64,
    #[serde(
        rename = "keypress delay in ms",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub keypress_delay_ms: Option<i64>,
    #[serde(rename = "keypress delay", default, skip_serializing_if = "Option::is_none")]
    pub keypress_delay: Option<i64>,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            method: default_method(),
            corners: default_corners(),
            square_size_mm: default_square_size(),
            minimum_number_of_views: default_minimum_views(),
            window_size: None,
            sample_frequency: default_sample_frequency(),
            keypress_delay_ms: None,
            keypress_delay: None,
        }
    }
}

/// Typed, checked configuration the drivers run on.
#[derive(Clone, Debug, PartialEq)]
pub struct ValidatedConfig {
    pub cols: u32,
    pub rows: u32,
    pub square_size_mm: f64,
    pub minimum_number_of_views: usize,
    pub window_size: Option<(u32, u32)>,
    pub sample_frequency: usize,
    pub keypress_delay: Duration,
}

impl ValidatedConfig {
    /// Inner corners on a complete board.
    pub fn corner_count(&self) -> usize {
        self.cols as usize * self.rows as usize
    }
}

impl CalibrationConfig {
    /// Build from an already parsed JSON document.
    ///
    /// `null` counts as a missing configuration. The method is checked
    /// before the remaining keys are deserialized, so a foreign method is
    /// reported as such even when other keys are malformed.
    pub fn from_value(value: Value) -> Result<Self, ConfigError> {
        if value.is_null() {
            return Err(ConfigError::Missing);
        }
        if let Some(method) = value.get("method") {
            match method.as_str() {
                Some(CHESSBOARD_METHOD) => {}
                Some(other) => return Err(ConfigError::UnsupportedMethod(other.to_string())),
                None => return Err(ConfigError::UnsupportedMethod(method.to_string())),
            }
        }
        Ok(serde_json::from_value(value)?)
    }

    /// Load a JSON config from disk. An empty file is a missing config.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)?;
        if raw.trim().is_empty() {
            return Err(ConfigError::Missing);
        }
        Self::from_value(serde_json::from_str(&raw)?)
    }

    /// Write this config to disk as pretty JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// `keypress delay in ms`, else `keypress delay`, else one second.
    pub fn resolved_keypress_delay_ms(&self) -> i64 {
        self.keypress_delay_ms
            .or(self.keypress_delay)
            .unwrap_or(DEFAULT_KEYPRESS_DELAY_MS as i64)
    }

    pub fn validate(&self) -> Result<ValidatedConfig, ConfigError> {
        if self.method != CHESSBOARD_METHOD {
            return Err(ConfigError::UnsupportedMethod(self.method.clone()));
        }

        let (cols, rows) = match self.corners.as_slice() {
            [c, r] if *c >= 2 && *r >= 2 => match (u32::try_from(*c), u32::try_from(*r)) {
                (Ok(c), Ok(r)) => (c, r),
                _ => return Err(ConfigError::InvalidCorners(self.corners.clone())),
            },
            _ => return Err(ConfigError::InvalidCorners(self.corners.clone())),
        };

        if !(self.square_size_mm.is_finite() && self.square_size_mm > 0.0) {
            return Err(ConfigError::InvalidSquareSize(self.square_size_mm));
        }

        if self.minimum_number_of_views < 1 {
            return Err(ConfigError::InvalidMinimumViews(self.minimum_number_of_views));
        }
        let minimum_number_of_views = usize::try_from(self.minimum_number_of_views)
            .map_err(|_| ConfigError::InvalidMinimumViews(self.minimum_number_of_views))?;

        if self.sample_frequency < 1 {
            return Err(ConfigError::InvalidSampleFrequency(self.sample_frequency));
        }
        let sample_frequency = usize::try_from(self.sample_frequency)
            .map_err(|_| ConfigError::InvalidSampleFrequency(self.sample_frequency))?;

        let window_size = match &self.window_size {
            None => None,
            Some(size) => match size.as_slice() {
                [w, h] if *w > 0 && *h > 0 => match (u32::try_from(*w), u32::try_from(*h)) {
                    (Ok(w), Ok(h)) => Some((w, h)),
                    _ => return Err(ConfigError::InvalidWindowSize(size.clone())),
                },
                _ => return Err(ConfigError::InvalidWindowSize(size.clone())),
            },
        };

        let delay_ms = self.resolved_keypress_delay_ms();
        let keypress_delay = u64::try_from(delay_ms)
            .map(Duration::from_millis)
            .map_err(|_| ConfigError::InvalidKeypressDelay(delay_ms))?;

        Ok(ValidatedConfig {
            cols,
            rows,
            square_size_mm: self.square_size_mm,
            minimum_number_of_views,
            window_size,
            sample_frequency,
            keypress_delay,
        })
    }
}
