//! Plain-text persistence of calibration views and results.
//!
//! Matrices are written one row per line, space separated, in `%.18e`
//! notation (`1.000000000000000000e+00`), which numpy's `loadtxt` reads
//! directly. File names follow `D/[P.]stem`; an empty or absent prefix `P`
//! drops both the segment and its dot.

use log::{info, warn};
use nalgebra::{DMatrix, Isometry3, Matrix3, Matrix4};
use std::fs;
use std::path::{Path, PathBuf};
use videocal_core::{BrownConrady5, Camera, CameraIntrinsics, Frame, PointDetection};

#[derive(thiserror::Error, Debug)]
pub enum PersistError {
    #[error("failed to create output directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("{path}: malformed matrix text ({reason})")]
    Malformed { path: PathBuf, reason: String },
    #[error("{path}: {source}")]
    Image {
        path: PathBuf,
        source: image::ImageError,
    },
}

/// Where calibration output goes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputLocation {
    pub dir: PathBuf,
    pub prefix: Option<String>,
}

impl OutputLocation {
    /// `None` when neither a directory nor a prefix was requested. A prefix
    /// alone writes into the current directory.
    pub fn new(dir: Option<PathBuf>, prefix: Option<String>) -> Option<Self> {
        match (dir, prefix) {
            (None, None) => None,
            (Some(dir), prefix) => Some(Self { dir, prefix }),
            (None, Some(prefix)) => Some(Self {
                dir: PathBuf::from("."),
                prefix: Some(prefix),
            }),
        }
    }

    pub fn file_path(&self, stem: &str) -> PathBuf {
        self.dir.join(prefixed_name(self.prefix.as_deref(), stem))
    }

    pub fn view_file_path(&self, stem: &str, index: usize, extension: &str) -> PathBuf {
        self.file_path(&format!("{stem}.{index}.{extension}"))
    }

    /// Create the output directory if needed.
    pub fn ensure_dir(&self) -> Result<(), PersistError> {
        if self.dir.is_dir() {
            return Ok(());
        }
        fs::create_dir_all(&self.dir).map_err(|source| PersistError::CreateDir {
            path: self.dir.clone(),
            source,
        })
    }
}

/// `P.stem`, or just `stem` without a usable prefix.
pub fn prefixed_name(prefix: Option<&str>, stem: &str) -> String {
    match prefix {
        Some(p) if !p.is_empty() => format!("{p}.{stem}"),
        _ => stem.to_string(),
    }
}

fn format_value(v: f64) -> String {
    if v.is_nan() {
        return "nan".to_string();
    }
    if v.is_infinite() {
        return if v > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    let s = format!("{v:.18e}");
    match s.split_once('e') {
        Some((mantissa, exp)) => {
            let exp: i32 = exp.parse().unwrap_or(0);
            let sign = if exp < 0 { '-' } else { '+' };
            format!("{mantissa}e{sign}{:02}", exp.abs())
        }
        None => s,
    }
}

/// Matrix as text, one row per line.
pub fn format_matrix(m: &DMatrix<f64>) -> String {
    let mut out = String::new();
    for r in 0..m.nrows() {
        let row: Vec<String> = (0..m.ncols()).map(|c| format_value(m[(r, c)])).collect();
        out.push_str(&row.join(" "));
        out.push('\n');
    }
    out
}

/// Parse matrix text. Blank lines and `#` comments are skipped.
pub fn parse_matrix(text: &str) -> Result<DMatrix<f64>, String> {
    let mut rows: Vec<Vec<f64>> = Vec::new();
    for (line_no, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let row = line
            .split_whitespace()
            .map(|tok| {
                tok.parse::<f64>()
                    .map_err(|e| format!("line {}: '{tok}': {e}", line_no + 1))
            })
            .collect::<Result<Vec<_>, _>>()?;
        if let Some(first) = rows.first() {
            if first.len() != row.len() {
                return Err(format!(
                    "line {}: expected {} columns, found {}",
                    line_no + 1,
                    first.len(),
                    row.len()
                ));
            }
        }
        rows.push(row);
    }

    let ncols = rows.first().map_or(0, Vec::len);
    Ok(DMatrix::from_row_iterator(
        rows.len(),
        ncols,
        rows.into_iter().flatten(),
    ))
}

pub fn write_matrix(path: &Path, m: &DMatrix<f64>) -> Result<(), PersistError> {
    fs::write(path, format_matrix(m)).map_err(|source| PersistError::Io {
        path: path.to_path_buf(),
        source,
    })
}

pub fn read_matrix(path: &Path) -> Result<DMatrix<f64>, PersistError> {
    let text = fs::read_to_string(path).map_err(|source| PersistError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_matrix(&text).map_err(|reason| PersistError::Malformed {
        path: path.to_path_buf(),
        reason,
    })
}

fn pose_matrix(pose: &Isometry3<f64>) -> DMatrix<f64> {
    let m: Matrix4<f64> = pose.to_homogeneous();
    DMatrix::from_iterator(4, 4, m.iter().copied())
}

fn identity4() -> DMatrix<f64> {
    DMatrix::identity(4, 4)
}

/// Write one accumulated view: extrinsics, ids, points and (if kept) the
/// source frame.
pub fn save_view(
    location: &OutputLocation,
    index: usize,
    view: &PointDetection,
    extrinsic: &Isometry3<f64>,
    frame: Option<&Frame>,
) -> Result<(), PersistError> {
    write_matrix(
        &location.view_file_path("extrinsics", index, "txt"),
        &pose_matrix(extrinsic),
    )?;

    let ids = DMatrix::from_iterator(view.ids.len(), 1, view.ids.iter().map(|&id| id as f64));
    write_matrix(&location.view_file_path("ids", index, "txt"), &ids)?;

    let image_points = DMatrix::from_row_iterator(
        view.image_points.len(),
        2,
        view.image_points.iter().flat_map(|p| [p.x, p.y]),
    );
    write_matrix(
        &location.view_file_path("image_points", index, "txt"),
        &image_points,
    )?;

    let object_points = DMatrix::from_row_iterator(
        view.object_points.len(),
        3,
        view.object_points.iter().flat_map(|p| [p.x, p.y, p.z]),
    );
    write_matrix(
        &location.view_file_path("object_points", index, "txt"),
        &object_points,
    )?;

    if let Some(frame) = frame {
        let path = location.view_file_path("images", index, "png");
        frame
            .save(&path)
            .map_err(|source| PersistError::Image { path, source })?;
    }
    Ok(())
}

/// Write the solve outputs: intrinsics, distortion and identity
/// hand-eye / pattern-to-marker transforms.
pub fn save_params(location: &OutputLocation, camera: &Camera) -> Result<(), PersistError> {
    let k: Matrix3<f64> = camera.intrinsics.matrix();
    write_matrix(
        &location.file_path("intrinsics.txt"),
        &DMatrix::from_iterator(3, 3, k.iter().copied()),
    )?;
    write_matrix(
        &location.file_path("distortion.txt"),
        &DMatrix::from_row_slice(1, 5, &camera.distortion.to_array()),
    )?;
    write_matrix(&location.file_path("handeye.txt"), &identity4())?;
    write_matrix(&location.file_path("pattern2marker.txt"), &identity4())?;
    Ok(())
}

/// Intrinsics and distortion read back for checking.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ExistingCalibration {
    pub camera: Camera,
}

impl Default for ExistingCalibration {
    fn default() -> Self {
        Self {
            camera: Camera::new(CameraIntrinsics::identity(), BrownConrady5::zero()),
        }
    }
}

impl ExistingCalibration {
    /// Load `[P.]intrinsics.txt` and `[P.]distortion.txt` from `dir`.
    ///
    /// Never fails: a missing or malformed file is logged and replaced by
    /// identity intrinsics or zero distortion.
    pub fn load(dir: &Path, prefix: Option<&str>) -> Self {
        let mut loaded = Self::default();

        let k_path = dir.join(prefixed_name(prefix, "intrinsics.txt"));
        match read_matrix(&k_path) {
            Ok(m) if m.shape() == (3, 3) => {
                let k = Matrix3::from_iterator(m.iter().copied());
                loaded.camera.intrinsics = CameraIntrinsics::from_matrix(&k);
            }
            Ok(m) => warn!(
                "{}: expected a 3x3 matrix, found {}x{}; using identity intrinsics",
                k_path.display(),
                m.nrows(),
                m.ncols()
            ),
            Err(err) => warn!("{err}; using identity intrinsics"),
        }

        let d_path = dir.join(prefixed_name(prefix, "distortion.txt"));
        match read_matrix(&d_path) {
            Ok(m) if !m.is_empty() && m.len() <= 5 => {
                let coeffs: Vec<f64> = m.transpose().iter().copied().collect();
                loaded.camera.distortion = BrownConrady5::from_slice(&coeffs);
            }
            Ok(m) => warn!(
                "{}: expected up to 5 coefficients, found {}; using zero distortion",
                d_path.display(),
                m.len()
            ),
            Err(err) => warn!("{err}; using zero distortion"),
        }

        info!("loaded calibration from {}", dir.display());
        loaded
    }
}
