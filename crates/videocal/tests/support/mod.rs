//! Synthetic captures, scripted detectors and board geometry shared by the
//! integration tests.
#![allow(dead_code)]

use image::{Rgb, RgbImage};
use nalgebra::{Isometry3, Point2, Point3, Translation3, UnitQuaternion, Vector3};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use videocal::{
    BrownConrady5, CalibrationResult, CalibrationSolver, Camera, CameraIntrinsics, Capture, Frame,
    FrameSource, PointDetection, PointDetector, SolveError,
};

pub const WIDTH: u32 = 640;
pub const HEIGHT: u32 = 480;

/// Blank frame carrying its stream index in the top-left pixel.
pub fn tagged_frame(index: usize) -> Frame {
    let mut frame = RgbImage::new(WIDTH, HEIGHT);
    frame.put_pixel(0, 0, Rgb([(index & 0xff) as u8, (index >> 8) as u8, 255]));
    frame
}

pub fn frame_tag(frame: &Frame) -> usize {
    let px = frame.get_pixel(0, 0);
    px[0] as usize | ((px[1] as usize) << 8)
}

/// In-memory capture replaying a fixed list of reads; `None` is a failed
/// read that does not end the stream.
pub struct SyntheticCapture {
    frames: VecDeque<Option<Frame>>,
}

impl SyntheticCapture {
    pub fn tagged(count: usize) -> Self {
        Self::from_reads((0..count).map(|k| Some(tagged_frame(k))).collect())
    }

    pub fn from_frames(frames: Vec<Frame>) -> Self {
        Self::from_reads(frames.into_iter().map(Some).collect())
    }

    pub fn from_reads(reads: Vec<Option<Frame>>) -> Self {
        Self {
            frames: reads.into(),
        }
    }
}

impl Capture for SyntheticCapture {
    fn read(&mut self) -> Option<Frame> {
        self.frames.pop_front().flatten()
    }

    fn frame_size(&self) -> (u32, u32) {
        (WIDTH, HEIGHT)
    }

    fn is_exhausted(&self) -> bool {
        self.frames.is_empty()
    }

    fn describe(&self) -> String {
        format!("{} synthetic frames", self.frames.len())
    }
}

pub fn synthetic_source(count: usize) -> FrameSource {
    FrameSource::from_capture(Box::new(SyntheticCapture::tagged(count)), None)
}

/// Returns the scripted detection for each frame's tag.
pub struct ScriptedDetector {
    script: Vec<Option<PointDetection>>,
}

impl ScriptedDetector {
    pub fn new(script: Vec<Option<PointDetection>>) -> Self {
        Self { script }
    }

    /// The same detection on every one of `count` frames.
    pub fn repeating(detection: PointDetection, count: usize) -> Self {
        Self::new(vec![Some(detection); count])
    }
}

impl PointDetector for ScriptedDetector {
    fn get_points(&self, frame: &Frame) -> Option<PointDetection> {
        self.script.get(frame_tag(frame)).cloned().flatten()
    }

    fn draw_points(&self, frame: &mut Frame, _detection: &PointDetection) {
        frame.put_pixel(1, 0, Rgb([0, 255, 0]));
    }
}

/// Records the view count of every solve and returns a fixed camera.
#[derive(Clone, Default)]
pub struct RecordingSolver {
    pub calls: Rc<RefCell<Vec<usize>>>,
}

impl CalibrationSolver for RecordingSolver {
    fn calibrate(
        &self,
        views: &[PointDetection],
        _image_size: (u32, u32),
    ) -> Result<CalibrationResult, SolveError> {
        self.calls.borrow_mut().push(views.len());
        Ok(CalibrationResult {
            rms: 0.25,
            camera: truth_camera(),
            extrinsics: vec![Isometry3::identity(); views.len()],
        })
    }
}

pub fn truth_camera() -> Camera {
    Camera::new(
        CameraIntrinsics::new(820.0, 810.0, 330.0, 245.0),
        BrownConrady5::zero(),
    )
}

/// Same focal lengths as [`truth_camera`] behind a barrel-distorting lens.
pub fn distorted_camera() -> Camera {
    Camera::new(
        CameraIntrinsics::new(820.0, 810.0, 330.0, 245.0),
        BrownConrady5 {
            k1: -0.2,
            k2: 0.05,
            ..BrownConrady5::zero()
        },
    )
}

/// Render what `camera` sees of a `cols x rows` inner-corner chessboard at
/// `pose`, with one border square on every side and a white background.
pub fn render_view(
    camera: &Camera,
    pose: &Isometry3<f64>,
    cols: usize,
    rows: usize,
    sq: f64,
) -> Frame {
    const SS: u32 = 3;
    let to_board = pose.inverse();
    let normal = pose.rotation * Vector3::z();
    let offset = normal.dot(&pose.translation.vector);

    let is_dark = |u: f64, v: f64| -> bool {
        let n = camera
            .distortion
            .undistort(camera.intrinsics.normalize(Point2::new(u, v)));
        let ray = Vector3::new(n.x, n.y, 1.0);
        let along = normal.dot(&ray);
        if along.abs() < 1e-12 || offset / along <= 0.0 {
            return false;
        }
        let p = to_board.transform_point(&Point3::from(ray * (offset / along)));
        let (bx, by) = ((p.x / sq).floor() as i64, (p.y / sq).floor() as i64);
        let on_board = (-1..cols as i64).contains(&bx) && (-1..rows as i64).contains(&by);
        on_board && (bx + by).rem_euclid(2) == 0
    };

    RgbImage::from_fn(WIDTH, HEIGHT, |px, py| {
        let mut dark = 0;
        for sy in 0..SS {
            for sx in 0..SS {
                let u = px as f64 + (sx as f64 + 0.5) / SS as f64 - 0.5;
                let v = py as f64 + (sy as f64 + 0.5) / SS as f64 - 0.5;
                if is_dark(u, v) {
                    dark += 1;
                }
            }
        }
        let value = 235.0 - 215.0 * dark as f64 / (SS * SS) as f64;
        Rgb([value.round() as u8; 3])
    })
}

pub fn rendered_source(frames: Vec<Frame>) -> FrameSource {
    FrameSource::from_capture(Box::new(SyntheticCapture::from_frames(frames)), None)
}

/// Inner corners `j * cols + i` at `(i * sq, j * sq, 0)`.
pub fn board(cols: usize, rows: usize, sq: f64) -> Vec<Point3<f64>> {
    (0..rows)
        .flat_map(|j| (0..cols).map(move |i| Point3::new(i as f64 * sq, j as f64 * sq, 0.0)))
        .collect()
}

/// Six well-spread board poses roughly 40 cm in front of the camera.
pub fn view_poses() -> Vec<Isometry3<f64>> {
    [
        (0.30, -0.10, 0.05, -65.0, -45.0, 380.0),
        (-0.25, 0.20, -0.10, -70.0, -40.0, 400.0),
        (0.10, 0.35, 0.20, -60.0, -50.0, 360.0),
        (-0.35, -0.25, 0.00, -65.0, -42.0, 420.0),
        (0.20, 0.15, -0.25, -75.0, -48.0, 390.0),
        (0.05, -0.30, 0.10, -62.0, -44.0, 410.0),
    ]
    .iter()
    .map(|&(rx, ry, rz, tx, ty, tz)| {
        Isometry3::from_parts(
            Translation3::new(tx, ty, tz),
            UnitQuaternion::from_euler_angles(rx, ry, rz),
        )
    })
    .collect()
}

pub fn project_view(
    camera: &Camera,
    pose: &Isometry3<f64>,
    object: &[Point3<f64>],
) -> PointDetection {
    PointDetection {
        ids: (0..object.len() as u32).collect(),
        object_points: object.to_vec(),
        image_points: object
            .iter()
            .map(|p| camera.project(pose, p).expect("board in front of camera"))
            .collect(),
    }
}

/// Write the blank tagged frames as PNGs into `dir`.
pub fn write_tagged_frames(dir: &std::path::Path, count: usize) {
    for k in 0..count {
        tagged_frame(k)
            .save(dir.join(format!("frame_{k:03}.png")))
            .expect("write frame");
    }
}

pub fn write_config(dir: &std::path::Path, json: &serde_json::Value) -> std::path::PathBuf {
    let path = dir.join("config.json");
    std::fs::write(&path, serde_json::to_string_pretty(json).expect("json")).expect("write config");
    path
}
