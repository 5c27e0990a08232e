use crate::frame::Frame;
use nalgebra::{Point2, Point3};

/// Index-aligned correspondences found in one frame.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PointDetection {
    pub ids: Vec<u32>,
    /// Board-frame coordinates in millimetres.
    pub object_points: Vec<Point3<f64>>,
    /// Pixel coordinates.
    pub image_points: Vec<Point2<f64>>,
}

impl PointDetection {
    pub fn len(&self) -> usize {
        self.image_points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.image_points.is_empty()
    }
}

/// Finds calibration pattern points in a frame.
pub trait PointDetector {
    /// `None` (or an empty detection) when no pattern is visible.
    fn get_points(&self, frame: &Frame) -> Option<PointDetection>;

    /// Draw a detection onto `frame` for operator feedback.
    fn draw_points(&self, frame: &mut Frame, detection: &PointDetection);
}

impl<T: PointDetector + ?Sized> PointDetector for Box<T> {
    fn get_points(&self, frame: &Frame) -> Option<PointDetection> {
        (**self).get_points(frame)
    }

    fn draw_points(&self, frame: &mut Frame, detection: &PointDetection) {
        (**self).draw_points(frame, detection)
    }
}
