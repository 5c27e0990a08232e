use crate::corner::Corner;
use crate::draw::draw_chessboard_corners;
use crate::gridgraph::{fit_to_board, GridGraph};
use crate::params::ChessboardParams;
use chess_corners::{find_chess_corners_image, ChessConfig, ThresholdMode};
use log::{debug, warn};
use nalgebra::{Point2, Point3};
use videocal_core::{Frame, PointDetection, PointDetector};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Finds the full inner-corner grid of a chessboard.
///
/// Partial boards are rejected: a detection always carries
/// `cols * rows` points ordered row by row.
#[derive(Clone, Debug)]
pub struct ChessboardPointDetector {
    params: ChessboardParams,
}

impl ChessboardPointDetector {
    pub fn new(params: ChessboardParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &ChessboardParams {
        &self.params
    }

    fn chess_config(&self) -> ChessConfig {
        let mut cfg = ChessConfig::single_scale();
        cfg.threshold_mode = ThresholdMode::Relative;
        cfg.threshold_value = self.params.threshold_rel;
        cfg.nms_radius = self.params.nms_radius;
        cfg
    }

    #[cfg_attr(
        feature = "tracing",
        instrument(
            level = "debug",
            skip(self, gray),
            fields(width = gray.width(), height = gray.height())
        )
    )]
    pub fn detect_corners(&self, gray: &image::GrayImage) -> Vec<Corner> {
        let descriptors = match find_chess_corners_image(gray, &self.chess_config()) {
            Ok(descriptors) => descriptors,
            Err(err) => {
                warn!("ChESS detection failed: {err}");
                return Vec::new();
            }
        };
        descriptors
            .iter()
            .map(Corner::from)
            .filter(|c| c.strength >= self.params.min_strength)
            .collect()
    }

    /// Assemble the board from already detected corners.
    pub fn detect_from_corners(&self, corners: &[Corner]) -> Option<PointDetection> {
        let (cols, rows) = (self.params.cols, self.params.rows);
        if corners.len() < self.params.corner_count() {
            debug!(
                "{} ChESS corners, fewer than the {} board corners",
                corners.len(),
                self.params.corner_count()
            );
            return None;
        }

        let graph = GridGraph::new(corners, &self.params.graph);
        let ids = graph
            .connected_components()
            .into_iter()
            .filter(|c| c.len() == self.params.corner_count())
            .filter_map(|c| graph.assign_grid_coordinates(&c))
            .find_map(|nodes| fit_to_board(&nodes, cols, rows))?;

        let sq = self.params.square_size_mm;
        let mut detection = PointDetection::default();
        for (index, id) in ids {
            let p = corners[index].position;
            let (i, j) = (id % cols, id / cols);
            detection.ids.push(id);
            detection
                .image_points
                .push(Point2::new(p.x as f64, p.y as f64));
            detection
                .object_points
                .push(Point3::new(i as f64 * sq, j as f64 * sq, 0.0));
        }
        Some(detection)
    }
}

impl PointDetector for ChessboardPointDetector {
    fn get_points(&self, frame: &Frame) -> Option<PointDetection> {
        let gray = image::imageops::grayscale(frame);
        let corners = self.detect_corners(&gray);
        self.detect_from_corners(&corners)
    }

    fn draw_points(&self, frame: &mut Frame, detection: &PointDetection) {
        draw_chessboard_corners(frame, self.params.cols, &detection.image_points);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_4;

    fn board_corners(cols: usize, rows: usize, spacing: f32, dx: f32) -> Vec<Corner> {
        let mut corners = Vec::new();
        for j in 0..rows {
            for i in 0..cols {
                let orientation = if (i + j) % 2 == 0 {
                    FRAC_PI_4
                } else {
                    3.0 * FRAC_PI_4
                };
                corners.push(Corner::new(
                    dx + i as f32 * spacing,
                    40.0 + j as f32 * spacing,
                    orientation,
                    1.0,
                ));
            }
        }
        corners
    }

    #[test]
    fn orders_points_row_by_row_with_metric_object_points() {
        let detector = ChessboardPointDetector::new(ChessboardParams::new(5, 4, 3.0));
        let mut corners = board_corners(5, 4, 20.0, 50.0);
        corners.reverse();

        let det = detector.detect_from_corners(&corners).expect("board");
        assert_eq!(20, det.len());
        assert_eq!((0..20).collect::<Vec<u32>>(), det.ids);
        assert_eq!(Point3::new(12.0, 9.0, 0.0), det.object_points[19]);
        assert_eq!(Point2::new(50.0, 40.0), det.image_points[0]);
        assert_eq!(Point2::new(130.0, 100.0), det.image_points[19]);
    }

    #[test]
    fn partial_board_is_rejected() {
        let detector = ChessboardPointDetector::new(ChessboardParams::new(5, 4, 3.0));
        let mut corners = board_corners(5, 4, 20.0, 50.0);
        corners.pop();
        assert!(detector.detect_from_corners(&corners).is_none());
    }

    /// White frame with a `cols x rows` inner-corner board, corner `(i, j)`
    /// at `origin + square * (i, j)` in pixel-centre coordinates.
    fn render_board(
        size: (u32, u32),
        cols: u32,
        rows: u32,
        square: f32,
        origin: (f32, f32),
    ) -> image::GrayImage {
        const SS: u32 = 4;
        image::GrayImage::from_fn(size.0, size.1, |px, py| {
            let mut dark = 0;
            for sy in 0..SS {
                for sx in 0..SS {
                    let x = px as f32 + (sx as f32 + 0.5) / SS as f32 - 0.5;
                    let y = py as f32 + (sy as f32 + 0.5) / SS as f32 - 0.5;
                    let bx = ((x - origin.0) / square).floor();
                    let by = ((y - origin.1) / square).floor();
                    let on_board =
                        bx >= -1.0 && bx < cols as f32 && by >= -1.0 && by < rows as f32;
                    if on_board && ((bx + by) as i32).rem_euclid(2) == 0 {
                        dark += 1;
                    }
                }
            }
            let white = 235.0 - 215.0 * dark as f32 / (SS * SS) as f32;
            image::Luma([white.round() as u8])
        })
    }

    fn to_frame(gray: image::GrayImage) -> Frame {
        image::DynamicImage::ImageLuma8(gray).to_rgb8()
    }

    fn assert_row_major(
        det: &PointDetection,
        cols: u32,
        rows: u32,
        square: f32,
        origin: (f32, f32),
    ) {
        let n = (cols * rows) as usize;
        assert_eq!(n, det.len());
        assert_eq!((0..n as u32).collect::<Vec<u32>>(), det.ids);
        for (k, p) in det.image_points.iter().enumerate() {
            let (i, j) = (k as u32 % cols, k as u32 / cols);
            let expected = Point2::new(
                (origin.0 + i as f32 * square) as f64,
                (origin.1 + j as f32 * square) as f64,
            );
            assert!((p - expected).norm() < 1.0, "corner {k}: {p} vs {expected}");
        }
    }

    #[test]
    fn detects_rendered_board_row_by_row() {
        let detector = ChessboardPointDetector::new(ChessboardParams::new(9, 6, 25.0));
        let origin = (80.0, 75.0);
        let frame = to_frame(render_board((400, 300), 9, 6, 30.0, origin));

        let det = detector.get_points(&frame).expect("rendered board");
        assert_row_major(&det, 9, 6, 30.0, origin);
        assert_eq!(Point3::new(200.0, 125.0, 0.0), det.object_points[53]);
    }

    #[test]
    fn detects_blurred_rendered_board() {
        let detector = ChessboardPointDetector::new(ChessboardParams::new(9, 6, 25.0));
        let origin = (80.0, 75.0);
        let blurred = imageproc::filter::gaussian_blur_f32(
            &render_board((400, 300), 9, 6, 30.0, origin),
            1.5,
        );

        let det = detector.get_points(&to_frame(blurred)).expect("blurred board");
        assert_row_major(&det, 9, 6, 30.0, origin);
    }

    #[test]
    fn quarter_turned_board_keeps_handedness() {
        // A 9 x 6 board lying on its side: 6 corners across, 9 down.
        let detector = ChessboardPointDetector::new(ChessboardParams::new(9, 6, 25.0));
        let frame = to_frame(render_board((300, 400), 6, 9, 30.0, (75.0, 80.0)));

        let det = detector.get_points(&frame).expect("turned board");
        assert_eq!(54, det.len());
        let p = &det.image_points;
        let along_i = p[1] - p[0];
        let along_j = p[9] - p[0];
        assert!((along_i.norm() - 30.0).abs() < 1.0);
        assert!((along_j.norm() - 30.0).abs() < 1.0);
        // Same winding as an upright board.
        assert!(along_i.x * along_j.y - along_i.y * along_j.x > 0.0);
    }

    #[test]
    fn blank_frame_has_no_board() {
        let detector = ChessboardPointDetector::new(ChessboardParams::new(9, 6, 25.0));
        let frame = Frame::from_pixel(200, 150, image::Rgb([128, 128, 128]));
        assert!(detector.get_points(&frame).is_none());
    }

    #[test]
    fn ignores_unrelated_clutter() {
        let mut params = ChessboardParams::new(3, 3, 3.0);
        params.graph.max_spacing_pix = 50.0;
        let detector = ChessboardPointDetector::new(params);
        let mut corners = board_corners(3, 3, 20.0, 50.0);
        corners.extend(board_corners(2, 2, 20.0, 300.0));
        let det = detector.detect_from_corners(&corners).expect("board");
        assert!(det.image_points.iter().all(|p| p.x < 200.0));
    }
}
