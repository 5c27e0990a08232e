use image::Rgb;
use imageproc::drawing::{draw_hollow_circle_mut, draw_line_segment_mut};
use nalgebra::Point2;
use videocal_core::Frame;

const ROW_COLORS: [Rgb<u8>; 6] = [
    Rgb([255, 0, 0]),
    Rgb([255, 128, 0]),
    Rgb([200, 200, 0]),
    Rgb([0, 255, 0]),
    Rgb([0, 200, 255]),
    Rgb([160, 0, 255]),
];

const CORNER_RADIUS: i32 = 4;

/// Draw ordered board corners: one colour per row, rows joined by a
/// polyline, a circle on every corner.
pub fn draw_chessboard_corners(frame: &mut Frame, cols: u32, points: &[Point2<f64>]) {
    let cols = cols.max(1) as usize;
    let mut prev: Option<(f32, f32)> = None;

    for (k, p) in points.iter().enumerate() {
        let color = ROW_COLORS[(k / cols) % ROW_COLORS.len()];
        let here = (p.x as f32, p.y as f32);
        if let Some(from) = prev {
            draw_line_segment_mut(frame, from, here, color);
        }
        draw_hollow_circle_mut(
            frame,
            (p.x.round() as i32, p.y.round() as i32),
            CORNER_RADIUS,
            color,
        );
        prev = Some(here);
    }
}
