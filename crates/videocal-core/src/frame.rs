use crate::camera::Camera;
use image::{Rgb, RgbImage};
use nalgebra::Point2;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// One decoded video frame.
pub type Frame = RgbImage;

#[inline]
fn get_rgb(src: &RgbImage, x: i64, y: i64) -> [f32; 3] {
    if x < 0 || y < 0 || x >= src.width() as i64 || y >= src.height() as i64 {
        return [0.0; 3];
    }
    let p = src.get_pixel(x as u32, y as u32).0;
    [p[0] as f32, p[1] as f32, p[2] as f32]
}

/// Bilinear sample with black outside the image.
#[inline]
pub fn sample_bilinear_rgb(src: &RgbImage, x: f64, y: f64) -> Rgb<u8> {
    let x0 = x.floor() as i64;
    let y0 = y.floor() as i64;
    let fx = (x - x0 as f64) as f32;
    let fy = (y - y0 as f64) as f32;

    let p00 = get_rgb(src, x0, y0);
    let p10 = get_rgb(src, x0 + 1, y0);
    let p01 = get_rgb(src, x0, y0 + 1);
    let p11 = get_rgb(src, x0 + 1, y0 + 1);

    let mut out = [0u8; 3];
    for c in 0..3 {
        let a = p00[c] + fx * (p10[c] - p00[c]);
        let b = p01[c] + fx * (p11[c] - p01[c]);
        out[c] = (a + fy * (b - a)).round().clamp(0.0, 255.0) as u8;
    }
    Rgb(out)
}

/// Remove lens distortion, keeping the same camera matrix for the output.
///
/// Returns a copy of the input when the camera has no distortion or its
/// intrinsics are not invertible.
#[cfg_attr(
    feature = "tracing",
    instrument(
        level = "debug",
        skip(frame, camera),
        fields(width = frame.width(), height = frame.height())
    )
)]
pub fn undistort_frame(frame: &Frame, camera: &Camera) -> Frame {
    if camera.distortion.is_zero() || !camera.intrinsics.is_invertible() {
        return frame.clone();
    }

    let k = &camera.intrinsics;
    let mut out = RgbImage::new(frame.width(), frame.height());
    for (x, y, px) in out.enumerate_pixels_mut() {
        let n = k.normalize(Point2::new(x as f64, y as f64));
        let src = k.denormalize(camera.distortion.distort(n));
        *px = sample_bilinear_rgb(frame, src.x, src.y);
    }
    out
}
