use std::f32::consts::{FRAC_PI_2, PI};

/// Signed angle difference `b - a` wrapped into `[-π, π)`.
fn wrap_diff(a: f32, b: f32) -> f32 {
    let two_pi = 2.0 * PI;
    let mut diff = (b - a).rem_euclid(two_pi);
    if diff >= PI {
        diff -= two_pi;
    }
    diff
}

/// Absolute angle difference in `[0, π]`.
pub fn angle_diff_abs(a: f32, b: f32) -> f32 {
    wrap_diff(a, b).abs()
}

/// Angle between an undirected axis (modulo π) and a directed vector angle,
/// in `[0, π/2]`.
pub fn axis_vec_diff(axis_angle: f32, vec_angle: f32) -> f32 {
    let d = angle_diff_abs(axis_angle, vec_angle);
    d.min(PI - d)
}

/// Two directions are orthogonal within `tolerance` radians.
pub fn is_orthogonal(a: f32, b: f32, tolerance: f32) -> bool {
    (FRAC_PI_2 - angle_diff_abs(a, b)).abs() <= tolerance.abs()
}
