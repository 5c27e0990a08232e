use chess_corners::CornerDescriptor;
use nalgebra::Point2;
use std::f32::consts::PI;

/// A ChESS corner in image pixels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Corner {
    pub position: Point2<f32>,
    /// Direction of the bright diagonal, radians modulo π.
    pub orientation: f32,
    pub strength: f32,
}

impl Corner {
    pub fn new(x: f32, y: f32, orientation: f32, strength: f32) -> Self {
        Self {
            position: Point2::new(x, y),
            orientation,
            strength,
        }
    }
}

/// Bisector of the bright sector `axes[1] .. axes[0] + π`, modulo π.
fn bright_diagonal(descriptor: &CornerDescriptor) -> f32 {
    let (a0, a1) = (descriptor.axes[0].angle, descriptor.axes[1].angle);
    (0.5 * (a0 + PI + a1)).rem_euclid(PI)
}

impl From<&CornerDescriptor> for Corner {
    fn from(c: &CornerDescriptor) -> Self {
        Self::new(c.x, c.y, bright_diagonal(c), c.response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chess_corners::AxisEstimate;
    use std::f32::consts::{FRAC_PI_2, FRAC_PI_4};

    fn descriptor(a0: f32, a1: f32) -> CornerDescriptor {
        CornerDescriptor::new(
            12.0,
            7.5,
            40.0,
            90.0,
            1.0,
            [AxisEstimate::new(a0, 0.01), AxisEstimate::new(a1, 0.01)],
        )
    }

    #[test]
    fn axis_aligned_corner_has_diagonal_orientation() {
        let corner = Corner::from(&descriptor(0.0, FRAC_PI_2));
        assert_eq!(Point2::new(12.0, 7.5), corner.position);
        assert_eq!(40.0, corner.strength);
        assert!((corner.orientation - 3.0 * FRAC_PI_4).abs() < 1e-5);
    }

    #[test]
    fn neighbouring_polarity_swaps_the_diagonal() {
        // Same grid lines, dark and bright sectors exchanged.
        let a = Corner::from(&descriptor(0.0, FRAC_PI_2));
        let b = Corner::from(&descriptor(FRAC_PI_2, PI));
        assert!((b.orientation - FRAC_PI_4).abs() < 1e-5);
        assert!(crate::geom::is_orthogonal(a.orientation, b.orientation, 1e-4));
    }
}
