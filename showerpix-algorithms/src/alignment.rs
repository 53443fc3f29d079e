//! Shower-centred reference frame.
//!
//! Pixel positions are translated by minus the shower centroid and rotated by
//! `psi + pi/2` with the standard rotation matrix, so the shower major axis
//! ends up along the vertical image axis.

use showerpix_core::{FrameHeader, PixelPosition, ShowerGeometry};
use std::f64::consts::FRAC_PI_2;

/// Per-event rigid transform into the shower frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ShowerAlignment {
    /// Rotation angle (rad).
    pub rotation: f64,
    /// Translation applied before rotating (mm).
    pub offset_x: f64,
    pub offset_y: f64,
}

impl ShowerAlignment {
    /// Build the transform for a reconstructed shower.
    ///
    /// Returns `None` when the centroid or orientation is not finite; such
    /// events must be skipped.
    #[must_use]
    pub fn from_shower(geometry: &ShowerGeometry) -> Option<Self> {
        if !geometry.is_finite() {
            return None;
        }
        Some(Self {
            rotation: geometry.psi + FRAC_PI_2,
            offset_x: -geometry.cen_x,
            offset_y: -geometry.cen_y,
        })
    }

    /// Recover the transform stored in a frame header.
    #[must_use]
    pub fn from_header(header: &FrameHeader) -> Self {
        Self {
            rotation: header.rotation,
            offset_x: header.offset_x,
            offset_y: header.offset_y,
        }
    }

    /// Map a camera-frame point into the shower frame.
    #[must_use]
    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        let (sin, cos) = self.rotation.sin_cos();
        let tx = x + self.offset_x;
        let ty = y + self.offset_y;
        (cos * tx - sin * ty, sin * tx + cos * ty)
    }

    /// Map a shower-frame point back into the camera frame.
    #[must_use]
    pub fn invert(&self, x: f64, y: f64) -> (f64, f64) {
        let (sin, cos) = self.rotation.sin_cos();
        let rx = cos * x + sin * y;
        let ry = -sin * x + cos * y;
        (rx - self.offset_x, ry - self.offset_y)
    }

    /// Transform every pixel position, preserving order.
    #[must_use]
    pub fn transform_pixels(&self, pixels: &[PixelPosition]) -> Vec<[f64; 2]> {
        pixels
            .iter()
            .map(|p| {
                let (x, y) = self.apply(p.x, p.y);
                [x, y]
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::f64::consts::PI;

    #[test]
    fn test_metadata_from_shower() {
        let alignment = ShowerAlignment::from_shower(&ShowerGeometry::new(12.0, -4.0, 0.3)).unwrap();
        assert_abs_diff_eq!(alignment.rotation, 0.3 + FRAC_PI_2);
        assert_abs_diff_eq!(alignment.offset_x, -12.0);
        assert_abs_diff_eq!(alignment.offset_y, 4.0);
    }

    #[test]
    fn test_centroid_maps_to_origin() {
        let alignment = ShowerAlignment::from_shower(&ShowerGeometry::new(30.0, 40.0, 1.1)).unwrap();
        let (x, y) = alignment.apply(30.0, 40.0);
        assert_abs_diff_eq!(x, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(y, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_major_axis_becomes_vertical() {
        // psi = 0: the major axis lies along +x and is rotated by 90 degrees.
        let alignment = ShowerAlignment::from_shower(&ShowerGeometry::new(0.0, 0.0, 0.0)).unwrap();
        let (x, y) = alignment.apply(10.0, 0.0);
        assert_abs_diff_eq!(x, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(y, 10.0, epsilon = 1e-12);
    }

    #[test]
    fn test_invert_round_trip() {
        let alignment =
            ShowerAlignment::from_shower(&ShowerGeometry::new(-55.0, 17.5, -2.0 * PI / 3.0))
                .unwrap();
        let (ax, ay) = alignment.apply(123.0, -98.0);
        let (x, y) = alignment.invert(ax, ay);
        assert_abs_diff_eq!(x, 123.0, epsilon = 1e-9);
        assert_abs_diff_eq!(y, -98.0, epsilon = 1e-9);
    }

    #[test]
    fn test_non_finite_geometry_rejected() {
        assert!(ShowerAlignment::from_shower(&ShowerGeometry::new(f64::NAN, 0.0, 0.0)).is_none());
        assert!(ShowerAlignment::from_shower(&ShowerGeometry::new(0.0, f64::INFINITY, 0.0)).is_none());
        assert!(ShowerAlignment::from_shower(&ShowerGeometry::new(0.0, 0.0, f64::NAN)).is_none());
    }

    #[test]
    fn test_header_round_trip() {
        let header = FrameHeader {
            rotation: 0.7,
            offset_x: 1.0,
            offset_y: -2.0,
            simulation: None,
        };
        let alignment = ShowerAlignment::from_header(&header);
        assert_abs_diff_eq!(alignment.rotation, 0.7);
        assert_abs_diff_eq!(alignment.offset_y, -2.0);
    }
}
