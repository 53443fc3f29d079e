//! Mapping of hexagonal pixel positions onto an integer lattice.
//!
//! Positions are expressed in the skewed basis spanned by the two lattice
//! vectors, shifted so the smallest coordinate is zero, and snapped to the
//! nearest third of a lattice step (round half to even). The integer
//! coordinate is the snapped value in units of thirds, which keeps the mapping
//! exact even when the input carries floating-point noise.

use ndarray::Array2;
use showerpix_core::{CameraGeometry, LatticeBasis, LatticeError, PixelPosition};
use std::collections::HashMap;

/// Relative tolerance below which the basis is considered degenerate.
const DEGENERATE_BASIS_EPS: f64 = 1e-9;

/// Integer lattice cell of one pixel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LatticeCoordinate {
    pub u: u32,
    pub v: u32,
}

/// Snap `value` to the nearest multiple of 1/3 and return it in thirds.
///
/// Exact halves resolve to the even neighbour: `0.5` is 1.5 thirds and maps to
/// 2, `1.5` is 4.5 thirds and maps to 4.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn quantize_thirds(value: f64) -> i64 {
    (value * 3.0).round_ties_even() as i64
}

/// Integer coordinates of every pixel plus the dense grid extent they span.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PixelLattice {
    coords: Vec<LatticeCoordinate>,
    extent: (usize, usize),
}

impl PixelLattice {
    /// Maps the pixels of `geometry` using its own basis.
    ///
    /// # Errors
    /// See [`PixelLatticeMapper::map`].
    pub fn from_geometry(geometry: &CameraGeometry) -> Result<Self, LatticeError> {
        PixelLatticeMapper::new(*geometry.basis()).map(geometry.pixels())
    }

    /// Lattice coordinate of each pixel, indexed by pixel id.
    #[must_use]
    pub fn coords(&self) -> &[LatticeCoordinate] {
        &self.coords
    }

    #[must_use]
    pub fn coord(&self, pixel: usize) -> Option<LatticeCoordinate> {
        self.coords.get(pixel).copied()
    }

    /// Grid extent `(max(u) + 1, max(v) + 1)`.
    #[must_use]
    pub fn extent(&self) -> (usize, usize) {
        self.extent
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.coords.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.coords.is_empty()
    }

    /// Occupancy mask of the lattice cells holding a non-excluded pixel.
    ///
    /// Excluded ids outside the camera are ignored.
    #[must_use]
    pub fn used_pixel_mask(&self, excluded: &[usize]) -> Array2<bool> {
        let mut mask = Array2::from_elem(self.extent, false);
        for (pixel, c) in self.coords.iter().enumerate() {
            if !excluded.contains(&pixel) {
                mask[[c.u as usize, c.v as usize]] = true;
            }
        }
        mask
    }
}

/// Converts physical pixel positions into unique lattice coordinates.
#[derive(Clone, Copy, Debug)]
pub struct PixelLatticeMapper {
    basis: LatticeBasis,
}

impl PixelLatticeMapper {
    #[must_use]
    pub fn new(basis: LatticeBasis) -> Self {
        Self { basis }
    }

    /// Real-valued coordinates of `(x, y)` in the lattice basis.
    fn skew_coordinates(&self, x: f64, y: f64, det: f64) -> (f64, f64) {
        let [a0, a1] = self.basis.a;
        let [b0, b1] = self.basis.b;
        ((x * b1 - b0 * y) / det, (a0 * y - x * a1) / det)
    }

    fn checked_determinant(&self) -> Result<f64, LatticeError> {
        let det = self.basis.determinant();
        let norm_a = self.basis.a[0].hypot(self.basis.a[1]);
        let norm_b = self.basis.b[0].hypot(self.basis.b[1]);
        if !det.is_finite() || det.abs() <= DEGENERATE_BASIS_EPS * norm_a * norm_b {
            return Err(LatticeError::DegenerateBasis { determinant: det });
        }
        Ok(det)
    }

    /// Map every pixel to a lattice cell.
    ///
    /// The result is a pure function of the input: identical positions always
    /// produce identical coordinates.
    ///
    /// # Errors
    /// Returns [`LatticeError::Collision`] if two pixels share a cell, and
    /// rejects empty input, non-finite positions and a degenerate basis.
    pub fn map(&self, pixels: &[PixelPosition]) -> Result<PixelLattice, LatticeError> {
        if pixels.is_empty() {
            return Err(LatticeError::Empty);
        }
        let det = self.checked_determinant()?;

        let mut skew = Vec::with_capacity(pixels.len());
        for (pixel, p) in pixels.iter().enumerate() {
            if !(p.x.is_finite() && p.y.is_finite()) {
                return Err(LatticeError::NonFinitePosition { pixel });
            }
            skew.push(self.skew_coordinates(p.x, p.y, det));
        }

        let min_n1 = skew.iter().map(|s| s.0).fold(f64::INFINITY, f64::min);
        let min_n2 = skew.iter().map(|s| s.1).fold(f64::INFINITY, f64::min);

        let mut coords = Vec::with_capacity(pixels.len());
        let mut occupied: HashMap<LatticeCoordinate, usize> = HashMap::with_capacity(skew.len());
        let (mut max_u, mut max_v) = (0u32, 0u32);

        for (pixel, &(n1, n2)) in skew.iter().enumerate() {
            let coord = LatticeCoordinate {
                u: to_cell(quantize_thirds(n1 - min_n1)),
                v: to_cell(quantize_thirds(n2 - min_n2)),
            };
            if let Some(&first) = occupied.get(&coord) {
                return Err(LatticeError::Collision {
                    first,
                    second: pixel,
                    u: coord.u,
                    v: coord.v,
                });
            }
            occupied.insert(coord, pixel);
            max_u = max_u.max(coord.u);
            max_v = max_v.max(coord.v);
            coords.push(coord);
        }

        Ok(PixelLattice {
            coords,
            extent: (max_u as usize + 1, max_v as usize + 1),
        })
    }
}

/// Shifted coordinates are non-negative by construction.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn to_cell(thirds: i64) -> u32 {
    thirds.max(0) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantize_half_to_even() {
        assert_eq!(quantize_thirds(0.5), 2);
        assert_eq!(quantize_thirds(1.5), 4);
        assert_eq!(quantize_thirds(2.5), 8);
        assert_eq!(quantize_thirds(0.0), 0);
    }

    #[test]
    fn test_quantize_absorbs_noise() {
        assert_eq!(quantize_thirds(0.999_999_9), 3);
        assert_eq!(quantize_thirds(1.000_000_1), 3);
        assert_eq!(quantize_thirds(1.0 / 3.0), 1);
        assert_eq!(quantize_thirds(2.0 / 3.0 - 1e-9), 2);
    }

    #[test]
    fn test_single_ring_layout() {
        let geometry = CameraGeometry::hexagonal(1, 10.0);
        let lattice = PixelLattice::from_geometry(&geometry).unwrap();
        assert_eq!(lattice.len(), 7);
        // Skew coordinates span 0..=2 along both axes, i.e. 0..=6 thirds.
        assert_eq!(lattice.extent(), (7, 7));
        // Central pixel sits at skew (1, 1).
        assert_eq!(lattice.coord(3), Some(LatticeCoordinate { u: 3, v: 3 }));
    }

    #[test]
    fn test_collision_is_fatal() {
        let pixels = vec![
            PixelPosition::new(0, 0.0, 0.0),
            PixelPosition::new(1, 10.0, 0.0),
            PixelPosition::new(2, 10.0 + 1e-9, 0.0),
        ];
        let mapper = PixelLatticeMapper::new(LatticeBasis::hexagonal(10.0));
        assert_eq!(
            mapper.map(&pixels),
            Err(LatticeError::Collision {
                first: 1,
                second: 2,
                u: 3,
                v: 0
            })
        );
    }

    #[test]
    fn test_degenerate_basis() {
        let mapper = PixelLatticeMapper::new(LatticeBasis::new([1.0, 1.0], [2.0, 2.0]));
        let pixels = vec![PixelPosition::new(0, 0.0, 0.0)];
        assert!(matches!(
            mapper.map(&pixels),
            Err(LatticeError::DegenerateBasis { .. })
        ));
    }

    #[test]
    fn test_non_finite_position() {
        let mapper = PixelLatticeMapper::new(LatticeBasis::hexagonal(10.0));
        let pixels = vec![
            PixelPosition::new(0, 0.0, 0.0),
            PixelPosition::new(1, f64::NAN, 0.0),
        ];
        assert_eq!(
            mapper.map(&pixels),
            Err(LatticeError::NonFinitePosition { pixel: 1 })
        );
    }

    #[test]
    fn test_empty_geometry() {
        let mapper = PixelLatticeMapper::new(LatticeBasis::hexagonal(10.0));
        assert_eq!(mapper.map(&[]), Err(LatticeError::Empty));
    }

    #[test]
    fn test_used_pixel_mask() {
        let geometry = CameraGeometry::hexagonal(1, 10.0);
        let lattice = PixelLattice::from_geometry(&geometry).unwrap();
        let mask = lattice.used_pixel_mask(&[0, 99]);
        assert_eq!(mask.iter().filter(|&&used| used).count(), 6);
        let c0 = lattice.coord(0).unwrap();
        assert!(!mask[[c0.u as usize, c0.v as usize]]);
    }
}
