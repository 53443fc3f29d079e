//! Scattered-to-grid resampling of per-pixel waveforms.
//!
//! The interpolant depends only on pixel positions, which do not change
//! between the samples of one event. The triangulation and the barycentric
//! stencil of every grid point are therefore built once per event and reused
//! for each time sample; evaluating a fixed stencil gives the same values as
//! rebuilding the same triangulation per sample.

use crate::triangulation::{Triangulation, Vertex3};
use ndarray::{Array2, Array3, ArrayView2, Axis};

/// Value assigned to grid points outside the convex hull of the input.
pub const FILL_VALUE: f64 = 0.0;

/// Regular grid of physical sampling points.
///
/// Cell `[i, j]` is located at `(xs[i], ys[j])`.
#[derive(Clone, Debug, PartialEq)]
pub struct TargetGrid {
    xs: Vec<f64>,
    ys: Vec<f64>,
}

impl TargetGrid {
    /// Grid with `n_u` points evenly spanning `x_range` (inclusive) and `n_v`
    /// points spanning `y_range`.
    #[must_use]
    pub fn new(x_range: (f64, f64), y_range: (f64, f64), n_u: usize, n_v: usize) -> Self {
        Self {
            xs: linspace(x_range.0, x_range.1, n_u),
            ys: linspace(y_range.0, y_range.1, n_v),
        }
    }

    /// Square grid spanning `[-half_extent, half_extent]` on both axes.
    #[must_use]
    pub fn square(half_extent: f64, n_u: usize, n_v: usize) -> Self {
        Self::new((-half_extent, half_extent), (-half_extent, half_extent), n_u, n_v)
    }

    #[must_use]
    pub fn xs(&self) -> &[f64] {
        &self.xs
    }

    #[must_use]
    pub fn ys(&self) -> &[f64] {
        &self.ys
    }

    /// `(n_u, n_v)`.
    #[must_use]
    pub fn shape(&self) -> (usize, usize) {
        (self.xs.len(), self.ys.len())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.xs.len() * self.ys.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[allow(clippy::cast_precision_loss)]
fn linspace(start: f64, stop: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (stop - start) / (n - 1) as f64;
            (0..n)
                .map(|i| if i == n - 1 { stop } else { start + i as f64 * step })
                .collect()
        }
    }
}

/// Interpolation stencils of every grid point for one set of positions.
#[derive(Clone, Debug)]
pub struct InterpolationWeights {
    shape: (usize, usize),
    stencils: Array2<Option<Vertex3>>,
}

impl InterpolationWeights {
    /// Locate every grid point in the triangulation of `positions`.
    #[must_use]
    pub fn build(positions: &[[f64; 2]], grid: &TargetGrid) -> Self {
        let triangulation = Triangulation::new(positions);
        let mut stencils: Array2<Option<Vertex3>> = Array2::from_elem(grid.shape(), None);

        for t in 0..triangulation.len() {
            let (x_min, x_max, y_min, y_max) = triangulation.triangle_bounds(t);
            let i_range = index_range(grid.xs(), x_min, x_max);
            let j_range = index_range(grid.ys(), y_min, y_max);
            for i in i_range {
                for j in j_range.clone() {
                    if stencils[[i, j]].is_some() {
                        continue;
                    }
                    stencils[[i, j]] = triangulation.barycentric(t, grid.xs()[i], grid.ys()[j]);
                }
            }
        }

        Self {
            shape: grid.shape(),
            stencils,
        }
    }

    /// Number of grid points inside the convex hull.
    #[must_use]
    pub fn covered(&self) -> usize {
        self.stencils.iter().filter(|s| s.is_some()).count()
    }

    #[must_use]
    pub fn is_covered(&self, i: usize, j: usize) -> bool {
        self.stencils[[i, j]].is_some()
    }

    /// Interpolate one set of point values onto the grid.
    #[must_use]
    pub fn evaluate(&self, values: &[f64]) -> Array2<f64> {
        self.stencils.map(|stencil| {
            stencil
                .as_ref()
                .map_or(FILL_VALUE, |s| s.interpolate(values))
        })
    }
}

/// Indices of sorted `axis` values within `[lo, hi]`, padded by a tolerance.
fn index_range(axis: &[f64], lo: f64, hi: f64) -> std::ops::Range<usize> {
    let pad = 1e-9 * (hi - lo).abs().max(1.0);
    let start = axis.partition_point(|&v| v < lo - pad);
    let end = axis.partition_point(|&v| v <= hi + pad);
    start..end.max(start)
}

/// Piecewise-linear resampler onto a fixed [`TargetGrid`].
#[derive(Clone, Debug)]
pub struct GridResampler {
    grid: TargetGrid,
}

impl GridResampler {
    #[must_use]
    pub fn new(grid: TargetGrid) -> Self {
        Self { grid }
    }

    #[must_use]
    pub fn grid(&self) -> &TargetGrid {
        &self.grid
    }

    /// Stencils for `positions`, reusable across samples of one event.
    #[must_use]
    pub fn weights(&self, positions: &[[f64; 2]]) -> InterpolationWeights {
        InterpolationWeights::build(positions, &self.grid)
    }

    /// Resample `amplitudes` (`[point, sample]`) at `positions`.
    ///
    /// Returns `[n_u, n_v, n_samples]`; points outside the hull are
    /// [`FILL_VALUE`].
    ///
    /// # Panics
    /// Panics if `amplitudes` does not have one row per position.
    #[must_use]
    pub fn resample(&self, positions: &[[f64; 2]], amplitudes: ArrayView2<'_, f64>) -> Array3<f64> {
        assert_eq!(
            positions.len(),
            amplitudes.nrows(),
            "one amplitude row per position"
        );
        let weights = self.weights(positions);
        let (n_u, n_v) = self.grid.shape();
        let mut out = Array3::zeros((n_u, n_v, amplitudes.ncols()));
        for (t, column) in amplitudes.axis_iter(Axis(1)).enumerate() {
            let values = column.to_vec();
            out.index_axis_mut(Axis(2), t).assign(&weights.evaluate(&values));
        }
        out
    }

    /// [`Self::resample`] followed by [`quantize_i16`].
    #[must_use]
    pub fn resample_quantized(
        &self,
        positions: &[[f64; 2]],
        amplitudes: ArrayView2<'_, f64>,
    ) -> Array3<i16> {
        quantize_i16(&self.resample(positions, amplitudes))
    }
}

/// Round half to even and clip to the `i16` range.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn quantize_i16(values: &Array3<f64>) -> Array3<i16> {
    values.mapv(|v| v.round_ties_even().clamp(f64::from(i16::MIN), f64::from(i16::MAX)) as i16)
}
