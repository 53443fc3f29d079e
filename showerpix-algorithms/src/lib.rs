//! showerpix-algorithms: Lattice mapping and resampling of camera events.
//!
//! This crate turns calibrated camera events into shower-aligned frames:
//! - **Lattice** - hexagonal pixel positions to unique integer cells
//! - **Alignment** - shower-centred rotation and translation
//! - **Resampling** - Delaunay-based linear interpolation onto a square grid
//! - **Processing** - per-event pipeline with skip reasons
//!

pub mod alignment;
pub mod lattice;
mod processing;
pub mod resample;
pub mod triangulation;

pub use alignment::ShowerAlignment;
pub use lattice::{quantize_thirds, LatticeCoordinate, PixelLattice, PixelLatticeMapper};
pub use processing::{EventOutcome, EventProcessor, SkipReason};
pub use resample::{quantize_i16, GridResampler, InterpolationWeights, TargetGrid, FILL_VALUE};
pub use triangulation::{Triangulation, Vertex3};
