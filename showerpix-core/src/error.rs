//! Error types for showerpix-core.

use thiserror::Error;

/// Result type alias for showerpix operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for showerpix operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Camera geometry could not be mapped onto the integer lattice.
    #[error("lattice error: {0}")]
    Lattice(#[from] LatticeError),

    /// Invalid pipeline configuration.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Camera geometry is malformed.
    #[error("geometry error: {0}")]
    Geometry(String),

    /// An event does not match the camera it claims to come from.
    #[error("invalid event {event_id}: {reason}")]
    InvalidEvent { event_id: u64, reason: String },

    /// Header field names do not form a valid schema.
    #[error("invalid header schema: {0}")]
    Schema(String),

    /// Upstream event source failure.
    #[error("event source error: {0}")]
    Source(String),

    /// JSON (de)serialization failure.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// File I/O failure while loading static configuration.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Fatal lattice mapping errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LatticeError {
    /// Two distinct pixels landed on the same lattice cell.
    #[error("pixels {first} and {second} share lattice cell ({u}, {v})")]
    Collision {
        first: usize,
        second: usize,
        u: u32,
        v: u32,
    },

    /// The two basis vectors do not span the plane.
    #[error("lattice basis vectors are degenerate (determinant {determinant})")]
    DegenerateBasis { determinant: f64 },

    /// A pixel position is NaN or infinite.
    #[error("pixel {pixel} has a non-finite position")]
    NonFinitePosition { pixel: usize },

    /// The geometry holds no pixels.
    #[error("camera geometry holds no pixels")]
    Empty,
}

/// Configuration validation errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("grid half extent must be positive and finite, got {0}")]
    InvalidHalfExtent(f64),

    #[error("grid must have at least 2 points per axis, got {0}x{1}")]
    InvalidGridPoints(usize, usize),

    #[error("progress interval must be at least 1")]
    InvalidProgressInterval,

    #[error("chunk size must be at least 1")]
    InvalidChunkSize,

    #[error("parallelism must be at least 1")]
    InvalidParallelism,

    #[error("memory fraction must be in (0.0, 1.0], got {0}")]
    InvalidMemoryFraction(f64),

    #[error("excluded pixel {pixel} is out of range for a camera with {n_pixels} pixels")]
    ExcludedPixelOutOfRange { pixel: usize, n_pixels: usize },

    #[error("minimum amplitude must be finite, got {0}")]
    InvalidMinAmplitude(f64),
}
