//! I/O error types.

use crate::split::Partition;
use showerpix_core::FrameShape;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for I/O operations.
pub type Result<T> = std::result::Result<T, Error>;

/// I/O error types.
#[derive(Error, Debug)]
pub enum Error {
    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Memory mapping error.
    #[error("memory mapping error: {0}")]
    Mmap(String),

    /// Worker pool could not be started.
    #[error("thread pool error: {0}")]
    ThreadPool(String),

    /// Invalid file format.
    #[error("invalid file format: {0}")]
    InvalidFormat(String),

    /// The file ends inside a frame record.
    #[error("truncated dataset: {trailing} trailing bytes after {frames} complete frames")]
    Truncated { frames: usize, trailing: usize },

    /// A frame does not match the shape fixed by the first frame.
    #[error("frame shape mismatch: expected {expected}, found {found}")]
    ShapeMismatch {
        expected: FrameShape,
        found: FrameShape,
    },

    /// A frame header does not match the schema fixed by the first frame.
    #[error("header schema mismatch: expected [{expected}], found [{found}]")]
    SchemaMismatch { expected: String, found: String },

    /// The dataset holds no frames.
    #[error("dataset {} contains no frames", .0.display())]
    EmptyDataset(PathBuf),

    /// Unrecognised partition name.
    #[error("unknown partition '{0}' (expected train, validation or test)")]
    UnknownPartition(String),

    /// Requested batch is larger than the partition.
    #[error("batch of {requested} frames requested from {partition} partition with {available}")]
    BatchTooLarge {
        partition: Partition,
        requested: usize,
        available: usize,
    },

    /// Requested sample count is outside `1..=n_samples`.
    #[error("sample count {requested} outside 1..={available}")]
    InvalidSampleCount { requested: usize, available: usize },

    /// Frame index past the end of the dataset.
    #[error("frame index {index} out of range for dataset of {len} frames")]
    FrameIndexOutOfRange { index: usize, len: usize },

    /// JSON (de)serialization failure.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Core library error.
    #[error("core error: {0}")]
    Core(#[from] showerpix_core::Error),

    /// HDF5 library error.
    #[cfg(feature = "hdf5")]
    #[error("HDF5 error: {0}")]
    Hdf5(#[from] hdf5::Error),
}
