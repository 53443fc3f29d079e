//! showerpix-io: Dataset persistence for showerpix.
//!
//! This crate materializes event streams into a fixed-record binary
//! container, reads it back through a memory map, and serves deterministic
//! train / validation / test partitions.
//!

pub mod container;
mod error;
#[cfg(feature = "hdf5")]
pub mod hdf5;
pub mod materialize;
mod reader;
pub mod source;
pub mod split;
mod writer;

pub use error::{Error, Result};
#[cfg(feature = "hdf5")]
pub use crate::hdf5::{read_frames_hdf5, Hdf5FrameSink, Hdf5Frames};
pub use materialize::{materialize, materialize_into, resolve_budget_bytes, MaterializeReport};
pub use reader::{Batch, DatasetReader};
pub use source::{event_to_json_line, JsonLinesEventSource};
pub use split::{Partition, PartitionSplit, SPLIT_SEED};
pub use writer::{DatasetWriter, FrameSink};
