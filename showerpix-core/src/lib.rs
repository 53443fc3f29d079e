//! showerpix-core: Core types for shower-aligned camera image datasets.
//!
//! This crate provides the camera geometry, calibrated event and frame
//! models shared by the resampling algorithms and the dataset I/O crates,
//! together with the pipeline configuration and error types.
//!

pub mod config;
pub mod error;
pub mod event;
pub mod frame;
pub mod geometry;

pub use config::{GridConfig, PipelineConfig};
pub use error::{ConfigError, Error, LatticeError, Result};
pub use event::{CalibratedEvent, EventSource, IterSource, ShowerGeometry};
pub use frame::{
    FrameHeader, FrameShape, HeaderField, HeaderSchema, Requirement, ResampledFrame,
    SimulationTruth,
};
pub use geometry::{CameraGeometry, LatticeBasis, PixelPosition};
