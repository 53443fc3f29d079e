//! Pipeline configuration, built once and passed by reference to every stage.

use crate::error::ConfigError;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Physical sampling grid of the resampled images.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    /// Half width of the square image region (mm); the grid spans
    /// `[-half_extent_mm, half_extent_mm]` along both axes.
    pub half_extent_mm: f64,
    /// Points per axis `(u, v)`. `None` uses the pixel lattice extent.
    pub points: Option<(usize, usize)>,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            half_extent_mm: 504.0,
            points: None,
        }
    }
}

/// Configuration of the materialization pipeline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Pixels excluded from the image. They anchor the interpolation with zero
    /// amplitude at their aligned positions.
    pub excluded_pixels: Vec<usize>,
    pub grid: GridConfig,
    /// Keep only events where some active pixel exceeds baseline by more than
    /// this many ADC counts.
    pub min_adc: Option<f64>,
    /// Attach simulation truth to every frame.
    pub simulated: bool,
    /// Log progress every this many frames.
    pub progress_every: usize,
    /// Stop after this many input events.
    pub max_events: Option<usize>,
    /// Worker threads for event processing; `None` processes sequentially.
    pub parallelism: Option<usize>,
    /// Upper bound on events buffered per parallel chunk.
    pub chunk_events: usize,
    /// Fraction of available memory a parallel chunk may occupy.
    pub memory_fraction: f64,
    /// `fsync` the dataset after each appended frame.
    pub sync_every_frame: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            excluded_pixels: Vec::new(),
            grid: GridConfig::default(),
            min_adc: None,
            simulated: false,
            progress_every: 100,
            max_events: None,
            parallelism: None,
            chunk_events: 256,
            memory_fraction: 0.25,
            sync_every_frame: false,
        }
    }
}

impl PipelineConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a JSON file and validate it.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let config: Self = serde_json::from_reader(BufReader::new(file))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON string and validate it.
    ///
    /// # Errors
    /// Returns an error if the string cannot be parsed or validated.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    #[must_use]
    pub fn with_excluded_pixels(mut self, pixels: Vec<usize>) -> Self {
        self.excluded_pixels = pixels;
        self
    }

    #[must_use]
    pub fn with_half_extent_mm(mut self, half_extent_mm: f64) -> Self {
        self.grid.half_extent_mm = half_extent_mm;
        self
    }

    #[must_use]
    pub fn with_grid_points(mut self, n_u: usize, n_v: usize) -> Self {
        self.grid.points = Some((n_u, n_v));
        self
    }

    #[must_use]
    pub fn with_min_adc(mut self, min_adc: f64) -> Self {
        self.min_adc = Some(min_adc);
        self
    }

    #[must_use]
    pub fn with_simulated(mut self, simulated: bool) -> Self {
        self.simulated = simulated;
        self
    }

    #[must_use]
    pub fn with_progress_every(mut self, frames: usize) -> Self {
        self.progress_every = frames;
        self
    }

    #[must_use]
    pub fn with_max_events(mut self, max_events: usize) -> Self {
        self.max_events = Some(max_events);
        self
    }

    #[must_use]
    pub fn with_parallelism(mut self, threads: usize) -> Self {
        self.parallelism = Some(threads);
        self
    }

    #[must_use]
    pub fn with_chunk_events(mut self, events: usize) -> Self {
        self.chunk_events = events;
        self
    }

    #[must_use]
    pub fn with_memory_fraction(mut self, fraction: f64) -> Self {
        self.memory_fraction = fraction;
        self
    }

    #[must_use]
    pub fn with_sync_every_frame(mut self, sync: bool) -> Self {
        self.sync_every_frame = sync;
        self
    }

    /// Check value ranges that do not depend on the camera.
    ///
    /// # Errors
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        let half = self.grid.half_extent_mm;
        if !(half.is_finite() && half > 0.0) {
            return Err(ConfigError::InvalidHalfExtent(half));
        }
        if let Some((n_u, n_v)) = self.grid.points {
            if n_u < 2 || n_v < 2 {
                return Err(ConfigError::InvalidGridPoints(n_u, n_v));
            }
        }
        if let Some(min_adc) = self.min_adc {
            if !min_adc.is_finite() {
                return Err(ConfigError::InvalidMinAmplitude(min_adc));
            }
        }
        if self.progress_every == 0 {
            return Err(ConfigError::InvalidProgressInterval);
        }
        if self.chunk_events == 0 {
            return Err(ConfigError::InvalidChunkSize);
        }
        if self.parallelism == Some(0) {
            return Err(ConfigError::InvalidParallelism);
        }
        if !(0.0 < self.memory_fraction && self.memory_fraction <= 1.0) {
            return Err(ConfigError::InvalidMemoryFraction(self.memory_fraction));
        }
        Ok(())
    }

    /// Validate against a camera with `n_pixels` pixels.
    ///
    /// # Errors
    /// Returns the first [`ConfigError`] found.
    pub fn validate_for_camera(&self, n_pixels: usize) -> std::result::Result<(), ConfigError> {
        self.validate()?;
        if let Some(&pixel) = self.excluded_pixels.iter().find(|&&p| p >= n_pixels) {
            return Err(ConfigError::ExcludedPixelOutOfRange { pixel, n_pixels });
        }
        Ok(())
    }

    /// Returns true when events should be processed on a worker pool.
    #[must_use]
    pub fn use_parallel(&self) -> bool {
        self.parallelism.unwrap_or(1) > 1
    }
}
