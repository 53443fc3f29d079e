//! Static camera geometry: pixel positions and the hexagonal lattice basis.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Physical position of one camera pixel, in millimeters.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PixelPosition {
    /// Pixel index in camera order.
    pub id: usize,
    /// Horizontal position (mm).
    pub x: f64,
    /// Vertical position (mm).
    pub y: f64,
}

impl PixelPosition {
    #[must_use]
    pub fn new(id: usize, x: f64, y: f64) -> Self {
        Self { id, x, y }
    }
}

/// The two basis directions of the hexagonal pixel arrangement (mm).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LatticeBasis {
    pub a: [f64; 2],
    pub b: [f64; 2],
}

impl LatticeBasis {
    #[must_use]
    pub fn new(a: [f64; 2], b: [f64; 2]) -> Self {
        Self { a, b }
    }

    /// Basis of a hexagonal lattice with the given pixel pitch, the first
    /// vector along +x and the second at 60 degrees.
    #[must_use]
    pub fn hexagonal(pitch_mm: f64) -> Self {
        Self {
            a: [pitch_mm, 0.0],
            b: [0.5 * pitch_mm, 0.5 * 3.0_f64.sqrt() * pitch_mm],
        }
    }

    /// Determinant of the matrix whose columns are the basis vectors.
    #[must_use]
    pub fn determinant(&self) -> f64 {
        self.a[0] * self.b[1] - self.b[0] * self.a[1]
    }
}

/// Immutable camera description shared by every stage of the pipeline.
#[derive(Clone, Debug, PartialEq)]
pub struct CameraGeometry {
    pixels: Vec<PixelPosition>,
    basis: LatticeBasis,
}

#[derive(Deserialize)]
struct JsonConfig {
    camera: JsonCamera,
}

#[derive(Deserialize)]
struct JsonCamera {
    lattice_basis: [[f64; 2]; 2],
    pixels: Vec<PixelPosition>,
}

impl CameraGeometry {
    /// Builds a geometry from pixel positions.
    ///
    /// Pixels are re-ordered by id; ids must be exactly `0..N`.
    ///
    /// # Errors
    /// Returns [`Error::Geometry`] if ids are missing or duplicated.
    pub fn new(mut pixels: Vec<PixelPosition>, basis: LatticeBasis) -> Result<Self> {
        pixels.sort_by_key(|p| p.id);
        for (expected, pixel) in pixels.iter().enumerate() {
            if pixel.id != expected {
                return Err(Error::Geometry(format!(
                    "pixel ids must be contiguous from 0; expected {expected}, found {}",
                    pixel.id
                )));
            }
        }
        Ok(Self { pixels, basis })
    }

    /// Hexagonal camera with `rings` rings around a central pixel.
    ///
    /// Pixels are enumerated row by row (ascending y, then ascending x).
    #[must_use]
    #[allow(clippy::cast_possible_wrap, clippy::cast_lossless)]
    pub fn hexagonal(rings: u32, pitch_mm: f64) -> Self {
        let basis = LatticeBasis::hexagonal(pitch_mm);
        let n = rings as i64;
        let mut pixels = Vec::new();
        for r in -n..=n {
            for q in -n..=n {
                if (q + r).abs() > n {
                    continue;
                }
                #[allow(clippy::cast_precision_loss)]
                let (qf, rf) = (q as f64, r as f64);
                let x = qf * basis.a[0] + rf * basis.b[0];
                let y = qf * basis.a[1] + rf * basis.b[1];
                pixels.push(PixelPosition::new(pixels.len(), x, y));
            }
        }
        Self { pixels, basis }
    }

    /// Load geometry from a JSON file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let json_config: JsonConfig = serde_json::from_reader(reader)?;
        Self::from_json_config(json_config)
    }

    /// Load geometry from a JSON string.
    ///
    /// # Errors
    /// Returns an error if the string cannot be parsed or validated.
    pub fn from_json(json: &str) -> Result<Self> {
        let json_config: JsonConfig = serde_json::from_str(json)?;
        Self::from_json_config(json_config)
    }

    fn from_json_config(config: JsonConfig) -> Result<Self> {
        let [a, b] = config.camera.lattice_basis;
        Self::new(config.camera.pixels, LatticeBasis::new(a, b))
    }

    #[must_use]
    pub fn pixels(&self) -> &[PixelPosition] {
        &self.pixels
    }

    #[must_use]
    pub fn basis(&self) -> &LatticeBasis {
        &self.basis
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }
}
