//! Resampled frames and their per-frame scalar header schema.

use crate::{Error, Result};
use ndarray::Array3;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which inputs carry a header field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Requirement {
    /// Present in every frame.
    Always,
    /// Present only when the input is simulated.
    SimulatedOnly,
}

/// Scalar header fields stored alongside every frame.
///
/// All values are stored as `f64`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HeaderField {
    Rotation,
    OffsetX,
    OffsetY,
    Energy,
    Altitude,
    Azimuth,
    CoreX,
    CoreY,
    FirstInteractionHeight,
}

impl HeaderField {
    /// Fields present in every frame, in storage order.
    pub const BASIC: [HeaderField; 3] = [Self::Rotation, Self::OffsetX, Self::OffsetY];

    /// Fields present only for simulated input, in storage order.
    pub const SIMULATION: [HeaderField; 6] = [
        Self::Energy,
        Self::Altitude,
        Self::Azimuth,
        Self::CoreX,
        Self::CoreY,
        Self::FirstInteractionHeight,
    ];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Rotation => "rotation",
            Self::OffsetX => "offset_x",
            Self::OffsetY => "offset_y",
            Self::Energy => "energy",
            Self::Altitude => "altitude",
            Self::Azimuth => "azimuth",
            Self::CoreX => "core_x",
            Self::CoreY => "core_y",
            Self::FirstInteractionHeight => "first_interaction_height",
        }
    }

    #[must_use]
    pub fn unit(self) -> &'static str {
        match self {
            Self::Rotation | Self::Altitude | Self::Azimuth => "rad",
            Self::OffsetX | Self::OffsetY => "mm",
            Self::Energy => "TeV",
            Self::CoreX | Self::CoreY | Self::FirstInteractionHeight => "m",
        }
    }

    #[must_use]
    pub fn requirement(self) -> Requirement {
        match self {
            Self::Rotation | Self::OffsetX | Self::OffsetY => Requirement::Always,
            _ => Requirement::SimulatedOnly,
        }
    }
}

impl fmt::Display for HeaderField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HeaderField {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::BASIC
            .iter()
            .chain(Self::SIMULATION.iter())
            .copied()
            .find(|field| field.name() == s)
            .ok_or_else(|| Error::Schema(format!("unknown header field '{s}'")))
    }
}

/// Ordered set of header fields shared by every frame of a dataset.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeaderSchema {
    fields: Vec<HeaderField>,
}

impl HeaderSchema {
    /// Schema for observed (non-simulated) data.
    #[must_use]
    pub fn basic() -> Self {
        Self {
            fields: HeaderField::BASIC.to_vec(),
        }
    }

    /// Schema for simulated data.
    #[must_use]
    pub fn simulated() -> Self {
        let mut fields = HeaderField::BASIC.to_vec();
        fields.extend_from_slice(&HeaderField::SIMULATION);
        Self { fields }
    }

    /// Rebuild a schema from stored field names.
    ///
    /// # Errors
    /// Returns [`Error::Schema`] for unknown or duplicated names, a missing
    /// required field, or a partial set of simulation fields.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self> {
        let fields = names
            .iter()
            .map(|name| name.as_ref().parse())
            .collect::<Result<Vec<HeaderField>>>()?;
        let schema = Self { fields };
        schema.validate()?;
        Ok(schema)
    }

    fn validate(&self) -> Result<()> {
        for (i, field) in self.fields.iter().enumerate() {
            if self.fields[..i].contains(field) {
                return Err(Error::Schema(format!("duplicate header field '{field}'")));
            }
        }
        for field in HeaderField::BASIC {
            if !self.fields.contains(&field) {
                return Err(Error::Schema(format!(
                    "required header field '{field}' is missing"
                )));
            }
        }
        let n_sim = HeaderField::SIMULATION
            .iter()
            .filter(|field| self.fields.contains(field))
            .count();
        if n_sim != 0 && n_sim != HeaderField::SIMULATION.len() {
            return Err(Error::Schema(
                "simulation fields must be all present or all absent".to_string(),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn fields(&self) -> &[HeaderField] {
        &self.fields
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    #[must_use]
    pub fn is_simulated(&self) -> bool {
        self.fields.contains(&HeaderField::Energy)
    }

    /// Position of `field` in storage order.
    #[must_use]
    pub fn position(&self, field: HeaderField) -> Option<usize> {
        self.fields.iter().position(|&f| f == field)
    }
}

/// Monte Carlo truth attached to simulated events.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimulationTruth {
    /// Primary energy (TeV).
    pub energy: f64,
    /// Pointing altitude (rad).
    pub altitude: f64,
    /// Pointing azimuth (rad).
    pub azimuth: f64,
    /// Shower core position (m).
    pub core_x: f64,
    pub core_y: f64,
    /// Height of first interaction (m).
    pub first_interaction_height: f64,
}

/// Scalar metadata of one frame.
///
/// `rotation`, `offset_x` and `offset_y` are sufficient to undo the shower
/// alignment applied to the frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrameHeader {
    /// Rotation applied, in radians.
    pub rotation: f64,
    /// Horizontal offset applied (mm).
    pub offset_x: f64,
    /// Vertical offset applied (mm).
    pub offset_y: f64,
    pub simulation: Option<SimulationTruth>,
}

impl FrameHeader {
    /// Schema this header conforms to.
    #[must_use]
    pub fn schema(&self) -> HeaderSchema {
        if self.simulation.is_some() {
            HeaderSchema::simulated()
        } else {
            HeaderSchema::basic()
        }
    }

    /// Value of `field`, or `None` for a simulation field on observed data.
    #[must_use]
    pub fn get(&self, field: HeaderField) -> Option<f64> {
        match field {
            HeaderField::Rotation => Some(self.rotation),
            HeaderField::OffsetX => Some(self.offset_x),
            HeaderField::OffsetY => Some(self.offset_y),
            HeaderField::Energy => self.simulation.map(|s| s.energy),
            HeaderField::Altitude => self.simulation.map(|s| s.altitude),
            HeaderField::Azimuth => self.simulation.map(|s| s.azimuth),
            HeaderField::CoreX => self.simulation.map(|s| s.core_x),
            HeaderField::CoreY => self.simulation.map(|s| s.core_y),
            HeaderField::FirstInteractionHeight => {
                self.simulation.map(|s| s.first_interaction_height)
            }
        }
    }

    /// Values in the storage order of `schema`.
    ///
    /// # Errors
    /// Returns [`Error::Schema`] if the header lacks a field of `schema`.
    pub fn values(&self, schema: &HeaderSchema) -> Result<Vec<f64>> {
        schema
            .fields()
            .iter()
            .map(|&field| {
                self.get(field)
                    .ok_or_else(|| Error::Schema(format!("header has no value for '{field}'")))
            })
            .collect()
    }

    /// Rebuild a header from values stored in `schema` order.
    ///
    /// # Errors
    /// Returns [`Error::Schema`] if the value count does not match.
    pub fn from_values(schema: &HeaderSchema, values: &[f64]) -> Result<Self> {
        if values.len() != schema.len() {
            return Err(Error::Schema(format!(
                "expected {} header values, got {}",
                schema.len(),
                values.len()
            )));
        }
        let value = |field| schema.position(field).map(|i| values[i]);
        let required = |field| {
            value(field).ok_or_else(|| Error::Schema(format!("missing header field '{field}'")))
        };
        let simulation = if schema.is_simulated() {
            Some(SimulationTruth {
                energy: required(HeaderField::Energy)?,
                altitude: required(HeaderField::Altitude)?,
                azimuth: required(HeaderField::Azimuth)?,
                core_x: required(HeaderField::CoreX)?,
                core_y: required(HeaderField::CoreY)?,
                first_interaction_height: required(HeaderField::FirstInteractionHeight)?,
            })
        } else {
            None
        };
        Ok(Self {
            rotation: required(HeaderField::Rotation)?,
            offset_x: required(HeaderField::OffsetX)?,
            offset_y: required(HeaderField::OffsetY)?,
            simulation,
        })
    }
}

/// Shape of a frame: grid cells along u and v, and time samples.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FrameShape {
    pub n_u: usize,
    pub n_v: usize,
    pub n_samples: usize,
}

impl FrameShape {
    #[must_use]
    pub fn new(n_u: usize, n_v: usize, n_samples: usize) -> Self {
        Self {
            n_u,
            n_v,
            n_samples,
        }
    }

    /// Number of amplitude values in one frame.
    #[must_use]
    pub fn len(&self) -> usize {
        self.n_u * self.n_v * self.n_samples
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn as_tuple(&self) -> (usize, usize, usize) {
        (self.n_u, self.n_v, self.n_samples)
    }
}

impl fmt::Display for FrameShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.n_u, self.n_v, self.n_samples)
    }
}

/// One shower-aligned image, `[u, v, sample]`, plus its header.
#[derive(Clone, Debug, PartialEq)]
pub struct ResampledFrame {
    /// Upstream event identifier.
    pub event_id: u64,
    pub data: Array3<i16>,
    pub header: FrameHeader,
}

impl ResampledFrame {
    #[must_use]
    pub fn shape(&self) -> FrameShape {
        let (n_u, n_v, n_samples) = self.data.dim();
        FrameShape::new(n_u, n_v, n_samples)
    }
}
