//! Calibrated events as delivered by the upstream processing chain.

use crate::{Error, Result};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::frame::SimulationTruth;

/// Reconstructed shower geometry (Hillas centroid and orientation).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ShowerGeometry {
    /// Centroid x (mm).
    pub cen_x: f64,
    /// Centroid y (mm).
    pub cen_y: f64,
    /// Orientation angle psi (rad).
    pub psi: f64,
}

impl ShowerGeometry {
    #[must_use]
    pub fn new(cen_x: f64, cen_y: f64, psi: f64) -> Self {
        Self { cen_x, cen_y, psi }
    }

    /// Returns true when centroid and angle are all finite.
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.cen_x.is_finite() && self.cen_y.is_finite() && self.psi.is_finite()
    }
}

/// One calibrated camera event.
///
/// Only the fields consumed by the resampling pipeline are modelled.
#[derive(Clone, Debug, PartialEq)]
pub struct CalibratedEvent {
    pub event_id: u64,
    /// Raw ADC samples, `[pixel, sample]`.
    pub samples: Array2<f64>,
    /// Baseline computed by the camera firmware, preferred when present.
    pub hardware_baseline: Option<Array1<f64>>,
    /// Baseline estimated offline; rounded before use.
    pub estimated_baseline: Option<Array1<f64>>,
    pub geometry: Option<ShowerGeometry>,
    pub truth: Option<SimulationTruth>,
}

impl CalibratedEvent {
    /// Event carrying samples only; attach the rest with the `with_*` methods.
    #[must_use]
    pub fn new(event_id: u64, samples: Array2<f64>) -> Self {
        Self {
            event_id,
            samples,
            hardware_baseline: None,
            estimated_baseline: None,
            geometry: None,
            truth: None,
        }
    }

    #[must_use]
    pub fn with_hardware_baseline(mut self, baseline: Array1<f64>) -> Self {
        self.hardware_baseline = Some(baseline);
        self
    }

    #[must_use]
    pub fn with_estimated_baseline(mut self, baseline: Array1<f64>) -> Self {
        self.estimated_baseline = Some(baseline);
        self
    }

    #[must_use]
    pub fn with_geometry(mut self, geometry: ShowerGeometry) -> Self {
        self.geometry = Some(geometry);
        self
    }

    #[must_use]
    pub fn with_truth(mut self, truth: SimulationTruth) -> Self {
        self.truth = Some(truth);
        self
    }

    #[must_use]
    pub fn n_pixels(&self) -> usize {
        self.samples.nrows()
    }

    #[must_use]
    pub fn n_samples(&self) -> usize {
        self.samples.ncols()
    }

    /// Baseline to subtract: the hardware baseline if available, otherwise the
    /// rounded offline estimate.
    #[must_use]
    pub fn resolved_baseline(&self) -> Option<Array1<f64>> {
        self.hardware_baseline.clone().or_else(|| {
            self.estimated_baseline
                .as_ref()
                .map(|b| b.mapv(f64::round_ties_even))
        })
    }

    /// Checks that per-pixel arrays agree with `n_pixels`.
    ///
    /// # Errors
    /// Returns [`Error::InvalidEvent`] on a pixel count mismatch.
    pub fn check_pixel_count(&self, n_pixels: usize) -> Result<()> {
        let mismatch = |what: &str, found: usize| Error::InvalidEvent {
            event_id: self.event_id,
            reason: format!("{what} covers {found} pixels, camera has {n_pixels}"),
        };
        if self.n_pixels() != n_pixels {
            return Err(mismatch("samples", self.n_pixels()));
        }
        if let Some(b) = &self.hardware_baseline {
            if b.len() != n_pixels {
                return Err(mismatch("hardware baseline", b.len()));
            }
        }
        if let Some(b) = &self.estimated_baseline {
            if b.len() != n_pixels {
                return Err(mismatch("estimated baseline", b.len()));
            }
        }
        Ok(())
    }
}

/// A finite, forward-only, closeable stream of calibrated events.
///
/// Per-event problems (missing baseline or geometry) travel inside the event;
/// an `Err` item is a failure of the source itself.
pub trait EventSource: Iterator<Item = Result<CalibratedEvent>> {
    /// Release upstream resources. Called exactly once by the consumer.
    ///
    /// # Errors
    /// Returns an error if the upstream stage fails to shut down cleanly.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Adapts any iterator of events into an [`EventSource`].
pub struct IterSource<I> {
    inner: I,
}

impl<I> IterSource<I>
where
    I: Iterator<Item = CalibratedEvent>,
{
    pub fn new<T: IntoIterator<IntoIter = I>>(events: T) -> Self {
        Self {
            inner: events.into_iter(),
        }
    }
}

impl<I> Iterator for IterSource<I>
where
    I: Iterator<Item = CalibratedEvent>,
{
    type Item = Result<CalibratedEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(Ok)
    }
}

impl<I> EventSource for IterSource<I> where I: Iterator<Item = CalibratedEvent> {}
