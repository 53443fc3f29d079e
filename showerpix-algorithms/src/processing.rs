//! Per-event pipeline: baseline subtraction, alignment and resampling.

use crate::alignment::ShowerAlignment;
use crate::lattice::PixelLattice;
use crate::resample::{GridResampler, TargetGrid};
use ndarray::Array2;
use rayon::prelude::*;
use showerpix_core::{
    CalibratedEvent, CameraGeometry, FrameHeader, FrameShape, HeaderSchema, PipelineConfig,
    ResampledFrame, Result,
};
use std::fmt;
use std::sync::Arc;

/// Why an event produced no frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SkipReason {
    /// Neither a hardware nor an estimated baseline is available.
    MissingBaseline,
    /// No reconstructed shower geometry.
    MissingGeometry,
    /// Centroid or orientation is NaN or infinite.
    NonFiniteGeometry,
    /// No active pixel exceeds the configured minimum amplitude.
    BelowThreshold,
    /// Simulated pipeline, but the event has no truth record.
    MissingSimulationTruth,
}

impl SkipReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MissingBaseline => "missing baseline",
            Self::MissingGeometry => "missing shower geometry",
            Self::NonFiniteGeometry => "non-finite shower geometry",
            Self::BelowThreshold => "below amplitude threshold",
            Self::MissingSimulationTruth => "missing simulation truth",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of processing one event.
#[derive(Clone, Debug, PartialEq)]
pub enum EventOutcome {
    Frame(ResampledFrame),
    Skipped { event_id: u64, reason: SkipReason },
}

/// Turns calibrated events into shower-aligned frames.
///
/// Holds only read-only state, so one processor can serve many threads.
#[derive(Clone, Debug)]
pub struct EventProcessor {
    geometry: Arc<CameraGeometry>,
    lattice: Arc<PixelLattice>,
    config: PipelineConfig,
    resampler: GridResampler,
    active: Vec<usize>,
    excluded: Vec<usize>,
}

impl EventProcessor {
    /// Map the camera onto its lattice and set up the target grid.
    ///
    /// The grid has the lattice extent unless the configuration overrides the
    /// number of points per axis.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid for this camera or the
    /// lattice mapping fails.
    pub fn new(geometry: CameraGeometry, config: PipelineConfig) -> Result<Self> {
        config.validate_for_camera(geometry.len())?;
        let lattice = PixelLattice::from_geometry(&geometry)?;
        let (n_u, n_v) = config.grid.points.unwrap_or_else(|| lattice.extent());
        let grid = TargetGrid::square(config.grid.half_extent_mm, n_u, n_v);

        let mut excluded = config.excluded_pixels.clone();
        excluded.sort_unstable();
        excluded.dedup();
        let active = (0..geometry.len())
            .filter(|p| excluded.binary_search(p).is_err())
            .collect();

        Ok(Self {
            geometry: Arc::new(geometry),
            lattice: Arc::new(lattice),
            config,
            resampler: GridResampler::new(grid),
            active,
            excluded,
        })
    }

    #[must_use]
    pub fn geometry(&self) -> &CameraGeometry {
        &self.geometry
    }

    #[must_use]
    pub fn lattice(&self) -> &PixelLattice {
        &self.lattice
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    #[must_use]
    pub fn resampler(&self) -> &GridResampler {
        &self.resampler
    }

    /// Shape of the frames produced for events with `n_samples` samples.
    #[must_use]
    pub fn frame_shape(&self, n_samples: usize) -> FrameShape {
        let (n_u, n_v) = self.resampler.grid().shape();
        FrameShape::new(n_u, n_v, n_samples)
    }

    /// Header schema of the frames this processor produces.
    #[must_use]
    pub fn header_schema(&self) -> HeaderSchema {
        if self.config.simulated {
            HeaderSchema::simulated()
        } else {
            HeaderSchema::basic()
        }
    }

    /// Process one event.
    ///
    /// Per-event problems are reported as [`EventOutcome::Skipped`].
    ///
    /// # Errors
    /// Returns an error if the event does not match the camera.
    pub fn process(&self, event: &CalibratedEvent) -> Result<EventOutcome> {
        event.check_pixel_count(self.geometry.len())?;
        let skip = |reason: SkipReason| -> Result<EventOutcome> {
            log::debug!("event {}: skipped ({reason})", event.event_id);
            Ok(EventOutcome::Skipped {
                event_id: event.event_id,
                reason,
            })
        };

        let Some(baseline) = event.resolved_baseline() else {
            return skip(SkipReason::MissingBaseline);
        };

        let n_samples = event.n_samples();
        let n_points = self.active.len() + self.excluded.len();
        let mut amplitudes = Array2::<f64>::zeros((n_points, n_samples));
        for (row, &pixel) in self.active.iter().enumerate() {
            let b = baseline[pixel];
            amplitudes
                .row_mut(row)
                .zip_mut_with(&event.samples.row(pixel), |out, &raw| *out = raw - b);
        }

        if let Some(min_adc) = self.config.min_adc {
            let active_rows = amplitudes.slice(ndarray::s![..self.active.len(), ..]);
            if !active_rows.iter().any(|&a| a > min_adc) {
                return skip(SkipReason::BelowThreshold);
            }
        }

        let Some(shower) = event.geometry else {
            return skip(SkipReason::MissingGeometry);
        };
        let Some(alignment) = ShowerAlignment::from_shower(&shower) else {
            return skip(SkipReason::NonFiniteGeometry);
        };

        let simulation = if self.config.simulated {
            match event.truth {
                Some(truth) => Some(truth),
                None => return skip(SkipReason::MissingSimulationTruth),
            }
        } else {
            None
        };

        let pixels = self.geometry.pixels();
        let positions: Vec<[f64; 2]> = self
            .active
            .iter()
            .chain(self.excluded.iter())
            .map(|&p| {
                let (x, y) = alignment.apply(pixels[p].x, pixels[p].y);
                [x, y]
            })
            .collect();

        let data = self
            .resampler
            .resample_quantized(&positions, amplitudes.view());

        Ok(EventOutcome::Frame(ResampledFrame {
            event_id: event.event_id,
            data,
            header: FrameHeader {
                rotation: alignment.rotation,
                offset_x: alignment.offset_x,
                offset_y: alignment.offset_y,
                simulation,
            },
        }))
    }

    /// Process a slice of independent events on the rayon pool.
    ///
    /// Outcomes are returned in input order.
    ///
    /// # Errors
    /// Returns the first error in input order.
    pub fn process_many(&self, events: &[CalibratedEvent]) -> Result<Vec<EventOutcome>> {
        events.par_iter().map(|event| self.process(event)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array1;
    use showerpix_core::{ShowerGeometry, SimulationTruth};

    fn processor(config: PipelineConfig) -> EventProcessor {
        EventProcessor::new(CameraGeometry::hexagonal(3, 10.0), config).unwrap()
    }

    fn event(id: u64, value: f64) -> CalibratedEvent {
        let n = CameraGeometry::hexagonal(3, 10.0).len();
        CalibratedEvent::new(id, Array2::from_elem((n, 4), 100.0 + value))
            .with_hardware_baseline(Array1::from_elem(n, 100.0))
            .with_geometry(ShowerGeometry::new(0.0, 0.0, 0.0))
    }

    #[test]
    fn test_grid_defaults_to_lattice_extent() {
        let p = processor(PipelineConfig::new().with_half_extent_mm(30.0));
        // Three rings span six lattice steps, i.e. 18 thirds.
        assert_eq!(p.lattice().extent(), (19, 19));
        assert_eq!(p.frame_shape(4), FrameShape::new(19, 19, 4));
    }

    #[test]
    fn test_frame_produced() {
        let p = processor(PipelineConfig::new().with_grid_points(9, 9).with_half_extent_mm(12.0));
        let EventOutcome::Frame(frame) = p.process(&event(3, 25.0)).unwrap() else {
            panic!("expected a frame");
        };
        assert_eq!(frame.event_id, 3);
        assert_eq!(frame.shape(), FrameShape::new(9, 9, 4));
        // The whole 24 mm square lies inside a three-ring camera.
        assert!(frame.data.iter().all(|&v| v == 25));
        assert!(frame.header.simulation.is_none());
    }

    #[test]
    fn test_skip_reasons() {
        let p = processor(PipelineConfig::new().with_grid_points(5, 5));
        let mut no_baseline = event(1, 5.0);
        no_baseline.hardware_baseline = None;
        assert_eq!(
            p.process(&no_baseline).unwrap(),
            EventOutcome::Skipped {
                event_id: 1,
                reason: SkipReason::MissingBaseline
            }
        );

        let mut no_geometry = event(2, 5.0);
        no_geometry.geometry = None;
        assert!(matches!(
            p.process(&no_geometry).unwrap(),
            EventOutcome::Skipped {
                reason: SkipReason::MissingGeometry,
                ..
            }
        ));

        let nan = event(3, 5.0).with_geometry(ShowerGeometry::new(f64::NAN, 0.0, 0.0));
        assert!(matches!(
            p.process(&nan).unwrap(),
            EventOutcome::Skipped {
                reason: SkipReason::NonFiniteGeometry,
                ..
            }
        ));
    }

    #[test]
    fn test_min_adc_threshold() {
        let p = processor(PipelineConfig::new().with_grid_points(5, 5).with_min_adc(10.0));
        assert!(matches!(
            p.process(&event(1, 10.0)).unwrap(),
            EventOutcome::Skipped {
                reason: SkipReason::BelowThreshold,
                ..
            }
        ));
        assert!(matches!(
            p.process(&event(2, 10.5)).unwrap(),
            EventOutcome::Frame(_)
        ));
    }

    #[test]
    fn test_simulated_mode_requires_truth() {
        let p = processor(PipelineConfig::new().with_grid_points(5, 5).with_simulated(true));
        assert!(matches!(
            p.process(&event(1, 1.0)).unwrap(),
            EventOutcome::Skipped {
                reason: SkipReason::MissingSimulationTruth,
                ..
            }
        ));
        let truth = SimulationTruth {
            energy: 2.0,
            altitude: 1.2,
            azimuth: 0.0,
            core_x: 10.0,
            core_y: -5.0,
            first_interaction_height: 25_000.0,
        };
        let EventOutcome::Frame(frame) = p.process(&event(2, 1.0).with_truth(truth)).unwrap()
        else {
            panic!("expected a frame");
        };
        assert_eq!(frame.header.simulation, Some(truth));
        assert_eq!(frame.header.schema(), p.header_schema());
    }

    #[test]
    fn test_pixel_count_mismatch_is_fatal() {
        let p = processor(PipelineConfig::new().with_grid_points(5, 5));
        let bad = CalibratedEvent::new(9, Array2::zeros((3, 4)));
        assert!(p.process(&bad).is_err());
    }

    #[test]
    fn test_process_many_preserves_order() {
        let p = processor(PipelineConfig::new().with_grid_points(5, 5));
        let mut events: Vec<CalibratedEvent> = (0..8).map(|i| event(i, 1.0)).collect();
        events[5].geometry = None;
        let outcomes = p.process_many(&events).unwrap();
        let ids: Vec<u64> = outcomes
            .iter()
            .map(|o| match o {
                EventOutcome::Frame(f) => f.event_id,
                EventOutcome::Skipped { event_id, .. } => *event_id,
            })
            .collect();
        assert_eq!(ids, (0..8).collect::<Vec<_>>());
        assert!(matches!(outcomes[5], EventOutcome::Skipped { .. }));
    }
}
