//! JSON-lines event source.
//!
//! Each non-blank line holds one event:
//!
//! ```json
//! {"event_id": 7, "samples": [[...], ...], "hardware_baseline": [...],
//!  "estimated_baseline": [...], "geometry": {"cen_x": 1.0, "cen_y": 2.0, "psi": 0.3},
//!  "truth": {"energy": 1.0, ...}}
//! ```
//!
//! `samples` is `[pixel][sample]`; every key other than `event_id` and
//! `samples` is optional.

use crate::Result;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use showerpix_core::{CalibratedEvent, EventSource, ShowerGeometry, SimulationTruth};
use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::Path;

#[derive(Serialize, Deserialize)]
struct JsonEvent {
    event_id: u64,
    samples: Vec<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    hardware_baseline: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    estimated_baseline: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    geometry: Option<ShowerGeometry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    truth: Option<SimulationTruth>,
}

impl JsonEvent {
    fn into_event(self) -> std::result::Result<CalibratedEvent, String> {
        let n_pixels = self.samples.len();
        let n_samples = self.samples.first().map_or(0, Vec::len);
        if let Some(row) = self.samples.iter().position(|r| r.len() != n_samples) {
            return Err(format!(
                "pixel {row} has {} samples, expected {n_samples}",
                self.samples[row].len()
            ));
        }
        let flat: Vec<f64> = self.samples.into_iter().flatten().collect();
        let samples = Array2::from_shape_vec((n_pixels, n_samples), flat)
            .map_err(|e| e.to_string())?;

        let mut event = CalibratedEvent::new(self.event_id, samples);
        event.hardware_baseline = self.hardware_baseline.map(Array1::from);
        event.estimated_baseline = self.estimated_baseline.map(Array1::from);
        event.geometry = self.geometry;
        event.truth = self.truth;
        Ok(event)
    }

    fn from_event(event: &CalibratedEvent) -> Self {
        Self {
            event_id: event.event_id,
            samples: event.samples.outer_iter().map(|row| row.to_vec()).collect(),
            hardware_baseline: event.hardware_baseline.as_ref().map(Array1::to_vec),
            estimated_baseline: event.estimated_baseline.as_ref().map(Array1::to_vec),
            geometry: event.geometry,
            truth: event.truth,
        }
    }
}

/// Serialize `event` as one JSON line (without the trailing newline).
///
/// # Errors
/// Returns an error if serialization fails.
pub fn event_to_json_line(event: &CalibratedEvent) -> Result<String> {
    Ok(serde_json::to_string(&JsonEvent::from_event(event))?)
}

/// Reads calibrated events from JSON lines.
pub struct JsonLinesEventSource<R> {
    lines: Option<Lines<R>>,
    line_no: usize,
}

impl JsonLinesEventSource<BufReader<File>> {
    /// # Errors
    /// Returns an error if the file cannot be opened.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::from_reader(BufReader::new(File::open(path)?)))
    }
}

impl<R: BufRead> JsonLinesEventSource<R> {
    pub fn from_reader(reader: R) -> Self {
        Self {
            lines: Some(reader.lines()),
            line_no: 0,
        }
    }

    /// Whether [`EventSource::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lines.is_none()
    }
}

impl<R: BufRead> Iterator for JsonLinesEventSource<R> {
    type Item = showerpix_core::Result<CalibratedEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        let lines = self.lines.as_mut()?;
        loop {
            let line = match lines.next()? {
                Ok(line) => line,
                Err(e) => return Some(Err(e.into())),
            };
            self.line_no += 1;
            if line.trim().is_empty() {
                continue;
            }
            let line_no = self.line_no;
            let parsed = serde_json::from_str::<JsonEvent>(&line)
                .map_err(|e| showerpix_core::Error::Source(format!("line {line_no}: {e}")))
                .and_then(|json| {
                    json.into_event().map_err(|reason| {
                        showerpix_core::Error::Source(format!("line {line_no}: {reason}"))
                    })
                });
            return Some(parsed);
        }
    }
}

impl<R: BufRead> EventSource for JsonLinesEventSource<R> {
    fn close(&mut self) -> showerpix_core::Result<()> {
        if self.lines.take().is_some() {
            log::debug!("event source closed after {} lines", self.line_no);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_parse_lines() {
        let input = r#"{"event_id": 1, "samples": [[1.0, 2.0], [3.0, 4.0]], "hardware_baseline": [0.5, 0.5]}

{"event_id": 2, "samples": [[5.0, 6.0], [7.0, 8.0]], "geometry": {"cen_x": 1.0, "cen_y": -2.0, "psi": 0.25}}
"#;
        let mut source = JsonLinesEventSource::from_reader(Cursor::new(input));
        let first = source.next().unwrap().unwrap();
        assert_eq!(first.event_id, 1);
        assert_eq!(first.samples[[1, 0]], 3.0);
        assert!(first.hardware_baseline.is_some());
        assert!(first.geometry.is_none());

        let second = source.next().unwrap().unwrap();
        assert_eq!(second.geometry, Some(ShowerGeometry::new(1.0, -2.0, 0.25)));
        assert!(source.next().is_none());
    }

    #[test]
    fn test_ragged_samples_rejected() {
        let input = r#"{"event_id": 3, "samples": [[1.0, 2.0], [3.0]]}"#;
        let mut source = JsonLinesEventSource::from_reader(Cursor::new(input));
        let err = source.next().unwrap().unwrap_err();
        assert!(err.to_string().contains("line 1"));
    }

    #[test]
    fn test_close_stops_iteration() {
        let input = "{\"event_id\": 1, \"samples\": [[1.0]]}\n{\"event_id\": 2, \"samples\": [[1.0]]}\n";
        let mut source = JsonLinesEventSource::from_reader(Cursor::new(input));
        assert!(source.next().is_some());
        source.close().unwrap();
        assert!(source.is_closed());
        assert!(source.next().is_none());
    }

    #[test]
    fn test_event_json_line_round_trip() {
        let event = CalibratedEvent::new(9, Array2::from_shape_vec((2, 3), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap())
            .with_estimated_baseline(Array1::from(vec![0.4, 0.6]))
            .with_geometry(ShowerGeometry::new(3.0, 4.0, -1.0));
        let line = event_to_json_line(&event).unwrap();
        let mut source = JsonLinesEventSource::from_reader(Cursor::new(line));
        assert_eq!(source.next().unwrap().unwrap(), event);
    }
}
