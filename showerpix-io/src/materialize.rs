//! Event stream to dataset materialization.

use crate::writer::{DatasetWriter, FrameSink};
use crate::{Error, Result};
use showerpix_algorithms::{EventOutcome, EventProcessor, SkipReason};
use showerpix_core::{CalibratedEvent, EventSource, FrameShape, PipelineConfig};
use std::collections::BTreeMap;
use std::mem::size_of;
use std::path::Path;
use std::time::{Duration, Instant};
use sysinfo::System;

const MEMORY_OVERHEAD_FACTOR: f64 = 1.2;

/// Summary of one materialization run.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MaterializeReport {
    /// Events pulled from the source.
    pub events_seen: usize,
    pub frames_written: usize,
    pub skipped: BTreeMap<SkipReason, usize>,
    /// Shape of the written frames, if any were written.
    pub shape: Option<FrameShape>,
    pub elapsed: Duration,
}

impl MaterializeReport {
    #[must_use]
    pub fn skipped_total(&self) -> usize {
        self.skipped.values().sum()
    }

    #[must_use]
    pub fn skipped_for(&self, reason: SkipReason) -> usize {
        self.skipped.get(&reason).copied().unwrap_or(0)
    }
}

/// Closes the source on every exit path.
struct SourceGuard<'a, S: EventSource + ?Sized> {
    source: &'a mut S,
    closed: bool,
}

impl<'a, S: EventSource + ?Sized> SourceGuard<'a, S> {
    fn new(source: &'a mut S) -> Self {
        Self {
            source,
            closed: false,
        }
    }

    fn next_event(&mut self) -> Option<showerpix_core::Result<CalibratedEvent>> {
        self.source.next()
    }

    fn close(mut self) -> Result<()> {
        self.closed = true;
        self.source.close()?;
        Ok(())
    }
}

impl<S: EventSource + ?Sized> Drop for SourceGuard<'_, S> {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.source.close() {
                log::warn!("failed to close event source: {e}");
            }
        }
    }
}

/// Resolve the memory budget as a fraction of currently available memory.
///
/// # Errors
/// Returns an error if the fraction is invalid or system memory cannot be queried.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]
pub fn resolve_budget_bytes(memory_fraction: f64) -> Result<usize> {
    if !(0.0 < memory_fraction && memory_fraction <= 1.0) {
        return Err(Error::InvalidFormat(
            "memory_fraction must be in (0.0, 1.0]".to_string(),
        ));
    }
    let mut system = System::new();
    system.refresh_memory();
    let available = system.available_memory();
    if available == 0 {
        return Err(Error::InvalidFormat(
            "available system memory reported as 0".to_string(),
        ));
    }
    let budget = (available as f64 * memory_fraction).floor() as u64;
    Ok(usize::try_from(budget).unwrap_or(usize::MAX))
}

/// Rough peak footprint of one in-flight event: the event, its baseline
/// subtracted copy, the interpolated `f64` cube and the `i16` frame.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]
fn estimate_event_bytes(event: &CalibratedEvent, grid: (usize, usize)) -> usize {
    let raw = event.samples.len() * size_of::<f64>() * 2;
    let cells = grid.0 * grid.1 * event.n_samples();
    let frame = cells * (size_of::<f64>() + size_of::<i16>());
    ((raw + frame) as f64 * MEMORY_OVERHEAD_FACTOR).ceil() as usize
}

/// Number of events to process per parallel chunk.
fn chunk_events(config: &PipelineConfig, budget_bytes: usize, event_bytes: usize) -> usize {
    (budget_bytes / event_bytes.max(1)).clamp(1, config.chunk_events.max(1))
}

/// Dedicated pool for more than one worker; `None` runs on the caller.
fn worker_pool(parallelism: Option<usize>) -> Result<Option<rayon::ThreadPool>> {
    match parallelism {
        Some(threads) if threads > 1 => rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("showerpix-worker-{i}"))
            .build()
            .map(Some)
            .map_err(|e| Error::ThreadPool(e.to_string())),
        _ => Ok(None),
    }
}

/// Materialize `source` into a binary dataset at `path`.
///
/// Any existing file at `path` is replaced.
///
/// # Errors
/// See [`materialize_into`].
pub fn materialize<P, S>(
    path: P,
    source: &mut S,
    processor: &EventProcessor,
) -> Result<MaterializeReport>
where
    P: AsRef<Path>,
    S: EventSource + ?Sized,
{
    let mut writer = DatasetWriter::create(path)?
        .with_expected_grid(processor.resampler().grid().shape())
        .with_sync_every_frame(processor.config().sync_every_frame);
    materialize_into(&mut writer, source, processor)
}

/// Pull every event from `source`, process it and append the frames to
/// `sink` in source order.
///
/// Skipped events are logged and counted. The source is closed exactly once,
/// also when an error ends the run early.
///
/// # Errors
/// Returns source failures, fatal processing errors and sink errors.
pub fn materialize_into<K, S>(
    sink: &mut K,
    source: &mut S,
    processor: &EventProcessor,
) -> Result<MaterializeReport>
where
    K: FrameSink + ?Sized,
    S: EventSource + ?Sized,
{
    let config = processor.config();
    let start = Instant::now();
    let mut guard = SourceGuard::new(source);
    let mut report = MaterializeReport::default();

    let pool = worker_pool(config.parallelism)?;
    let budget = match pool {
        Some(_) => resolve_budget_bytes(config.memory_fraction)?,
        None => 0,
    };
    let grid = processor.resampler().grid().shape();

    let mut chunk: Vec<CalibratedEvent> = Vec::new();
    let mut chunk_len = 1;
    loop {
        chunk.clear();
        while chunk.len() < chunk_len {
            if config.max_events.is_some_and(|max| report.events_seen >= max) {
                break;
            }
            let Some(event) = guard.next_event() else {
                break;
            };
            let event = event?;
            report.events_seen += 1;
            if pool.is_some() && report.events_seen == 1 {
                chunk_len = chunk_events(config, budget, estimate_event_bytes(&event, grid));
                log::debug!("processing in chunks of {chunk_len} events");
            }
            chunk.push(event);
        }
        if chunk.is_empty() {
            break;
        }

        let outcomes = match &pool {
            Some(pool) => pool.install(|| processor.process_many(&chunk))?,
            None => chunk
                .iter()
                .map(|event| processor.process(event))
                .collect::<showerpix_core::Result<Vec<_>>>()?,
        };

        for outcome in outcomes {
            match outcome {
                EventOutcome::Frame(frame) => {
                    sink.append(&frame)?;
                    report.frames_written += 1;
                    report.shape.get_or_insert_with(|| frame.shape());
                    if report.frames_written % config.progress_every == 0 {
                        log_progress(report.frames_written, start.elapsed());
                    }
                }
                EventOutcome::Skipped { event_id, reason } => {
                    log::warn!("skipping event {event_id}: {reason}");
                    *report.skipped.entry(reason).or_insert(0) += 1;
                }
            }
        }
    }

    guard.close()?;
    sink.finish()?;
    report.elapsed = start.elapsed();
    log::info!(
        "materialized {} frames from {} events ({} skipped) in {:.2?}",
        report.frames_written,
        report.events_seen,
        report.skipped_total(),
        report.elapsed
    );
    Ok(report)
}

#[allow(clippy::cast_precision_loss)]
fn log_progress(frames: usize, elapsed: Duration) {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        log::info!("{frames} frames written ({:.1} frames/s)", frames as f64 / secs);
    } else {
        log::info!("{frames} frames written");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array1, Array2};
    use showerpix_core::{CameraGeometry, IterSource, ShowerGeometry};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::tempdir;

    struct CountingSource {
        events: std::vec::IntoIter<showerpix_core::Result<CalibratedEvent>>,
        closes: Arc<AtomicUsize>,
    }

    impl Iterator for CountingSource {
        type Item = showerpix_core::Result<CalibratedEvent>;

        fn next(&mut self) -> Option<Self::Item> {
            self.events.next()
        }
    }

    impl EventSource for CountingSource {
        fn close(&mut self) -> showerpix_core::Result<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn event(id: u64, n: usize) -> CalibratedEvent {
        CalibratedEvent::new(id, Array2::from_elem((n, 3), 110.0))
            .with_hardware_baseline(Array1::from_elem(n, 100.0))
            .with_geometry(ShowerGeometry::new(0.0, 0.0, 0.0))
    }

    fn processor(config: PipelineConfig) -> EventProcessor {
        EventProcessor::new(CameraGeometry::hexagonal(2, 10.0), config).unwrap()
    }

    #[test]
    fn test_source_closed_on_error() {
        let p = processor(PipelineConfig::new().with_grid_points(4, 4));
        let n = p.geometry().len();
        let closes = Arc::new(AtomicUsize::new(0));
        let mut source = CountingSource {
            events: vec![
                Ok(event(1, n)),
                Err(showerpix_core::Error::Source("disk gone".to_string())),
                Ok(event(3, n)),
            ]
            .into_iter(),
            closes: Arc::clone(&closes),
        };
        let dir = tempdir().unwrap();
        let result = materialize(dir.path().join("x.spx"), &mut source, &p);
        assert!(matches!(result, Err(Error::Core(_))));
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_source_closed_once_on_success() {
        let p = processor(PipelineConfig::new().with_grid_points(4, 4));
        let n = p.geometry().len();
        let closes = Arc::new(AtomicUsize::new(0));
        let mut source = CountingSource {
            events: vec![Ok(event(1, n)), Ok(event(2, n))].into_iter(),
            closes: Arc::clone(&closes),
        };
        let dir = tempdir().unwrap();
        let report = materialize(dir.path().join("x.spx"), &mut source, &p).unwrap();
        assert_eq!(report.frames_written, 2);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_max_events() {
        let p = processor(PipelineConfig::new().with_grid_points(4, 4).with_max_events(3));
        let n = p.geometry().len();
        let mut source = IterSource::new((0..10).map(|i| event(i, n)));
        let dir = tempdir().unwrap();
        let report = materialize(dir.path().join("x.spx"), &mut source, &p).unwrap();
        assert_eq!(report.events_seen, 3);
        assert_eq!(report.frames_written, 3);
        assert_eq!(report.shape, Some(FrameShape::new(4, 4, 3)));
    }

    #[test]
    fn test_chunk_size_bounded_by_budget() {
        let config = PipelineConfig::new().with_chunk_events(64);
        assert_eq!(chunk_events(&config, 1000, 100), 10);
        assert_eq!(chunk_events(&config, 1 << 30, 100), 64);
        assert_eq!(chunk_events(&config, 10, 100), 1);
    }

    #[test]
    fn test_worker_pool_sizing() {
        assert!(worker_pool(None).unwrap().is_none());
        assert!(worker_pool(Some(1)).unwrap().is_none());
        let pool = worker_pool(Some(3)).unwrap().unwrap();
        assert_eq!(pool.current_num_threads(), 3);
        let err = Error::ThreadPool("no threads".to_string());
        assert_eq!(err.to_string(), "thread pool error: no threads");
    }

    #[test]
    fn test_invalid_memory_fraction() {
        assert!(resolve_budget_bytes(0.0).is_err());
        assert!(resolve_budget_bytes(1.5).is_err());
    }
}
