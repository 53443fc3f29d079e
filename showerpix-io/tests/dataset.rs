use ndarray::{Array1, Array2};
use showerpix_algorithms::{EventProcessor, SkipReason};
use showerpix_core::{
    CalibratedEvent, CameraGeometry, FrameHeader, IterSource, PipelineConfig, ResampledFrame,
    ShowerGeometry, SimulationTruth,
};
use showerpix_io::{
    materialize, DatasetReader, DatasetWriter, Error, FrameSink, JsonLinesEventSource, Partition,
};
use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use tempfile::tempdir;

fn camera() -> CameraGeometry {
    CameraGeometry::hexagonal(3, 10.0)
}

#[allow(clippy::cast_precision_loss)]
fn event(id: u64) -> CalibratedEvent {
    let n = camera().len();
    let samples = Array2::from_shape_fn((n, 6), |(p, t)| {
        200.0 + ((p * 7 + t * 3 + id as usize) % 40) as f64
    });
    let psi = (id % 12) as f64 * 0.5 - 3.0;
    CalibratedEvent::new(id, samples)
        .with_hardware_baseline(Array1::from_elem(n, 200.0))
        .with_geometry(ShowerGeometry::new(id as f64 % 7.0, -(id as f64 % 5.0), psi))
}

fn config() -> PipelineConfig {
    PipelineConfig::new()
        .with_half_extent_mm(40.0)
        .with_grid_points(12, 12)
        .with_progress_every(10)
}

fn simple_frame(id: u64) -> ResampledFrame {
    ResampledFrame {
        event_id: id,
        data: ndarray::Array3::from_elem((4, 4, 2), i16::try_from(id).unwrap()),
        header: FrameHeader {
            rotation: 0.0,
            offset_x: 0.0,
            offset_y: 0.0,
            simulation: None,
        },
    }
}

fn write_frames(path: &Path, n: u64) {
    let mut writer = DatasetWriter::create(path).unwrap();
    for id in 0..n {
        writer.append(&simple_frame(id)).unwrap();
    }
    writer.finish().unwrap();
}

#[test]
fn test_materialize_round_trip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("showers.spx");
    let processor = EventProcessor::new(camera(), config()).unwrap();
    let events: Vec<CalibratedEvent> = (0..15).map(event).collect();

    let expected: Vec<ResampledFrame> = events
        .iter()
        .map(|e| match processor.process(e).unwrap() {
            showerpix_algorithms::EventOutcome::Frame(frame) => frame,
            showerpix_algorithms::EventOutcome::Skipped { .. } => panic!("unexpected skip"),
        })
        .collect();

    let mut source = IterSource::new(events);
    let report = materialize(&path, &mut source, &processor).unwrap();
    assert_eq!(report.events_seen, 15);
    assert_eq!(report.frames_written, 15);

    let reader = DatasetReader::open(&path).unwrap();
    assert_eq!(reader.len(), 15);
    assert_eq!(reader.shape(), processor.frame_shape(6));
    for (index, frame) in expected.iter().enumerate() {
        // Arrays are bit-exact and header values survive unchanged.
        assert_eq!(&reader.frame(index).unwrap(), frame);
    }
}

#[test]
fn test_split_of_hundred_frames() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("hundred.spx");
    write_frames(&path, 100);

    let mut reader = DatasetReader::open(&path).unwrap();
    let train = reader.get_batch("train", None, None).unwrap();
    let validation = reader.get_batch("validation", None, None).unwrap();
    let test = reader.get_batch("test", None, None).unwrap();
    assert_eq!((train.len(), validation.len(), test.len()), (80, 10, 10));

    let mut seen = HashSet::new();
    for batch in [&train, &validation, &test] {
        for &index in &batch.indices {
            assert!(seen.insert(index), "frame {index} in two partitions");
        }
    }
    assert_eq!(seen.len(), 100);

    // Each frame is filled with its own id.
    for (k, &index) in train.indices.iter().enumerate() {
        assert_eq!(
            train.data[[k, 0, 0, 0]],
            i16::try_from(index).unwrap()
        );
    }

    let reopened = DatasetReader::open(&path).unwrap();
    assert_eq!(reopened.split(), reader.split());
}

#[test]
fn test_oversized_batch_is_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("small.spx");
    write_frames(&path, 20);
    let mut reader = DatasetReader::open(&path).unwrap();
    assert!(matches!(
        reader.get_batch("validation", Some(3), None),
        Err(Error::BatchTooLarge {
            partition: Partition::Validation,
            requested: 3,
            available: 2
        })
    ));
    assert!(matches!(
        reader.get_batch("holdout", Some(1), None),
        Err(Error::UnknownPartition(_))
    ));
    assert_eq!(reader.get_batch("val", Some(2), None).unwrap().len(), 2);
}

#[test]
fn test_non_finite_events_never_persisted() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("skips.spx");
    let processor = EventProcessor::new(camera(), config()).unwrap();

    let mut events: Vec<CalibratedEvent> = (0..10).map(event).collect();
    events[2].geometry = Some(ShowerGeometry::new(f64::NAN, 0.0, 0.0));
    events[5].geometry = Some(ShowerGeometry::new(0.0, 0.0, f64::INFINITY));
    events[7].geometry = None;
    events[8].hardware_baseline = None;

    let mut source = IterSource::new(events);
    let report = materialize(&path, &mut source, &processor).unwrap();
    assert_eq!(report.frames_written, 6);
    assert_eq!(report.skipped_for(SkipReason::NonFiniteGeometry), 2);
    assert_eq!(report.skipped_for(SkipReason::MissingGeometry), 1);
    assert_eq!(report.skipped_for(SkipReason::MissingBaseline), 1);

    let reader = DatasetReader::open(&path).unwrap();
    let ids: Vec<u64> = (0..reader.len())
        .map(|i| reader.frame(i).unwrap().event_id)
        .collect();
    assert_eq!(ids, vec![0, 1, 3, 4, 6, 9]);
    for i in 0..reader.len() {
        let header = reader.frame(i).unwrap().header;
        assert!(header.rotation.is_finite());
        assert!(header.offset_x.is_finite() && header.offset_y.is_finite());
    }
}

#[test]
fn test_overwrite_replaces_old_content() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("reused.spx");
    write_frames(&path, 30);

    let processor = EventProcessor::new(camera(), config()).unwrap();
    let mut source = IterSource::new((100..104).map(event));
    materialize(&path, &mut source, &processor).unwrap();

    let reader = DatasetReader::open(&path).unwrap();
    assert_eq!(reader.len(), 4);
    assert_eq!(reader.frame(0).unwrap().event_id, 100);
}

#[test]
fn test_zero_frames_leave_empty_dataset() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("none.spx");
    let processor = EventProcessor::new(camera(), config()).unwrap();
    let mut events: Vec<CalibratedEvent> = (0..3).map(event).collect();
    for e in &mut events {
        e.geometry = None;
    }
    let report = materialize(&path, &mut IterSource::new(events), &processor).unwrap();
    assert_eq!(report.frames_written, 0);
    assert!(matches!(
        DatasetReader::open(&path),
        Err(Error::EmptyDataset(_))
    ));
}

#[test]
fn test_torn_tail_detected_and_recovered() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("torn.spx");
    write_frames(&path, 10);
    {
        // Simulate a crash in the middle of the eleventh record.
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&[0x46, 0x52, 0x4D, 0x31, 0, 0, 0]).unwrap();
    }

    assert!(matches!(
        DatasetReader::open(&path),
        Err(Error::Truncated {
            frames: 10,
            trailing: 7
        })
    ));
    let reader = DatasetReader::open_recovering(&path).unwrap();
    assert_eq!(reader.len(), 10);
    assert_eq!(reader.frame(9).unwrap(), simple_frame(9));
}

#[test]
fn test_parallel_materialization_matches_sequential() {
    let dir = tempdir().unwrap();
    let sequential = dir.path().join("seq.spx");
    let parallel = dir.path().join("par.spx");

    let mut events: Vec<CalibratedEvent> = (0..40).map(event).collect();
    events[13].geometry = None;

    let seq_processor = EventProcessor::new(camera(), config()).unwrap();
    materialize(&sequential, &mut IterSource::new(events.clone()), &seq_processor).unwrap();

    let par_processor = EventProcessor::new(
        camera(),
        config().with_parallelism(4).with_chunk_events(7),
    )
    .unwrap();
    let report = materialize(&parallel, &mut IterSource::new(events), &par_processor).unwrap();
    assert_eq!(report.frames_written, 39);

    assert_eq!(fs::read(&sequential).unwrap(), fs::read(&parallel).unwrap());
}

#[test]
fn test_materialize_from_json_lines() {
    let dir = tempdir().unwrap();
    let events_path = dir.path().join("events.jsonl");
    let mut lines = String::new();
    for id in 0..5 {
        lines.push_str(&showerpix_io::event_to_json_line(&event(id)).unwrap());
        lines.push('\n');
    }
    fs::write(&events_path, lines).unwrap();

    let processor = EventProcessor::new(camera(), config()).unwrap();
    let mut source = JsonLinesEventSource::open(&events_path).unwrap();
    let report = materialize(dir.path().join("json.spx"), &mut source, &processor).unwrap();
    assert_eq!(report.frames_written, 5);
    assert!(source.is_closed());
}

#[test]
fn test_simulated_headers_round_trip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("sim.spx");
    let processor = EventProcessor::new(camera(), config().with_simulated(true)).unwrap();
    let truth = SimulationTruth {
        energy: 3.2,
        altitude: 1.22,
        azimuth: 6.1,
        core_x: -81.5,
        core_y: 140.25,
        first_interaction_height: 27_345.5,
    };
    let events = (0..4).map(|id| event(id).with_truth(truth));
    materialize(&path, &mut IterSource::new(events), &processor).unwrap();

    let mut reader = DatasetReader::open(&path).unwrap();
    assert_eq!(reader.schema().len(), 9);
    let batch = reader.get_batch("train", None, None).unwrap();
    assert_eq!(batch.len(), 3);
    assert!(batch
        .field("first_interaction_height")
        .unwrap()
        .iter()
        .all(|&h| h == 27_345.5));
}
