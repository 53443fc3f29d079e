//! showerpix CLI
//!
//! Builds shower-aligned frame datasets from calibrated events and samples
//! partitioned batches from them.
#![allow(
    clippy::uninlined_format_args,
    clippy::cast_precision_loss,
    clippy::too_many_lines
)]

use clap::{Parser, Subcommand};
use showerpix_algorithms::EventProcessor;
use showerpix_core::{CameraGeometry, PipelineConfig};
use showerpix_io::{DatasetReader, JsonLinesEventSource, MaterializeReport, Partition};
use std::path::PathBuf;
use thiserror::Error;

/// Result type for CLI operations.
type Result<T> = std::result::Result<T, CliError>;

/// CLI error types.
#[derive(Error, Debug)]
enum CliError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Dataset error: {0}")]
    ShowerpixIo(#[from] showerpix_io::Error),

    #[error("Core error: {0}")]
    Core(#[from] showerpix_core::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Shower-aligned camera image dataset builder.
#[derive(Parser)]
#[command(name = "showerpix")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resample a stream of calibrated events into a dataset
    Materialize {
        /// Camera geometry (JSON)
        #[arg(short, long)]
        geometry: PathBuf,

        /// Calibrated events, one JSON object per line
        #[arg(short, long)]
        events: PathBuf,

        /// Output dataset path (replaced if it exists)
        #[arg(short, long)]
        output: PathBuf,

        /// Pipeline configuration (JSON); flags below override it
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Pixel ids excluded from interpolation
        #[arg(long, value_delimiter = ',')]
        exclude: Vec<usize>,

        /// Half width of the square target grid (mm)
        #[arg(long)]
        half_extent_mm: Option<f64>,

        /// Skip events whose amplitudes never exceed this value
        #[arg(long)]
        min_adc: Option<f64>,

        /// Store simulation truth in the frame headers
        #[arg(long)]
        simulated: bool,

        /// Stop after this many events
        #[arg(long)]
        max_events: Option<usize>,

        /// Worker threads
        #[arg(short = 'j', long)]
        threads: Option<usize>,

        /// Write HDF5 instead of the binary container
        #[cfg(feature = "hdf5")]
        #[arg(long)]
        hdf5: bool,
    },

    /// Show information about a dataset
    Info {
        /// Dataset file
        input: PathBuf,

        /// Ignore an incomplete trailing frame
        #[arg(long)]
        recover: bool,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the train / validation / test assignment
    Split {
        /// Dataset file
        input: PathBuf,

        /// Print the frame indices of each partition
        #[arg(long)]
        list: bool,
    },

    /// Sample a batch from one partition
    Batch {
        /// Dataset file
        input: PathBuf,

        /// train, validation (val) or test
        #[arg(short, long, default_value = "train")]
        partition: String,

        /// Number of frames (defaults to the whole partition)
        #[arg(short, long)]
        size: Option<usize>,

        /// Keep only the first N time samples
        #[arg(long)]
        samples: Option<usize>,

        /// Seed for reproducible sampling
        #[arg(long)]
        seed: Option<u64>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match cli.command {
        Commands::Materialize {
            geometry,
            events,
            output,
            config,
            exclude,
            half_extent_mm,
            min_adc,
            simulated,
            max_events,
            threads,
            #[cfg(feature = "hdf5")]
            hdf5,
        } => {
            let mut pipeline = match &config {
                Some(path) => PipelineConfig::from_file(path)?,
                None => PipelineConfig::new(),
            };
            if !exclude.is_empty() {
                pipeline = pipeline.with_excluded_pixels(exclude);
            }
            if let Some(half) = half_extent_mm {
                pipeline = pipeline.with_half_extent_mm(half);
            }
            if let Some(threshold) = min_adc {
                pipeline = pipeline.with_min_adc(threshold);
            }
            if simulated {
                pipeline = pipeline.with_simulated(true);
            }
            if let Some(max) = max_events {
                pipeline = pipeline.with_max_events(max);
            }
            if let Some(threads) = threads {
                pipeline = pipeline.with_parallelism(threads);
            }
            pipeline.validate().map_err(showerpix_core::Error::from)?;

            let camera = CameraGeometry::from_file(&geometry)?;
            log::info!(
                "camera {} with {} pixels",
                geometry.display(),
                camera.len()
            );
            let processor = EventProcessor::new(camera, pipeline)?;
            let (n_u, n_v) = processor.resampler().grid().shape();
            log::info!("target grid {}x{}", n_u, n_v);

            let mut source = JsonLinesEventSource::open(&events)?;

            #[cfg(feature = "hdf5")]
            let report = if hdf5 {
                let mut sink = showerpix_io::Hdf5FrameSink::create(&output)?;
                showerpix_io::materialize_into(&mut sink, &mut source, &processor)?
            } else {
                showerpix_io::materialize(&output, &mut source, &processor)?
            };
            #[cfg(not(feature = "hdf5"))]
            let report = showerpix_io::materialize(&output, &mut source, &processor)?;

            print_report(&output, &report);
        }

        Commands::Info {
            input,
            recover,
            json,
        } => {
            let reader = if recover {
                DatasetReader::open_recovering(&input)?
            } else {
                DatasetReader::open(&input)?
            };
            let shape = reader.shape();
            let fields: Vec<&str> = reader.schema().fields().iter().map(|f| f.name()).collect();
            if json {
                let summary = serde_json::json!({
                    "path": input.display().to_string(),
                    "frames": reader.len(),
                    "shape": [shape.n_u, shape.n_v, shape.n_samples],
                    "fields": fields,
                    "partitions": {
                        "train": reader.split().len(Partition::Train),
                        "validation": reader.split().len(Partition::Validation),
                        "test": reader.split().len(Partition::Test),
                    },
                });
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                let size = std::fs::metadata(&input)?.len();
                println!("File: {}", input.display());
                println!("Size: {} bytes ({:.2} MB)", size, size as f64 / 1_000_000.0);
                println!("Frames: {}", reader.len());
                println!("Frame shape: {}", shape);
                println!("Header fields: {}", fields.join(", "));
                println!(
                    "Simulated: {}",
                    if reader.schema().is_simulated() { "yes" } else { "no" }
                );
            }
        }

        Commands::Split { input, list } => {
            let reader = DatasetReader::open(&input)?;
            let split = reader.split();
            println!("{:<12} | {:>8}", "Partition", "Frames");
            println!("{:-<23}", "");
            for partition in Partition::ALL {
                println!("{:<12} | {:>8}", partition, split.len(partition));
            }
            if list {
                for partition in Partition::ALL {
                    let indices: Vec<String> = split
                        .indices(partition)
                        .iter()
                        .map(ToString::to_string)
                        .collect();
                    println!("{}: {}", partition, indices.join(" "));
                }
            }
        }

        Commands::Batch {
            input,
            partition,
            size,
            samples,
            seed,
        } => {
            let mut reader = DatasetReader::open(&input)?;
            if let Some(seed) = seed {
                reader = reader.with_batch_seed(seed);
            }
            let batch = reader.get_batch(&partition, size, samples)?;
            let (n, n_u, n_v, n_t) = batch.data.dim();
            println!("Batch: {} frames of {}x{}x{}", n, n_u, n_v, n_t);
            println!(
                "Amplitude range: {} - {}",
                batch.data.iter().copied().min().unwrap_or(0),
                batch.data.iter().copied().max().unwrap_or(0)
            );
            for (name, values) in &batch.fields {
                let mean = values.mean().unwrap_or(f64::NAN);
                println!("{:<26} mean {:>14.6}", name, mean);
            }
        }
    }

    Ok(())
}

fn print_report(output: &std::path::Path, report: &MaterializeReport) {
    println!(
        "Wrote {} frames to {} in {:.2}s",
        report.frames_written,
        output.display(),
        report.elapsed.as_secs_f64()
    );
    println!("Events read: {}", report.events_seen);
    if let Some(shape) = report.shape {
        println!("Frame shape: {}", shape);
    }
    for (reason, count) in &report.skipped {
        println!("Skipped ({}): {}", reason, count);
    }
}
