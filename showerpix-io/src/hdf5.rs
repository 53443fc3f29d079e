//! HDF5 frame sink.
//!
//! Layout:
//! - `/frames`: extendable `i16` dataset `[n, u, v, t]`, one chunk per frame
//! - `/event_id`: extendable `u64` dataset
//! - `/<field>`: one extendable `f64` dataset per header field, with `units`

use crate::writer::{remove_existing, FrameSink};
use crate::{Error, Result};
use hdf5::types::{H5Type, VarLenUnicode};
use hdf5::{Dataset, File};
use ndarray::{s, Array4, ArrayView1, Axis, Ix4};
use showerpix_core::{FrameShape, HeaderField, HeaderSchema, ResampledFrame};
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

const FORMAT_VERSION: &str = "1";
const DEFAULT_CHUNK_FRAMES: usize = 256;

struct FrameDatasets {
    shape: FrameShape,
    schema: HeaderSchema,
    frames: Dataset,
    event_id: Dataset,
    fields: Vec<Dataset>,
}

/// Streaming HDF5 writer for resampled frames.
pub struct Hdf5FrameSink {
    file: File,
    datasets: Option<FrameDatasets>,
    compression: Option<u8>,
    frames: usize,
}

impl Hdf5FrameSink {
    /// Create a new sink, replacing any existing file.
    ///
    /// # Errors
    /// Returns an error if the HDF5 file cannot be created.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        remove_existing(path.as_ref())?;
        let file = File::create(path)?;
        set_attr_str_file(&file, "showerpix_format_version", FORMAT_VERSION)?;
        Ok(Self {
            file,
            datasets: None,
            compression: None,
            frames: 0,
        })
    }

    /// Deflate level for the frame dataset.
    #[must_use]
    pub fn with_compression(mut self, level: u8) -> Self {
        self.compression = Some(level);
        self
    }

    fn create_datasets(&self, frame: &ResampledFrame) -> Result<FrameDatasets> {
        let shape = frame.shape();
        let schema = frame.header.schema();

        let mut builder = self
            .file
            .new_dataset::<i16>()
            .shape((0.., shape.n_u, shape.n_v, shape.n_samples))
            .chunk((1, shape.n_u, shape.n_v, shape.n_samples));
        if let Some(level) = self.compression {
            builder = builder.deflate(level);
        }
        let frames = builder.create("frames")?;
        set_attr_str(&frames, "axes", "frame,u,v,sample")?;

        let event_id = create_extendable_dataset::<u64>(&self.file, "event_id")?;
        let fields = schema
            .fields()
            .iter()
            .map(|&field| {
                let dataset = create_extendable_dataset::<f64>(&self.file, field.name())?;
                set_attr_str(&dataset, "units", field.unit())?;
                Ok(dataset)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(FrameDatasets {
            shape,
            schema,
            frames,
            event_id,
            fields,
        })
    }
}

impl FrameSink for Hdf5FrameSink {
    fn append(&mut self, frame: &ResampledFrame) -> Result<()> {
        if self.datasets.is_none() {
            self.datasets = Some(self.create_datasets(frame)?);
        }
        let Some(datasets) = &self.datasets else {
            return Err(Error::InvalidFormat("frame datasets missing".to_string()));
        };

        let found = frame.shape();
        if found != datasets.shape {
            return Err(Error::ShapeMismatch {
                expected: datasets.shape,
                found,
            });
        }
        if frame.header.schema() != datasets.schema {
            return Err(Error::SchemaMismatch {
                expected: names(&datasets.schema),
                found: names(&frame.header.schema()),
            });
        }
        let values = frame.header.values(&datasets.schema)?;

        let n = self.frames;
        let FrameShape {
            n_u,
            n_v,
            n_samples,
        } = datasets.shape;
        datasets.frames.resize((n + 1, n_u, n_v, n_samples))?;
        let data = frame.data.view().insert_axis(Axis(0));
        datasets
            .frames
            .write_slice(&data.as_standard_layout(), s![n..=n, .., .., ..])?;
        append_value(&datasets.event_id, n, frame.event_id)?;
        for (dataset, value) in datasets.fields.iter().zip(values) {
            append_value(dataset, n, value)?;
        }
        self.frames += 1;
        Ok(())
    }

    fn frames_written(&self) -> usize {
        self.frames
    }

    fn finish(&mut self) -> Result<()> {
        self.file.flush()?;
        Ok(())
    }
}

/// Frames and header columns read back from an HDF5 dataset.
#[derive(Clone, Debug, PartialEq)]
pub struct Hdf5Frames {
    pub frames: Array4<i16>,
    pub event_id: Vec<u64>,
    pub fields: BTreeMap<String, Vec<f64>>,
}

/// Read a dataset written by [`Hdf5FrameSink`].
///
/// # Errors
/// Returns an error if the file or a dataset is missing.
pub fn read_frames_hdf5<P: AsRef<Path>>(path: P) -> Result<Hdf5Frames> {
    let file = File::open(path)?;
    let frames = file.dataset("frames")?.read::<i16, Ix4>()?;
    let event_id = file.dataset("event_id")?.read_raw::<u64>()?;
    let mut fields = BTreeMap::new();
    for field in HeaderField::BASIC.iter().chain(HeaderField::SIMULATION.iter()) {
        if let Ok(dataset) = file.dataset(field.name()) {
            fields.insert(field.name().to_string(), dataset.read_raw::<f64>()?);
        }
    }
    Ok(Hdf5Frames {
        frames,
        event_id,
        fields,
    })
}

fn names(schema: &HeaderSchema) -> String {
    schema
        .fields()
        .iter()
        .map(|f| f.name())
        .collect::<Vec<_>>()
        .join(", ")
}

fn create_extendable_dataset<T: H5Type>(file: &File, name: &str) -> Result<Dataset> {
    Ok(file
        .new_dataset::<T>()
        .shape((0..,))
        .chunk((DEFAULT_CHUNK_FRAMES,))
        .create(name)?)
}

fn append_value<T: H5Type>(dataset: &Dataset, offset: usize, value: T) -> Result<()> {
    dataset.resize((offset + 1,))?;
    let data = [value];
    dataset.write_slice(ArrayView1::from(&data), s![offset..=offset])?;
    Ok(())
}

fn set_attr_str(dataset: &Dataset, name: &str, value: &str) -> Result<()> {
    let value = to_var_len_unicode(value)?;
    dataset
        .new_attr::<VarLenUnicode>()
        .create(name)?
        .write_scalar(&value)?;
    Ok(())
}

fn set_attr_str_file(file: &File, name: &str, value: &str) -> Result<()> {
    let value = to_var_len_unicode(value)?;
    file.new_attr::<VarLenUnicode>()
        .create(name)?
        .write_scalar(&value)?;
    Ok(())
}

fn to_var_len_unicode(value: &str) -> Result<VarLenUnicode> {
    VarLenUnicode::from_str(value)
        .map_err(|e| Error::InvalidFormat(format!("invalid utf-8 attribute: {e}")))
}
