//! Memory-mapped dataset reader with partitioned batch sampling.

use crate::container::ContainerHeader;
use crate::split::{Partition, PartitionSplit};
use crate::{Error, Result};
use memmap2::Mmap;
use ndarray::{Array1, Array4, Axis};
use rand::rngs::StdRng;
use rand::SeedableRng;
use showerpix_core::{FrameShape, HeaderSchema, ResampledFrame};
use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};

/// Frames sampled from one partition.
#[derive(Clone, Debug, PartialEq)]
pub struct Batch {
    /// `[frame, u, v, sample]`.
    pub data: Array4<i16>,
    /// Header values keyed by field name, one entry per frame.
    pub fields: BTreeMap<String, Array1<f64>>,
    /// Dataset index of each frame in the batch.
    pub indices: Vec<usize>,
}

impl Batch {
    #[must_use]
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Array1<f64>> {
        self.fields.get(name)
    }
}

/// Read-only view of a materialized dataset.
///
/// Only the container header is decoded on open; frame content is decoded
/// from the memory map when a frame or batch is requested.
pub struct DatasetReader {
    path: PathBuf,
    mmap: Mmap,
    layout: ContainerHeader,
    data_offset: usize,
    n_frames: usize,
    split: PartitionSplit,
    rng: StdRng,
}

impl DatasetReader {
    /// Open a dataset.
    ///
    /// # Errors
    /// Returns [`Error::EmptyDataset`] for a dataset without frames,
    /// [`Error::Truncated`] if the file ends inside a record, and
    /// [`Error::InvalidFormat`] for a malformed header or record.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with(path.as_ref(), false)
    }

    /// Open a dataset, ignoring a partially written trailing record.
    ///
    /// # Errors
    /// Same as [`Self::open`], except that a torn tail is only logged.
    pub fn open_recovering<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with(path.as_ref(), true)
    }

    fn open_with(path: &Path, recover: bool) -> Result<Self> {
        let file = File::open(path)?;
        if file.metadata()?.len() == 0 {
            return Err(Error::EmptyDataset(path.to_path_buf()));
        }
        // SAFETY: The file is opened read-only and we assume it is not modified concurrently.
        // This is the standard safety contract for memory mapping.
        #[allow(unsafe_code)]
        let mmap = unsafe { Mmap::map(&file) }
            .map_err(|e| Error::Mmap(format!("{}: {e}", path.display())))?;

        let (layout, data_offset) = ContainerHeader::decode(&mmap)?;
        let record_len = layout.record_len();
        let body = mmap.len() - data_offset;
        let n_frames = body / record_len;
        let trailing = body % record_len;
        if trailing != 0 {
            if !recover {
                return Err(Error::Truncated {
                    frames: n_frames,
                    trailing,
                });
            }
            log::warn!(
                "{}: ignoring {trailing} bytes of an incomplete trailing frame",
                path.display()
            );
        }
        if n_frames == 0 {
            return Err(Error::EmptyDataset(path.to_path_buf()));
        }

        let reader = Self {
            path: path.to_path_buf(),
            mmap,
            layout,
            data_offset,
            n_frames,
            split: PartitionSplit::new(n_frames),
            rng: StdRng::from_entropy(),
        };
        for index in 0..n_frames {
            reader.layout.record(reader.record_bytes(index))?;
        }
        log::debug!(
            "{}: {} frames of shape {}",
            reader.path.display(),
            n_frames,
            reader.layout.shape()
        );
        Ok(reader)
    }

    /// Use a seeded generator for batch sampling.
    #[must_use]
    pub fn with_batch_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of complete frames.
    #[must_use]
    pub fn len(&self) -> usize {
        self.n_frames
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.n_frames == 0
    }

    #[must_use]
    pub fn shape(&self) -> FrameShape {
        self.layout.shape()
    }

    #[must_use]
    pub fn schema(&self) -> &HeaderSchema {
        self.layout.schema()
    }

    #[must_use]
    pub fn split(&self) -> &PartitionSplit {
        &self.split
    }

    fn record_bytes(&self, index: usize) -> &[u8] {
        let record_len = self.layout.record_len();
        let start = self.data_offset + index * record_len;
        &self.mmap[start..start + record_len]
    }

    /// Decode frame `index`.
    ///
    /// # Errors
    /// Returns [`Error::FrameIndexOutOfRange`] past the end of the dataset.
    pub fn frame(&self, index: usize) -> Result<ResampledFrame> {
        if index >= self.n_frames {
            return Err(Error::FrameIndexOutOfRange {
                index,
                len: self.n_frames,
            });
        }
        self.layout.decode_frame(self.record_bytes(index))
    }

    /// Sample a batch from a partition named `train`, `validation` (`val`) or
    /// `test`.
    ///
    /// # Errors
    /// See [`Self::batch`]; unknown names fail with
    /// [`Error::UnknownPartition`].
    pub fn get_batch(
        &mut self,
        partition: &str,
        size: Option<usize>,
        n_samples: Option<usize>,
    ) -> Result<Batch> {
        let partition: Partition = partition.parse()?;
        self.batch(partition, size, n_samples)
    }

    /// Sample `size` distinct frames of `partition` in random order.
    ///
    /// `size` defaults to the whole partition and `n_samples` to the full
    /// time axis.
    ///
    /// # Errors
    /// Returns [`Error::BatchTooLarge`] or [`Error::InvalidSampleCount`]
    /// before any frame is decoded.
    pub fn batch(
        &mut self,
        partition: Partition,
        size: Option<usize>,
        n_samples: Option<usize>,
    ) -> Result<Batch> {
        let available = self.split.len(partition);
        let size = size.unwrap_or(available);
        if size > available {
            return Err(Error::BatchTooLarge {
                partition,
                requested: size,
                available,
            });
        }
        let shape = self.layout.shape();
        let n_t = n_samples.unwrap_or(shape.n_samples);
        if n_t == 0 || n_t > shape.n_samples {
            return Err(Error::InvalidSampleCount {
                requested: n_t,
                available: shape.n_samples,
            });
        }
        if partition == Partition::Test {
            log::warn!("loading test partition; test data should only be used once");
        }

        let pool = self.split.indices(partition);
        let indices: Vec<usize> = rand::seq::index::sample(&mut self.rng, available, size)
            .into_iter()
            .map(|i| pool[i])
            .collect();

        let mut data = Array4::zeros((size, shape.n_u, shape.n_v, n_t));
        let mut columns = vec![Vec::with_capacity(size); self.layout.schema().len()];
        for (&index, out) in indices.iter().zip(data.axis_iter_mut(Axis(0))) {
            let record = self.layout.record(self.record_bytes(index))?;
            record.amplitudes_into(out);
            for (column, value) in columns.iter_mut().zip(record.values()) {
                column.push(value);
            }
        }

        let fields = self
            .layout
            .schema()
            .fields()
            .iter()
            .zip(columns)
            .map(|(field, values)| (field.name().to_string(), Array1::from(values)))
            .collect();

        Ok(Batch {
            data,
            fields,
            indices,
        })
    }
}
