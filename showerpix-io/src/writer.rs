//! Incremental dataset writers.

use crate::container::ContainerHeader;
use crate::{Error, Result};
use showerpix_core::{FrameShape, HeaderSchema, ResampledFrame};
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// Destination for materialized frames.
pub trait FrameSink {
    /// Append one frame after all previously appended frames.
    ///
    /// # Errors
    /// Returns an error if the frame does not fit the dataset or the write
    /// fails.
    fn append(&mut self, frame: &ResampledFrame) -> Result<()>;

    /// Number of frames appended so far.
    fn frames_written(&self) -> usize;

    /// Flush everything to stable storage.
    ///
    /// # Errors
    /// Returns an error if the flush fails.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Remove `path` if it exists.
pub(crate) fn remove_existing(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => {
            log::debug!("removed existing dataset {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Writer for the binary dataset container.
///
/// The container header is written together with the first frame, so a
/// dataset that never receives a frame stays an empty file. Each frame is
/// written as one fixed-size record with a single `write_all`; after a crash
/// every complete record is still readable.
pub struct DatasetWriter {
    path: PathBuf,
    file: File,
    layout: Option<ContainerHeader>,
    expected_grid: Option<(usize, usize)>,
    sync_every_frame: bool,
    frames: usize,
    buf: Vec<u8>,
}

impl DatasetWriter {
    /// Create a dataset at `path`, deleting any existing file first.
    ///
    /// # Errors
    /// Returns an error if the old file cannot be removed or the new one
    /// cannot be created.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        remove_existing(&path)?;
        let file = File::create(&path)?;
        Ok(Self {
            path,
            file,
            layout: None,
            expected_grid: None,
            sync_every_frame: false,
            frames: 0,
            buf: Vec::new(),
        })
    }

    /// Require the first frame to have this `(n_u, n_v)` grid.
    #[must_use]
    pub fn with_expected_grid(mut self, grid: (usize, usize)) -> Self {
        self.expected_grid = Some(grid);
        self
    }

    /// `sync_data` after every record.
    #[must_use]
    pub fn with_sync_every_frame(mut self, sync: bool) -> Self {
        self.sync_every_frame = sync;
        self
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Frame shape, once the first frame has been written.
    #[must_use]
    pub fn shape(&self) -> Option<FrameShape> {
        self.layout.as_ref().map(ContainerHeader::shape)
    }

    #[must_use]
    pub fn schema(&self) -> Option<&HeaderSchema> {
        self.layout.as_ref().map(ContainerHeader::schema)
    }

    /// Fix the dataset layout from the first frame and queue the header.
    fn ensure_layout(&mut self, frame: &ResampledFrame) -> Result<()> {
        if self.layout.is_some() {
            return Ok(());
        }
        let shape = frame.shape();
        if let Some((n_u, n_v)) = self.expected_grid {
            if (shape.n_u, shape.n_v) != (n_u, n_v) {
                return Err(Error::ShapeMismatch {
                    expected: FrameShape::new(n_u, n_v, shape.n_samples),
                    found: shape,
                });
            }
        }
        let layout = ContainerHeader::new(shape, frame.header.schema())?;
        self.buf.extend_from_slice(&layout.encode());
        log::debug!(
            "{}: fixed frame shape {shape} with {} header fields",
            self.path.display(),
            layout.schema().len()
        );
        self.layout = Some(layout);
        Ok(())
    }

    /// Flush OS buffers to disk.
    ///
    /// # Errors
    /// Returns an error if the sync fails.
    pub fn flush(&mut self) -> Result<()> {
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }
}

impl FrameSink for DatasetWriter {
    fn append(&mut self, frame: &ResampledFrame) -> Result<()> {
        self.buf.clear();
        self.ensure_layout(frame)?;
        let encoded = match &self.layout {
            Some(layout) => layout.encode_record(frame, &mut self.buf),
            None => Err(Error::InvalidFormat("dataset layout missing".to_string())),
        };
        if let Err(e) = encoded {
            if self.frames == 0 {
                // Nothing on disk yet; the next frame decides the layout again.
                self.layout = None;
            }
            return Err(e);
        }
        self.file.write_all(&self.buf)?;
        if self.sync_every_frame {
            self.file.sync_data()?;
        }
        self.frames += 1;
        Ok(())
    }

    fn frames_written(&self) -> usize {
        self.frames
    }

    fn finish(&mut self) -> Result<()> {
        self.flush()
    }
}
