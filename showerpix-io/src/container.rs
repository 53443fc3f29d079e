//! Binary dataset container.
//!
//! Little-endian layout:
//!
//! ```text
//! header:  magic "SHWRPIX\0" | version u32 | n_u u32 | n_v u32 | n_samples u32
//!          | field count u32 | per field: name length u16, UTF-8 name
//! record:  marker u32 | event id u64 | field values f64 (schema order)
//!          | amplitudes i16 ([u][v][t] row-major)
//! ```
//!
//! Every record has the same size, so frame `k` starts at
//! `header_len + k * record_len` and a torn tail is detectable from the file
//! length alone.

use crate::{Error, Result};
use ndarray::{ArrayViewMut3, Axis};
use showerpix_core::{FrameHeader, FrameShape, HeaderSchema, ResampledFrame};
use std::mem::size_of;

/// File signature.
pub const MAGIC: [u8; 8] = *b"SHWRPIX\0";
/// Current container version.
pub const FORMAT_VERSION: u32 = 1;
/// Start-of-record marker ("FRM1").
pub const RECORD_MARKER: u32 = 0x314D_5246;

const RECORD_PREFIX_LEN: usize = size_of::<u32>() + size_of::<u64>();

/// Layout fixed by the first frame of a dataset.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContainerHeader {
    shape: FrameShape,
    schema: HeaderSchema,
    n_cells: usize,
    record_len: usize,
}

impl ContainerHeader {
    /// # Errors
    /// Returns an error if the shape has an empty or oversized axis, or if
    /// one record would not fit in the address space.
    pub fn new(shape: FrameShape, schema: HeaderSchema) -> Result<Self> {
        for (axis, n) in [("n_u", shape.n_u), ("n_v", shape.n_v), ("n_samples", shape.n_samples)] {
            if n == 0 || u32::try_from(n).is_err() {
                return Err(Error::InvalidFormat(format!("{axis} = {n} is not storable")));
            }
        }
        let oversized = || Error::InvalidFormat(format!("frame shape {shape} is too large"));
        let n_cells = shape
            .n_u
            .checked_mul(shape.n_v)
            .and_then(|n| n.checked_mul(shape.n_samples))
            .ok_or_else(oversized)?;
        let record_len = n_cells
            .checked_mul(size_of::<i16>())
            .and_then(|n| n.checked_add(schema.len() * size_of::<f64>()))
            .and_then(|n| n.checked_add(RECORD_PREFIX_LEN))
            .ok_or_else(oversized)?;
        Ok(Self {
            shape,
            schema,
            n_cells,
            record_len,
        })
    }

    #[must_use]
    pub fn shape(&self) -> FrameShape {
        self.shape
    }

    #[must_use]
    pub fn schema(&self) -> &HeaderSchema {
        &self.schema
    }

    /// Size in bytes of one frame record.
    #[must_use]
    pub fn record_len(&self) -> usize {
        self.record_len
    }

    /// Serialize the header.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64);
        out.extend_from_slice(&MAGIC);
        out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        // Axis lengths are checked to fit u32 in `new`.
        for n in [self.shape.n_u, self.shape.n_v, self.shape.n_samples] {
            out.extend_from_slice(&(n as u32).to_le_bytes());
        }
        out.extend_from_slice(&(self.schema.len() as u32).to_le_bytes());
        for field in self.schema.fields() {
            let name = field.name().as_bytes();
            out.extend_from_slice(&(name.len() as u16).to_le_bytes());
            out.extend_from_slice(name);
        }
        out
    }

    /// Parse a header from the start of `bytes`.
    ///
    /// Returns the header and its length in bytes.
    ///
    /// # Errors
    /// Returns [`Error::InvalidFormat`] for a bad signature, unsupported
    /// version, zero-sized axis, or invalid field names.
    pub fn decode(bytes: &[u8]) -> Result<(Self, usize)> {
        let mut cursor = Cursor::new(bytes);
        if cursor.take(MAGIC.len())? != MAGIC.as_slice() {
            return Err(Error::InvalidFormat("not a showerpix dataset".to_string()));
        }
        let version = cursor.u32()?;
        if version != FORMAT_VERSION {
            return Err(Error::InvalidFormat(format!(
                "unsupported format version {version}"
            )));
        }
        let n_u = cursor.u32()? as usize;
        let n_v = cursor.u32()? as usize;
        let n_samples = cursor.u32()? as usize;
        let n_fields = cursor.u32()? as usize;
        let mut names = Vec::with_capacity(n_fields.min(16));
        for _ in 0..n_fields {
            let len = usize::from(cursor.u16()?);
            let name = std::str::from_utf8(cursor.take(len)?)
                .map_err(|e| Error::InvalidFormat(format!("field name is not UTF-8: {e}")))?;
            names.push(name.to_string());
        }
        let schema = HeaderSchema::from_names(names.as_slice())?;
        let header = Self::new(FrameShape::new(n_u, n_v, n_samples), schema)?;
        Ok((header, cursor.pos))
    }

    /// Append the record for `frame` to `out`.
    ///
    /// # Errors
    /// Returns [`Error::ShapeMismatch`] or [`Error::SchemaMismatch`] if the
    /// frame does not fit this layout.
    pub fn encode_record(&self, frame: &ResampledFrame, out: &mut Vec<u8>) -> Result<()> {
        self.check_frame(frame)?;
        let values = frame.header.values(&self.schema)?;
        out.reserve(self.record_len());
        out.extend_from_slice(&RECORD_MARKER.to_le_bytes());
        out.extend_from_slice(&frame.event_id.to_le_bytes());
        for value in values {
            out.extend_from_slice(&value.to_le_bytes());
        }
        // Logical [u][v][t] order regardless of the array's memory layout.
        for &amplitude in &frame.data {
            out.extend_from_slice(&amplitude.to_le_bytes());
        }
        Ok(())
    }

    /// Check `frame` against this layout.
    ///
    /// # Errors
    /// Returns [`Error::ShapeMismatch`] or [`Error::SchemaMismatch`].
    pub fn check_frame(&self, frame: &ResampledFrame) -> Result<()> {
        let found = frame.shape();
        if found != self.shape {
            return Err(Error::ShapeMismatch {
                expected: self.shape,
                found,
            });
        }
        let schema = frame.header.schema();
        if schema != self.schema {
            return Err(Error::SchemaMismatch {
                expected: field_list(&self.schema),
                found: field_list(&schema),
            });
        }
        Ok(())
    }

    /// Borrow the fields of one record.
    ///
    /// # Errors
    /// Returns [`Error::InvalidFormat`] if the slice has the wrong length or
    /// does not start with a record marker.
    pub fn record<'a>(&self, bytes: &'a [u8]) -> Result<RecordView<'a>> {
        if bytes.len() != self.record_len() {
            return Err(Error::InvalidFormat(format!(
                "record is {} bytes, expected {}",
                bytes.len(),
                self.record_len()
            )));
        }
        let mut cursor = Cursor::new(bytes);
        let marker = cursor.u32()?;
        if marker != RECORD_MARKER {
            return Err(Error::InvalidFormat(format!(
                "bad record marker {marker:#010x}"
            )));
        }
        let event_id = cursor.u64()?;
        let values = cursor.take(self.schema.len() * size_of::<f64>())?;
        let amplitudes = cursor.take(self.n_cells * size_of::<i16>())?;
        Ok(RecordView {
            event_id,
            values,
            amplitudes,
            shape: self.shape,
        })
    }

    /// Decode a complete frame.
    ///
    /// # Errors
    /// See [`Self::record`].
    pub fn decode_frame(&self, bytes: &[u8]) -> Result<ResampledFrame> {
        let record = self.record(bytes)?;
        let header = FrameHeader::from_values(&self.schema, &record.values())?;
        let mut data = ndarray::Array3::zeros(self.shape.as_tuple());
        record.amplitudes_into(data.view_mut());
        Ok(ResampledFrame {
            event_id: record.event_id,
            data,
            header,
        })
    }
}

/// Borrowed view of one encoded frame record.
#[derive(Clone, Copy, Debug)]
pub struct RecordView<'a> {
    pub event_id: u64,
    values: &'a [u8],
    amplitudes: &'a [u8],
    shape: FrameShape,
}

impl RecordView<'_> {
    /// Header values in schema order.
    #[must_use]
    pub fn values(&self) -> Vec<f64> {
        self.values
            .chunks_exact(size_of::<f64>())
            .map(|chunk| {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(chunk);
                f64::from_le_bytes(raw)
            })
            .collect()
    }

    /// Decode amplitudes into `out`, keeping the first `out.dim().2` samples.
    ///
    /// # Panics
    /// Panics if `out` does not match the grid or has more samples than the
    /// record.
    pub fn amplitudes_into(&self, mut out: ArrayViewMut3<'_, i16>) {
        let (n_u, n_v, n_t) = out.dim();
        assert_eq!((n_u, n_v), (self.shape.n_u, self.shape.n_v));
        assert!(n_t <= self.shape.n_samples);
        let stride = self.shape.n_samples * size_of::<i16>();
        for (cell, mut trace) in self
            .amplitudes
            .chunks_exact(stride)
            .zip(out.lanes_mut(Axis(2)))
        {
            for (value, raw) in trace.iter_mut().zip(cell.chunks_exact(size_of::<i16>())) {
                *value = i16::from_le_bytes([raw[0], raw[1]]);
            }
        }
    }
}

fn field_list(schema: &HeaderSchema) -> String {
    schema
        .fields()
        .iter()
        .map(|f| f.name())
        .collect::<Vec<_>>()
        .join(", ")
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(n).filter(|&end| end <= self.bytes.len());
        let Some(end) = end else {
            return Err(Error::InvalidFormat(format!(
                "unexpected end of data at byte {}",
                self.pos
            )));
        };
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;
    use showerpix_core::SimulationTruth;

    fn frame(shape: (usize, usize, usize), simulated: bool) -> ResampledFrame {
        let data = Array3::from_shape_fn(shape, |(u, v, t)| {
            i16::try_from(u * 100 + v * 10 + t).unwrap() - 50
        });
        ResampledFrame {
            event_id: 77,
            data,
            header: FrameHeader {
                rotation: 1.25,
                offset_x: -3.5,
                offset_y: 8.0,
                simulation: simulated.then_some(SimulationTruth {
                    energy: 0.8,
                    altitude: 1.2,
                    azimuth: 3.1,
                    core_x: -120.0,
                    core_y: 45.5,
                    first_interaction_height: 21_000.0,
                }),
            },
        }
    }

    #[test]
    fn test_header_layout() {
        let header = ContainerHeader::new(FrameShape::new(4, 5, 6), HeaderSchema::basic()).unwrap();
        let bytes = header.encode();
        assert_eq!(&bytes[..8], b"SHWRPIX\0");
        let (decoded, len) = ContainerHeader::decode(&bytes).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(len, bytes.len());
        assert_eq!(header.record_len(), 4 + 8 + 3 * 8 + 4 * 5 * 6 * 2);
    }

    #[test]
    fn test_record_is_bit_exact() {
        let original = frame((3, 2, 4), true);
        let header = ContainerHeader::new(original.shape(), HeaderSchema::simulated()).unwrap();
        let mut buf = Vec::new();
        header.encode_record(&original, &mut buf).unwrap();
        assert_eq!(buf.len(), header.record_len());
        assert_eq!(header.decode_frame(&buf).unwrap(), original);
    }

    #[test]
    fn test_non_standard_layout_written_in_logical_order() {
        let mut original = frame((2, 3, 2), false);
        original.data = original.data.reversed_axes().as_standard_layout().reversed_axes().to_owned();
        let header = ContainerHeader::new(original.shape(), HeaderSchema::basic()).unwrap();
        let mut buf = Vec::new();
        header.encode_record(&original, &mut buf).unwrap();
        assert_eq!(header.decode_frame(&buf).unwrap().data, original.data);
    }

    #[test]
    fn test_truncated_samples() {
        let original = frame((2, 2, 5), false);
        let header = ContainerHeader::new(original.shape(), HeaderSchema::basic()).unwrap();
        let mut buf = Vec::new();
        header.encode_record(&original, &mut buf).unwrap();
        let mut out = Array3::zeros((2, 2, 3));
        header.record(&buf).unwrap().amplitudes_into(out.view_mut());
        assert_eq!(out, original.data.slice(ndarray::s![.., .., ..3]));
    }

    #[test]
    fn test_rejects_foreign_frames() {
        let header = ContainerHeader::new(FrameShape::new(2, 2, 2), HeaderSchema::basic()).unwrap();
        let mut buf = Vec::new();
        assert!(matches!(
            header.encode_record(&frame((2, 2, 3), false), &mut buf),
            Err(Error::ShapeMismatch { .. })
        ));
        assert!(matches!(
            header.encode_record(&frame((2, 2, 2), true), &mut buf),
            Err(Error::SchemaMismatch { .. })
        ));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_bad_magic_and_marker() {
        assert!(matches!(
            ContainerHeader::decode(b"NOTADATASET_____________"),
            Err(Error::InvalidFormat(_))
        ));
        let header = ContainerHeader::new(FrameShape::new(1, 1, 1), HeaderSchema::basic()).unwrap();
        let garbage = vec![0u8; header.record_len()];
        assert!(matches!(header.record(&garbage), Err(Error::InvalidFormat(_))));
    }

    #[test]
    fn test_overflowing_shape_rejected() {
        let mut bytes = MAGIC.to_vec();
        for word in [FORMAT_VERSION, 0x8000_0000, 0x8000_0000, 4, 3] {
            bytes.extend_from_slice(&word.to_le_bytes());
        }
        for field in HeaderSchema::basic().fields() {
            let name = field.name().as_bytes();
            bytes.extend_from_slice(&u16::try_from(name.len()).unwrap().to_le_bytes());
            bytes.extend_from_slice(name);
        }
        bytes.extend_from_slice(&[0u8; 64]);
        assert!(matches!(
            ContainerHeader::decode(&bytes),
            Err(Error::InvalidFormat(_))
        ));
    }
}
