//! Map re-writer.
//!
//! Emits a map byte-identical to its source except for the 4-byte
//! deadtime field of each record. Marker, length, coordinates, detector
//! and payload are copied verbatim, so record boundaries never drift.

use crate::error::Result;
use std::io::{BufWriter, Write};
use xrfmap_gpx::PixelRecordHeader;

/// Buffered writer for a modified map stream.
pub struct MapWriter<W: Write> {
    out: BufWriter<W>,
    records: usize,
}

impl<W: Write> MapWriter<W> {
    #[must_use]
    pub fn new(out: W) -> Self {
        Self {
            out: BufWriter::new(out),
            records: 0,
        }
    }

    /// Writes the raw header bytes (length prefix plus JSON block)
    /// unchanged.
    ///
    /// # Errors
    /// I/O errors on the output stream.
    pub fn write_header(&mut self, raw_header: &[u8]) -> Result<()> {
        self.out.write_all(raw_header)?;
        Ok(())
    }

    /// Writes one record with `deadtime` substituted into its header and
    /// the payload copied verbatim.
    ///
    /// # Errors
    /// I/O errors on the output stream.
    pub fn write_record(
        &mut self,
        rec: &PixelRecordHeader,
        deadtime: f32,
        payload: &[u8],
    ) -> Result<()> {
        debug_assert_eq!(payload.len(), rec.payload_len());
        self.out.write_all(&rec.to_wire(deadtime))?;
        self.out.write_all(payload)?;
        self.records += 1;
        Ok(())
    }

    /// Records written so far.
    #[must_use]
    pub fn records(&self) -> usize {
        self.records
    }

    /// Flushes and releases the output stream.
    ///
    /// # Errors
    /// I/O errors from the final flush.
    pub fn finish(mut self) -> Result<W> {
        self.out.flush()?;
        // BufWriter::into_inner flushes again; the error carries the
        // writer back, which we do not need.
        self.out
            .into_inner()
            .map_err(|err| crate::error::Error::Io(err.into_error()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_and_record_bytes_are_contiguous() {
        let mut writer = MapWriter::new(Vec::new());
        writer.write_header(&[0x02, 0x00, b'{', b'}']).unwrap();
        let rec = PixelRecordHeader {
            record_len: 20,
            x: 1,
            y: 0,
            detector: 0,
            deadtime: 10.0,
        };
        writer.write_record(&rec, 50.0, &[1, 0, 5, 0]).unwrap();
        assert_eq!(writer.records(), 1);

        let bytes = writer.finish().unwrap();
        assert_eq!(&bytes[..4], &[0x02, 0x00, b'{', b'}']);
        assert_eq!(&bytes[4..6], b"DP");
        assert_eq!(&bytes[16..20], &50.0f32.to_le_bytes());
        assert_eq!(&bytes[20..24], &[1, 0, 5, 0]);
        assert_eq!(bytes.len(), 24);
    }
}
