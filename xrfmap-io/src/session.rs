//! Parsing session: owns the stream, drives both passes.
//!
//! The index pass and the full pass share one record-walk driver; the only
//! difference is whether the payload is handed to the visitor or skipped.
//! Factoring the traversal this way keeps the two passes from drifting
//! apart on record-boundary arithmetic.

use crate::buffer::ChunkBuffer;
use crate::config::ParseConfig;
use crate::error::{Error, Result};
use crate::index::{IndexEntry, PixelIndex};
use log::{info, warn};
use std::fs::File;
use std::io::{Read, Seek, Write};
use std::path::Path;
use xrfmap_core::{DeadtimePolicy, DeadtimePredictor, MapHeader, PixelSeries};
use xrfmap_gpx::record::{self, PixelRecordHeader};
use xrfmap_gpx::{GapFiller, LENGTH_PREFIX_LEN, PIXEL_HEADER_LEN};

use crate::writer::MapWriter;

/// End-of-run accounting for one traversal.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ParseSummary {
    /// Pixels the header declared, `xres * yres`.
    pub pixels_expected: usize,
    /// Complete pixels actually decoded; a trailing partial pixel is not
    /// counted.
    pub pixels_found: usize,
    /// Records visited.
    pub records: usize,
    /// The final record ran past end of stream and was discarded.
    pub truncated: bool,
    /// The declared pixel count was reached with bytes still unread.
    pub stopped_early: bool,
    /// Duplicate or out-of-range channel indices across all payloads.
    pub channel_warnings: usize,
    /// Records whose detector id broke the cyclic order of pixel 0.
    pub detector_order_warnings: usize,
}

impl ParseSummary {
    /// Whether the run decoded every declared pixel with no leniencies.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.pixels_found == self.pixels_expected && !self.truncated
    }
}

/// Output of one pass: the offset index, the accumulator, and the run
/// summary. The index pass hands back an index-only series (scalars
/// filled, no spectra).
#[derive(Debug)]
pub struct ParseOutcome {
    pub index: PixelIndex,
    pub series: PixelSeries,
    pub summary: ParseSummary,
}

/// Per-record callback for the shared walk driver.
trait RecordVisitor {
    /// Whether the driver should read the payload bytes for `visit`;
    /// when false the payload is skipped without decoding.
    fn wants_payload(&self) -> bool;

    fn visit(
        &mut self,
        pixel: usize,
        slot: usize,
        offset: u64,
        rec: &PixelRecordHeader,
        payload: &[u8],
    ) -> Result<()>;
}

/// One open map file: stream ownership, decoded header, detector set.
///
/// The stream is owned exclusively by the session and released on drop,
/// after draining any outstanding prefetch, on every exit path.
pub struct MapSession<R> {
    buffer: ChunkBuffer<R>,
    header: MapHeader,
    raw_header: Vec<u8>,
    data_start: u64,
    detectors: Vec<u16>,
    short_run: bool,
}

impl MapSession<File> {
    /// Opens a map file from disk.
    ///
    /// # Errors
    /// Configuration, I/O, or header decoding errors.
    pub fn open(path: impl AsRef<Path>, config: &ParseConfig) -> Result<Self> {
        let file = File::open(path)?;
        Self::from_reader(file, config)
    }
}

impl<R> MapSession<R>
where
    R: Read + Seek + Send + 'static,
{
    /// Wraps an already-open stream positioned at offset 0.
    ///
    /// Reads and decodes the file header, then probes the first pixel's
    /// records to discover the detector set.
    ///
    /// # Errors
    /// Header decoding failures are fatal here; so is a stream with no
    /// complete pixel record.
    pub fn from_reader(reader: R, config: &ParseConfig) -> Result<Self> {
        let chunk_size = config.resolve_chunk_size()?;
        let mut buffer = ChunkBuffer::new(reader, chunk_size, config.prefetch())?;

        let prefix_bytes = buffer.read(LENGTH_PREFIX_LEN)?;
        let prefix = [prefix_bytes[0], prefix_bytes[1]];
        let block_len = xrfmap_gpx::header::header_block_len(prefix)?;
        let block = buffer.read(block_len)?.to_vec();
        let header = xrfmap_gpx::header::decode_header(&block)?;

        let mut raw_header = Vec::with_capacity(LENGTH_PREFIX_LEN + block_len);
        raw_header.extend_from_slice(&prefix);
        raw_header.extend_from_slice(&block);
        let data_start = raw_header.len() as u64;

        let detectors = discover_detectors(&mut buffer, data_start)?;
        info!(
            "opened map: {}x{} pixels, {} channels, detectors {:?}",
            header.xres, header.yres, header.nchannels, detectors
        );

        Ok(Self {
            buffer,
            header,
            raw_header,
            data_start,
            detectors,
            short_run: config.short_run(),
        })
    }

    /// Decoded file header.
    #[must_use]
    pub fn header(&self) -> &MapHeader {
        &self.header
    }

    /// Detector ids in the cyclic order they appear within each pixel.
    #[must_use]
    pub fn detectors(&self) -> &[u16] {
        &self.detectors
    }

    /// Raw header bytes (length prefix plus JSON block), as stored in the
    /// file.
    #[must_use]
    pub fn raw_header(&self) -> &[u8] {
        &self.raw_header
    }

    /// Byte offset of the first pixel record.
    #[must_use]
    pub fn data_start(&self) -> u64 {
        self.data_start
    }

    /// Pass 1: headers only, building the byte-offset index.
    ///
    /// # Errors
    /// Fatal format errors (bad marker, malformed length) and I/O errors.
    /// Truncation is not an error; it is reported in the summary.
    pub fn index_pass(&mut self) -> Result<ParseOutcome> {
        let mut index = PixelIndex::new(self.header.npx(), self.detectors.clone());
        let mut series = PixelSeries::new_index_only(&self.header, self.detectors.len());
        let summary = {
            let mut visitor = IndexVisitor {
                index: &mut index,
                series: &mut series,
            };
            self.walk_records(&mut visitor)?
        };
        discard_partial_pixel(&mut index, &mut series, &summary, self.detectors.len());
        Ok(ParseOutcome {
            index,
            series,
            summary,
        })
    }

    /// Pass 2: full decode into dense spectra plus derived statistics and
    /// the deadtime policy.
    ///
    /// The policy is validated before any parsing work begins.
    ///
    /// # Errors
    /// An invalid policy, fatal format errors, or I/O errors.
    pub fn full_pass(
        &mut self,
        policy: DeadtimePolicy,
        predictor: Option<&dyn DeadtimePredictor>,
    ) -> Result<ParseOutcome> {
        policy.validate().map_err(Error::Core)?;
        if matches!(policy, DeadtimePolicy::Predicted) && predictor.is_none() {
            return Err(Error::Core(xrfmap_core::Error::Config(
                "predicted deadtime requires a predictor".to_string(),
            )));
        }

        let mut index = PixelIndex::new(self.header.npx(), self.detectors.clone());
        let mut series = PixelSeries::new_full(&self.header, self.detectors.len());
        let summary = {
            let mut visitor = FullVisitor {
                index: &mut index,
                series: &mut series,
                filler: GapFiller::new(self.header.nchannels),
                channel_warnings: 0,
            };
            let mut summary = self.walk_records(&mut visitor)?;
            summary.channel_warnings = visitor.channel_warnings;
            summary
        };
        discard_partial_pixel(&mut index, &mut series, &summary, self.detectors.len());

        series.derive_statistics();
        series.apply_deadtime(policy, predictor)?;
        if summary.channel_warnings > 0 {
            warn!(
                "{} channel-list deviations across {} records",
                summary.channel_warnings, summary.records
            );
        }
        Ok(ParseOutcome {
            index,
            series,
            summary,
        })
    }

    /// Re-emits the map to `out` with each record's deadtime replaced by
    /// the series' modified value. Everything else is copied verbatim, so
    /// record boundaries in the output match the input exactly.
    ///
    /// # Errors
    /// Fatal format errors or I/O errors on either stream.
    pub fn write_modified<W: Write>(&mut self, series: &PixelSeries, out: W) -> Result<ParseSummary> {
        let mut writer = MapWriter::new(out);
        writer.write_header(&self.raw_header)?;
        let summary = {
            let mut visitor = RewriteVisitor {
                writer: &mut writer,
                series,
            };
            self.walk_records(&mut visitor)?
        };
        writer.finish()?;
        Ok(summary)
    }

    /// Shared traversal for both passes and the re-writer.
    fn walk_records<V: RecordVisitor>(&mut self, visitor: &mut V) -> Result<ParseSummary> {
        let result = self.walk_inner(visitor);
        // Fatal exits must not leave a read-ahead thread running.
        self.buffer.wait();
        result
    }

    fn walk_inner<V: RecordVisitor>(&mut self, visitor: &mut V) -> Result<ParseSummary> {
        self.buffer.rewind_to(self.data_start)?;
        let ndet = self.detectors.len();
        let npx = self.header.npx();
        let total_records = npx * ndet;

        let mut summary = ParseSummary {
            pixels_expected: npx,
            ..ParseSummary::default()
        };
        let mut seq = 0usize;

        while seq < total_records {
            if self.buffer.remaining() == 0 {
                break;
            }
            let offset = self.buffer.position();
            let rec = match self.buffer.read(PIXEL_HEADER_LEN) {
                Ok(bytes) => record::decode_header(bytes, offset)?,
                Err(err) if err.is_out_of_data() => {
                    summary.truncated = true;
                    break;
                }
                Err(err) => return Err(err),
            };

            let pixel = seq / ndet;
            let slot = seq % ndet;
            if self.detectors[slot] != rec.detector {
                warn!(
                    "record at offset {offset}: detector {} out of cyclic order, expected {}",
                    rec.detector, self.detectors[slot]
                );
                summary.detector_order_warnings += 1;
            }

            let payload_len = rec.payload_len();
            if visitor.wants_payload() {
                match self.buffer.read(payload_len) {
                    Ok(payload) => visitor.visit(pixel, slot, offset, &rec, payload)?,
                    Err(err) if err.is_out_of_data() => {
                        summary.truncated = true;
                        break;
                    }
                    Err(err) => return Err(err),
                }
            } else {
                match self.buffer.skip(payload_len) {
                    Ok(()) => visitor.visit(pixel, slot, offset, &rec, &[])?,
                    Err(err) if err.is_out_of_data() => {
                        summary.truncated = true;
                        break;
                    }
                    Err(err) => return Err(err),
                }
            }
            seq += 1;
        }

        if seq == total_records && self.buffer.remaining() > 0 {
            warn!(
                "declared pixel count {npx} reached with {} bytes unread, stopping",
                self.buffer.remaining()
            );
            summary.stopped_early = true;
        }

        summary.records = seq;
        summary.pixels_found = seq / ndet;
        if summary.truncated {
            warn!(
                "stream ended mid-record, discarding partial pixel {}",
                seq / ndet
            );
        }
        if summary.pixels_found < npx {
            let message = format!(
                "pixels found {} < pixels expected {npx}",
                summary.pixels_found
            );
            if self.short_run {
                info!("{message} (short run expected)");
            } else {
                warn!("{message}");
            }
        }
        Ok(summary)
    }
}

/// Drops the index entries and series cells of a trailing partial pixel.
///
/// A truncated run may have visited some records of the pixel before the
/// stream ran out; the summary disowns that pixel, so its data goes too.
fn discard_partial_pixel(
    index: &mut PixelIndex,
    series: &mut PixelSeries,
    summary: &ParseSummary,
    ndet: usize,
) {
    if summary.truncated {
        index.truncate(summary.pixels_found * ndet);
        series.clear_pixel(summary.pixels_found);
    }
}

/// Probes the records of the first pixel to learn the detector set.
///
/// Consecutive records sharing the first record's `(x, y)` define the
/// detectors present; every later pixel repeats that set cyclically.
fn discover_detectors<R>(buffer: &mut ChunkBuffer<R>, data_start: u64) -> Result<Vec<u16>>
where
    R: Read + Seek + Send + 'static,
{
    buffer.rewind_to(data_start)?;
    let mut detectors: Vec<u16> = Vec::new();
    let mut first_xy = None;

    while buffer.remaining() > 0 {
        let offset = buffer.position();
        let bytes = match buffer.peek(PIXEL_HEADER_LEN) {
            Ok(bytes) => bytes,
            Err(err) if err.is_out_of_data() => break,
            Err(err) => return Err(err),
        };
        let rec = record::decode_header(bytes, offset)?;
        match first_xy {
            None => first_xy = Some((rec.x, rec.y)),
            Some(xy) if xy != (rec.x, rec.y) => break,
            Some(_) => {}
        }
        if detectors.contains(&rec.detector) {
            // Same detector again within one coordinate: next pixel
            // repeats the coordinate value, treat the set as complete.
            break;
        }
        detectors.push(rec.detector);
        match buffer.skip(rec.record_len as usize) {
            Ok(()) => {}
            Err(err) if err.is_out_of_data() => break,
            Err(err) => return Err(err),
        }
    }

    if detectors.is_empty() {
        return Err(Error::Config(
            "no complete pixel record to discover detectors from".to_string(),
        ));
    }
    Ok(detectors)
}

struct IndexVisitor<'a> {
    index: &'a mut PixelIndex,
    series: &'a mut PixelSeries,
}

impl RecordVisitor for IndexVisitor<'_> {
    fn wants_payload(&self) -> bool {
        false
    }

    fn visit(
        &mut self,
        pixel: usize,
        slot: usize,
        offset: u64,
        rec: &PixelRecordHeader,
        _payload: &[u8],
    ) -> Result<()> {
        self.index.push(IndexEntry {
            offset,
            record_len: rec.record_len,
        });
        self.series.record_scalars(
            pixel,
            slot,
            rec.detector,
            rec.record_len,
            rec.x,
            rec.y,
            rec.deadtime,
        )?;
        Ok(())
    }
}

struct FullVisitor<'a> {
    index: &'a mut PixelIndex,
    series: &'a mut PixelSeries,
    filler: GapFiller,
    channel_warnings: usize,
}

impl RecordVisitor for FullVisitor<'_> {
    fn wants_payload(&self) -> bool {
        true
    }

    fn visit(
        &mut self,
        pixel: usize,
        slot: usize,
        offset: u64,
        rec: &PixelRecordHeader,
        payload: &[u8],
    ) -> Result<()> {
        self.index.push(IndexEntry {
            offset,
            record_len: rec.record_len,
        });
        self.series.record_scalars(
            pixel,
            slot,
            rec.detector,
            rec.record_len,
            rec.x,
            rec.y,
            rec.deadtime,
        )?;
        let dense = self.series.spectrum_mut(pixel, slot)?;
        let stats = self.filler.fill(payload, dense);
        if !stats.is_clean() {
            self.channel_warnings += stats.duplicates + stats.out_of_range;
        }
        Ok(())
    }
}

struct RewriteVisitor<'a, W: Write> {
    writer: &'a mut MapWriter<W>,
    series: &'a PixelSeries,
}

impl<W: Write> RecordVisitor for RewriteVisitor<'_, W> {
    fn wants_payload(&self) -> bool {
        true
    }

    fn visit(
        &mut self,
        pixel: usize,
        slot: usize,
        _offset: u64,
        rec: &PixelRecordHeader,
        payload: &[u8],
    ) -> Result<()> {
        let deadtime = self.series.dtmod[pixel * self.series.ndet() + slot];
        self.writer.write_record(rec, deadtime, payload)
    }
}
