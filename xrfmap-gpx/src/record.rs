//! Pixel record decoding and gap filling.
//!
//! Records are not name/value pairs for file size reasons; only the file
//! header is. Channels with zero events are omitted from the payload, so a
//! decoded spectrum must be expanded back to a dense vector before use.

use crate::error::{Error, Result};
use crate::{BYTES_PER_PAIR, PIXEL_HEADER_LEN, PIXEL_MARKER};
use log::warn;

/// Decoded fixed-size header of one pixel record.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PixelRecordHeader {
    /// Total record length in bytes, marker included.
    pub record_len: u32,
    /// Horizontal pixel coordinate.
    pub x: u16,
    /// Vertical pixel coordinate.
    pub y: u16,
    /// Detector id for this record.
    pub detector: u16,
    /// Deadtime percentage for this pixel/detector.
    pub deadtime: f32,
}

impl PixelRecordHeader {
    /// Payload length in bytes.
    #[must_use]
    pub fn payload_len(&self) -> usize {
        self.record_len as usize - PIXEL_HEADER_LEN
    }

    /// Number of sparse (channel, count) pairs in the payload.
    #[must_use]
    pub fn pair_count(&self) -> usize {
        self.payload_len() / BYTES_PER_PAIR
    }

    /// Serializes the header back to its wire form with a substituted
    /// deadtime. All other fields round-trip exactly; every field is
    /// fixed-width little-endian.
    #[must_use]
    pub fn to_wire(&self, deadtime: f32) -> [u8; PIXEL_HEADER_LEN] {
        let mut out = [0u8; PIXEL_HEADER_LEN];
        out[0..2].copy_from_slice(&PIXEL_MARKER);
        out[2..6].copy_from_slice(&self.record_len.to_le_bytes());
        out[6..8].copy_from_slice(&self.x.to_le_bytes());
        out[8..10].copy_from_slice(&self.y.to_le_bytes());
        out[10..12].copy_from_slice(&self.detector.to_le_bytes());
        out[12..16].copy_from_slice(&deadtime.to_le_bytes());
        out
    }
}

/// Decodes the fixed-size record header at `offset`.
///
/// `bytes` must hold exactly [`PIXEL_HEADER_LEN`] bytes; `offset` is the
/// record's position in the stream, used for error reporting only.
///
/// # Errors
/// [`Error::BadRecordMarker`] when the marker bytes are not "DP" (the
/// stream is desynchronized; fatal), [`Error::MalformedRecord`] when the
/// declared length cannot hold the header or implies a fractional pair
/// count (subsequent records would be misaligned; fatal).
pub fn decode_header(bytes: &[u8], offset: u64) -> Result<PixelRecordHeader> {
    debug_assert_eq!(bytes.len(), PIXEL_HEADER_LEN);

    let marker = [bytes[0], bytes[1]];
    if marker != PIXEL_MARKER {
        return Err(Error::BadRecordMarker {
            offset,
            found: marker,
        });
    }

    let record_len = u32::from_le_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]);
    let payload = (record_len as usize).checked_sub(PIXEL_HEADER_LEN);
    match payload {
        Some(len) if len % BYTES_PER_PAIR == 0 => {}
        _ => {
            return Err(Error::MalformedRecord { offset, record_len });
        }
    }

    Ok(PixelRecordHeader {
        record_len,
        x: u16::from_le_bytes([bytes[6], bytes[7]]),
        y: u16::from_le_bytes([bytes[8], bytes[9]]),
        detector: u16::from_le_bytes([bytes[10], bytes[11]]),
        deadtime: f32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]),
    })
}

/// Iterates the sparse (channel, count) pairs of a record payload.
///
/// The payload length was validated as a multiple of [`BYTES_PER_PAIR`]
/// when the record header was decoded.
pub fn decode_payload(payload: &[u8]) -> impl Iterator<Item = (u16, u16)> + '_ {
    payload.chunks_exact(BYTES_PER_PAIR).map(|pair| {
        (
            u16::from_le_bytes([pair[0], pair[1]]),
            u16::from_le_bytes([pair[2], pair[3]]),
        )
    })
}

/// Counters describing one gap-fill expansion.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GapFillStats {
    /// Distinct channels written into the dense spectrum.
    pub channels: usize,
    /// Channel indices repeated within the record (later value wins).
    pub duplicates: usize,
    /// Channel indices at or beyond the configured channel count, dropped.
    pub out_of_range: usize,
}

impl GapFillStats {
    /// Whether the payload deviated from a well-formed channel list.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.duplicates == 0 && self.out_of_range == 0
    }
}

/// Expands sparse payloads into dense spectra.
///
/// Owns a generation-stamped scratch array so duplicate channel indices
/// can be detected without a per-record allocation. Create one per pass
/// and reuse it for every record.
#[derive(Debug)]
pub struct GapFiller {
    stamp: Vec<u32>,
    generation: u32,
}

impl GapFiller {
    /// Creates a filler for spectra of `nchannels` channels.
    #[must_use]
    pub fn new(nchannels: usize) -> Self {
        Self {
            stamp: vec![0; nchannels],
            generation: 0,
        }
    }

    /// Gap-fills one payload into `dense`.
    ///
    /// Every channel absent from the sparse pairs is set to zero; present
    /// channels take their recorded count. A repeated channel index is a
    /// documented leniency: the later occurrence overwrites the earlier,
    /// with a warning. Channel indices outside `dense` are dropped with a
    /// warning rather than written out of bounds.
    pub fn fill(&mut self, payload: &[u8], dense: &mut [u16]) -> GapFillStats {
        debug_assert_eq!(self.stamp.len(), dense.len());
        self.advance_generation();

        let mut stats = GapFillStats::default();
        dense.fill(0);
        for (channel, count) in decode_payload(payload) {
            let chan = channel as usize;
            if chan >= dense.len() {
                warn!("channel index {channel} beyond {} channels, dropped", dense.len());
                stats.out_of_range += 1;
                continue;
            }
            if self.stamp[chan] == self.generation {
                warn!("channel {channel} repeated within one record, overwriting");
                stats.duplicates += 1;
            } else {
                self.stamp[chan] = self.generation;
                stats.channels += 1;
            }
            dense[chan] = count;
        }
        stats
    }

    fn advance_generation(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        if self.generation == 0 {
            self.stamp.fill(0);
            self.generation = 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn wire_record(x: u16, y: u16, det: u16, dt: f32, pairs: &[(u16, u16)]) -> Vec<u8> {
        let record_len = (PIXEL_HEADER_LEN + pairs.len() * BYTES_PER_PAIR) as u32;
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&PIXEL_MARKER);
        bytes.extend_from_slice(&record_len.to_le_bytes());
        bytes.extend_from_slice(&x.to_le_bytes());
        bytes.extend_from_slice(&y.to_le_bytes());
        bytes.extend_from_slice(&det.to_le_bytes());
        bytes.extend_from_slice(&dt.to_le_bytes());
        for (chan, count) in pairs {
            bytes.extend_from_slice(&chan.to_le_bytes());
            bytes.extend_from_slice(&count.to_le_bytes());
        }
        bytes
    }

    #[test]
    fn decode_header_round_trip() {
        let bytes = wire_record(3, 7, 1, 12.5, &[(4, 100), (9, 2)]);
        let header = decode_header(&bytes[..PIXEL_HEADER_LEN], 0).unwrap();
        assert_eq!(header.record_len, 24);
        assert_eq!(header.x, 3);
        assert_eq!(header.y, 7);
        assert_eq!(header.detector, 1);
        assert_relative_eq!(header.deadtime, 12.5);
        assert_eq!(header.pair_count(), 2);
        assert_eq!(header.payload_len(), 8);
    }

    #[test]
    fn bad_marker_is_fatal() {
        let mut bytes = wire_record(0, 0, 0, 0.0, &[]);
        bytes[0] = b'X';
        match decode_header(&bytes[..PIXEL_HEADER_LEN], 42) {
            Err(Error::BadRecordMarker { offset, found }) => {
                assert_eq!(offset, 42);
                assert_eq!(found, [b'X', b'P']);
            }
            other => panic!("expected BadRecordMarker, got {other:?}"),
        }
    }

    #[test]
    fn fractional_pair_count_is_malformed() {
        let mut bytes = wire_record(0, 0, 0, 0.0, &[(1, 1)]);
        bytes[2..6].copy_from_slice(&18u32.to_le_bytes());
        assert!(matches!(
            decode_header(&bytes[..PIXEL_HEADER_LEN], 0),
            Err(Error::MalformedRecord { record_len: 18, .. })
        ));
    }

    #[test]
    fn undersized_record_len_is_malformed() {
        let mut bytes = wire_record(0, 0, 0, 0.0, &[]);
        bytes[2..6].copy_from_slice(&8u32.to_le_bytes());
        assert!(matches!(
            decode_header(&bytes[..PIXEL_HEADER_LEN], 0),
            Err(Error::MalformedRecord { .. })
        ));
    }

    #[test]
    fn payload_pairs_decode_in_order() {
        let bytes = wire_record(0, 0, 0, 0.0, &[(4, 100), (9, 2)]);
        let pairs: Vec<_> = decode_payload(&bytes[PIXEL_HEADER_LEN..]).collect();
        assert_eq!(pairs, vec![(4, 100), (9, 2)]);
    }

    #[test]
    fn gap_fill_expands_sparse_pairs() {
        let bytes = wire_record(0, 0, 0, 0.0, &[(1, 5), (6, 9)]);
        let mut filler = GapFiller::new(8);
        let mut dense = vec![u16::MAX; 8];
        let stats = filler.fill(&bytes[PIXEL_HEADER_LEN..], &mut dense);
        assert_eq!(dense, vec![0, 5, 0, 0, 0, 0, 9, 0]);
        assert_eq!(stats.channels, 2);
        assert!(stats.is_clean());
    }

    #[test]
    fn gap_fill_empty_payload_is_all_zero() {
        let mut filler = GapFiller::new(8);
        let mut dense = vec![3u16; 8];
        let stats = filler.fill(&[], &mut dense);
        assert_eq!(dense, vec![0; 8]);
        assert_eq!(stats.channels, 0);
    }

    #[test]
    fn gap_fill_idempotent_for_complete_payloads() {
        let pairs: Vec<(u16, u16)> = (0..8).map(|c| (c, c + 10)).collect();
        let bytes = wire_record(0, 0, 0, 0.0, &pairs);
        let mut filler = GapFiller::new(8);
        let mut dense = vec![0u16; 8];
        filler.fill(&bytes[PIXEL_HEADER_LEN..], &mut dense);
        let expected: Vec<u16> = (10..18).collect();
        assert_eq!(dense, expected);

        let mut again = vec![0u16; 8];
        filler.fill(&bytes[PIXEL_HEADER_LEN..], &mut again);
        assert_eq!(again, expected);
    }

    #[test]
    fn duplicate_channel_later_wins() {
        let bytes = wire_record(0, 0, 0, 0.0, &[(2, 5), (2, 7)]);
        let mut filler = GapFiller::new(4);
        let mut dense = vec![0u16; 4];
        let stats = filler.fill(&bytes[PIXEL_HEADER_LEN..], &mut dense);
        assert_eq!(dense[2], 7);
        assert_eq!(stats.duplicates, 1);
        assert_eq!(stats.channels, 1);
        assert!(!stats.is_clean());
    }

    #[test]
    fn out_of_range_channel_dropped() {
        let bytes = wire_record(0, 0, 0, 0.0, &[(1, 5), (100, 9)]);
        let mut filler = GapFiller::new(4);
        let mut dense = vec![0u16; 4];
        let stats = filler.fill(&bytes[PIXEL_HEADER_LEN..], &mut dense);
        assert_eq!(dense, vec![0, 5, 0, 0]);
        assert_eq!(stats.out_of_range, 1);
    }

    #[test]
    fn to_wire_round_trips_with_substituted_deadtime() {
        let bytes = wire_record(3, 7, 1, 12.5, &[(4, 100)]);
        let header = decode_header(&bytes[..PIXEL_HEADER_LEN], 0).unwrap();
        let rewritten = header.to_wire(50.0);
        assert_eq!(&rewritten[..12], &bytes[..12]);
        assert_eq!(&rewritten[12..16], &50.0f32.to_le_bytes());

        let reparsed = decode_header(&rewritten, 0).unwrap();
        assert_relative_eq!(reparsed.deadtime, 50.0);
        assert_eq!(reparsed.x, header.x);
    }
}
