//! xrfmap-gpx: GeoPIXE map format decoder.
//!
//! A map file is a 2-byte little-endian length prefix, a JSON header
//! block, and then a flat stream of pixel records. Each record carries one
//! detector's spectrum for one scan coordinate as sparse
//! `(channel, count)` pairs.
//!
//! # Key components
//!
//! - [`header`] - file header decoding into a [`xrfmap_core::MapHeader`]
//! - [`record`] - the pixel record state machine and gap filling
//!
//! Record layout (little-endian):
//!
//! ```text
//! offset  size  field
//! 0       2     marker, the characters "DP"
//! 2       4     record_len (u32), total bytes including the marker
//! 6       2     x (u16)
//! 8       2     y (u16)
//! 10      2     detector (u16)
//! 12      4     deadtime (f32)
//! 16..    4*k   k pairs of (channel: u16, count: u16)
//! ```

pub mod error;
pub mod header;
pub mod record;

pub use error::{Error, Result};
pub use record::{GapFillStats, GapFiller, PixelRecordHeader};

/// Marker bytes opening every pixel record.
pub const PIXEL_MARKER: [u8; 2] = *b"DP";

/// The marker reinterpreted as a little-endian u16 (20550). A file whose
/// length prefix equals this value has no header.
pub const PIXEL_MARKER_U16: u16 = u16::from_le_bytes(PIXEL_MARKER);

/// Fixed size of a pixel record header, marker included.
pub const PIXEL_HEADER_LEN: usize = 16;

/// Wire size of one sparse (channel, count) pair.
pub const BYTES_PER_PAIR: usize = 4;

/// Size of the file-header length prefix.
pub const LENGTH_PREFIX_LEN: usize = 2;
