//! xrfmap-io: streaming I/O for GeoPIXE map files.
//!
//! Turns an arbitrarily large map file into a byte-offset index and fully
//! decoded per-pixel spectra while bounding peak memory with a chunked
//! read buffer. An optional background prefetch overlaps disk latency
//! with decode work.
//!
//! # Key components
//!
//! - [`buffer`] - bounded chunk window with optional prefetch
//! - [`session`] - stream ownership, header decode, both passes
//! - [`index`] - the per-(pixel, detector) byte-offset index
//! - [`writer`] - deadtime-substituting map re-writer
//! - [`config`] - parse tuning with a memory-derived chunk size

pub mod buffer;
pub mod config;
pub mod error;
pub mod index;
pub mod session;
pub mod writer;

pub use buffer::ChunkBuffer;
pub use config::ParseConfig;
pub use error::{Error, Result};
pub use index::{IndexEntry, PixelIndex};
pub use session::{MapSession, ParseOutcome, ParseSummary};
pub use writer::MapWriter;
