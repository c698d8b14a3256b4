//! xrfmap-core: Core types for X-ray fluorescence map processing.
//!
//! This crate provides the foundational value types shared by the format
//! and I/O layers: the parsed map header, the pixel series accumulator,
//! and the deadtime modification policy.

pub mod deadtime;
pub mod error;
pub mod header;
pub mod series;

pub use deadtime::{DeadtimePolicy, DeadtimePredictor};
pub use error::{Error, Result};
pub use header::MapHeader;
pub use series::PixelSeries;
