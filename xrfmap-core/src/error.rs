//! Error types for xrfmap-core.

use thiserror::Error;

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for xrfmap operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Pixel index outside the header-declared map size.
    #[error("pixel {pixel} out of range for map of {npx} pixels")]
    PixelOutOfRange { pixel: usize, npx: usize },

    /// Detector slot outside the discovered detector set.
    #[error("detector slot {slot} out of range for {ndet} detectors")]
    DetectorOutOfRange { slot: usize, ndet: usize },

    /// Spectrum storage requested on an index-only accumulator.
    #[error("pixel series was allocated index-only; spectra are unavailable")]
    IndexOnlySeries,
}
