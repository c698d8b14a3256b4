//! I/O error types.

use thiserror::Error;

/// Result type for I/O operations.
pub type Result<T> = std::result::Result<T, Error>;

/// I/O error types.
#[derive(Error, Debug)]
pub enum Error {
    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A read requested more bytes than remain in the stream. Normal
    /// termination only when it occurs exactly at a record boundary.
    #[error("requested {requested} bytes with only {remaining} remaining")]
    OutOfData { requested: usize, remaining: u64 },

    /// Invalid parse configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Format decoding error.
    #[error("format error: {0}")]
    Format(#[from] xrfmap_gpx::Error),

    /// Core library error.
    #[error("core error: {0}")]
    Core(#[from] xrfmap_core::Error),
}

impl Error {
    /// Whether this is an out-of-data condition, the signal the record
    /// walk uses to distinguish truncation from hard failures.
    #[must_use]
    pub fn is_out_of_data(&self) -> bool {
        matches!(self, Error::OutOfData { .. })
    }
}
