//! Format-specific error types.

use thiserror::Error;

/// Result type for format decoding.
pub type Result<T> = std::result::Result<T, Error>;

/// GeoPIXE format error types.
#[derive(Error, Debug)]
pub enum Error {
    /// The stream opens directly with a pixel record: map geometry is
    /// unknowable, full parsing cannot proceed.
    #[error("no file header: stream begins with the pixel record marker")]
    HeaderMissing,

    /// The header block is not valid UTF-8.
    #[error("header block is not valid UTF-8: {0}")]
    HeaderEncoding(#[from] std::str::Utf8Error),

    /// The header block is not well-formed JSON.
    #[error("malformed header JSON: {0}")]
    HeaderDecode(#[from] serde_json::Error),

    /// A required header field is absent or non-numeric.
    #[error("missing or non-numeric header field: {0}")]
    HeaderField(String),

    /// The two marker bytes of a record are not "DP". The stream is
    /// desynchronized and cannot be recovered.
    #[error("pixel record marker not found at byte {offset} (found {found:02x?})")]
    BadRecordMarker { offset: u64, found: [u8; 2] },

    /// A record length that cannot hold a record header or implies a
    /// non-integral pair count. Subsequent records would be misaligned.
    #[error("malformed pixel record at byte {offset}: record length {record_len}")]
    MalformedRecord { offset: u64, record_len: u32 },
}
