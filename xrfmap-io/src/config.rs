//! Parse configuration and chunk-size resolution.

use crate::error::{Error, Result};
use sysinfo::{MemoryRefreshKind, RefreshKind, System};

/// Floor for a resolved chunk, 1 MiB.
pub const MIN_CHUNK_BYTES: usize = 1 << 20;
/// Ceiling for a resolved chunk, 256 MiB.
pub const MAX_CHUNK_BYTES: usize = 256 << 20;
/// Chunks resident at once: the window, its consumed prefix, and one
/// prefetch in flight.
const RESIDENT_CHUNKS: usize = 3;

/// Tuning knobs for a parsing session.
///
/// The default derives the chunk size from system memory at open time;
/// an explicit chunk size overrides that.
#[derive(Debug, Clone)]
pub struct ParseConfig {
    chunk_size_bytes: Option<usize>,
    memory_fraction: f64,
    prefetch: bool,
    short_run: bool,
}

impl Default for ParseConfig {
    fn default() -> Self {
        Self {
            chunk_size_bytes: None,
            memory_fraction: 0.25,
            prefetch: true,
            short_run: false,
        }
    }
}

impl ParseConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fixes the chunk size instead of deriving it from system memory.
    #[must_use]
    pub fn with_chunk_size_bytes(mut self, bytes: usize) -> Self {
        self.chunk_size_bytes = Some(bytes);
        self
    }

    /// Fraction of total system memory the buffer may occupy when the
    /// chunk size is derived. Default 0.25.
    #[must_use]
    pub fn with_memory_fraction(mut self, fraction: f64) -> Self {
        self.memory_fraction = fraction;
        self
    }

    /// Enables or disables background prefetch. Default on.
    #[must_use]
    pub fn with_prefetch(mut self, enabled: bool) -> Self {
        self.prefetch = enabled;
        self
    }

    #[must_use]
    pub fn prefetch(&self) -> bool {
        self.prefetch
    }

    /// Declares the scan as known to be interrupted, demoting the
    /// pixel-count shortfall warning to an informational message.
    #[must_use]
    pub fn with_short_run(mut self, expected: bool) -> Self {
        self.short_run = expected;
        self
    }

    #[must_use]
    pub fn short_run(&self) -> bool {
        self.short_run
    }

    /// Validates the configuration.
    ///
    /// # Errors
    /// [`Error::Config`] for a zero chunk size or a memory fraction
    /// outside `(0, 1]`.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size_bytes == Some(0) {
            return Err(Error::Config("chunk size must be at least 1".to_string()));
        }
        if !(self.memory_fraction > 0.0 && self.memory_fraction <= 1.0) {
            return Err(Error::Config(format!(
                "memory fraction must be in (0, 1], got {}",
                self.memory_fraction
            )));
        }
        Ok(())
    }

    /// Resolves the chunk size in bytes.
    ///
    /// An explicit size is taken as-is. Otherwise the budget is
    /// `memory_fraction` of total system memory split across the
    /// resident chunks, clamped to `[1 MiB, 256 MiB]`.
    ///
    /// # Errors
    /// [`Error::Config`] if the configuration fails validation.
    pub fn resolve_chunk_size(&self) -> Result<usize> {
        self.validate()?;
        if let Some(bytes) = self.chunk_size_bytes {
            return Ok(bytes);
        }
        let system = System::new_with_specifics(
            RefreshKind::new().with_memory(MemoryRefreshKind::new().with_ram()),
        );
        let total = system.total_memory();
        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
        #[allow(clippy::cast_sign_loss)]
        let budget = (total as f64 * self.memory_fraction) as usize;
        let chunk = budget / RESIDENT_CHUNKS;
        Ok(chunk.clamp(MIN_CHUNK_BYTES, MAX_CHUNK_BYTES))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_chunk_size_wins() {
        let config = ParseConfig::new().with_chunk_size_bytes(4096);
        assert_eq!(config.resolve_chunk_size().unwrap(), 4096);
    }

    #[test]
    fn derived_chunk_size_is_clamped() {
        let chunk = ParseConfig::new().resolve_chunk_size().unwrap();
        assert!(chunk >= MIN_CHUNK_BYTES);
        assert!(chunk <= MAX_CHUNK_BYTES);
    }

    #[test]
    fn zero_chunk_size_rejected() {
        let config = ParseConfig::new().with_chunk_size_bytes(0);
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn bad_memory_fraction_rejected() {
        for fraction in [0.0, -0.5, 1.5, f64::NAN] {
            let config = ParseConfig::new().with_memory_fraction(fraction);
            assert!(config.validate().is_err(), "fraction {fraction} accepted");
        }
    }
}
