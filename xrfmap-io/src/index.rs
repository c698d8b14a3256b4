//! Byte-offset index over the pixel records of a map file.

/// Location of one pixel record in the source stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    /// Absolute byte offset of the record's "DP" marker.
    pub offset: u64,
    /// Total record length in bytes, marker included.
    pub record_len: u32,
}

/// Record offsets keyed by `[pixel][detector slot]`.
///
/// Built by the index pass; lets later passes seek straight to any
/// pixel's records without re-walking the file.
#[derive(Debug, Clone)]
pub struct PixelIndex {
    /// Detector numbers in the order they appear within each pixel.
    detectors: Vec<u16>,
    /// `npx * ndet` entries, row-major by pixel.
    entries: Vec<IndexEntry>,
    filled: usize,
}

impl PixelIndex {
    #[must_use]
    pub fn new(npx: usize, detectors: Vec<u16>) -> Self {
        let ndet = detectors.len();
        Self {
            detectors,
            entries: vec![
                IndexEntry {
                    offset: 0,
                    record_len: 0
                };
                npx * ndet
            ],
            filled: 0,
        }
    }

    /// Detector numbers seen in each pixel, in file order.
    #[must_use]
    pub fn detectors(&self) -> &[u16] {
        &self.detectors
    }

    #[must_use]
    pub fn detector_count(&self) -> usize {
        self.detectors.len()
    }

    /// Number of entries actually recorded; less than capacity after a
    /// truncated run.
    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.filled
    }

    /// Records the next entry in sequence order.
    pub fn push(&mut self, entry: IndexEntry) {
        if self.filled < self.entries.len() {
            self.entries[self.filled] = entry;
            self.filled += 1;
        }
    }

    /// Drops any entries past `len`, used to discard a trailing partial
    /// pixel after a truncated run.
    pub fn truncate(&mut self, len: usize) {
        if len < self.filled {
            self.filled = len;
        }
    }

    /// Entry for `pixel`'s record in detector slot `slot`, or `None`
    /// when the run ended before reaching it.
    #[must_use]
    pub fn entry(&self, pixel: usize, slot: usize) -> Option<IndexEntry> {
        let ndet = self.detectors.len();
        if slot >= ndet {
            return None;
        }
        let flat = pixel * ndet + slot;
        (flat < self.filled).then(|| self.entries[flat])
    }

    /// All recorded entries in file order.
    #[must_use]
    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries[..self.filled]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_keyed_by_pixel_and_slot() {
        let mut index = PixelIndex::new(2, vec![0, 3]);
        for i in 0..4u64 {
            index.push(IndexEntry {
                offset: 100 * i,
                record_len: 20,
            });
        }
        assert_eq!(index.entry_count(), 4);
        assert_eq!(index.entry(1, 1).unwrap().offset, 300);
        assert_eq!(index.entry(1, 0).unwrap().offset, 200);
        assert!(index.entry(2, 0).is_none());
        assert!(index.entry(0, 2).is_none());
    }

    #[test]
    fn truncate_drops_trailing_entries() {
        let mut index = PixelIndex::new(2, vec![0, 1]);
        for i in 0..3u64 {
            index.push(IndexEntry {
                offset: 20 * i,
                record_len: 20,
            });
        }
        index.truncate(2);
        assert_eq!(index.entry_count(), 2);
        assert!(index.entry(1, 0).is_none());
        // growing is not possible
        index.truncate(5);
        assert_eq!(index.entry_count(), 2);
    }

    #[test]
    fn short_run_leaves_tail_unfilled() {
        let mut index = PixelIndex::new(3, vec![0]);
        index.push(IndexEntry {
            offset: 42,
            record_len: 20,
        });
        assert_eq!(index.entry_count(), 1);
        assert!(index.entry(1, 0).is_none());
        assert_eq!(index.entries().len(), 1);
    }
}
