//! Chunked read buffer with optional background prefetch.
//!
//! The buffer owns a bounded window over the underlying stream and refills
//! it in `chunk_size` steps, so peak memory stays bounded regardless of
//! file size. With prefetch enabled the next chunk is fetched on a
//! background thread while the current window is consumed; at most one
//! prefetch is in flight, and decode order is never reordered relative to
//! chunk order.

#![allow(clippy::cast_possible_truncation)]

use crate::error::{Error, Result};
use std::io::{self, Read, Seek, SeekFrom};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

struct Prefetch {
    offset: u64,
    handle: JoinHandle<io::Result<Vec<u8>>>,
}

/// Bounded in-memory window over a seekable byte stream.
///
/// Every `read`/`peek` is satisfied in full or fails with
/// [`Error::OutOfData`]; a request crossing the window end triggers a
/// refill before the read proceeds. No read ever silently returns fewer
/// bytes than requested.
pub struct ChunkBuffer<R> {
    source: Arc<Mutex<R>>,
    chunk_size: usize,
    prefetch: bool,
    total_len: u64,
    window: Vec<u8>,
    /// Global offset of `window[0]`.
    window_start: u64,
    /// Global cursor; `window_start <= idx <= window_start + window.len()`.
    idx: u64,
    /// Global offset of the next chunk to load.
    next_fetch: u64,
    inflight: Option<Prefetch>,
}

impl<R> ChunkBuffer<R>
where
    R: Read + Seek + Send + 'static,
{
    /// Wraps a stream, probing its total length.
    ///
    /// # Errors
    /// Returns a configuration error for a zero chunk size, or an I/O
    /// error if the stream cannot be probed.
    pub fn new(mut source: R, chunk_size: usize, prefetch: bool) -> Result<Self> {
        if chunk_size == 0 {
            return Err(Error::Config("chunk size must be at least 1".to_string()));
        }
        let total_len = source.seek(SeekFrom::End(0))?;
        source.seek(SeekFrom::Start(0))?;
        Ok(Self {
            source: Arc::new(Mutex::new(source)),
            chunk_size,
            prefetch,
            total_len,
            window: Vec::new(),
            window_start: 0,
            idx: 0,
            next_fetch: 0,
            inflight: None,
        })
    }

    /// Current global cursor position.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.idx
    }

    /// Total stream length in bytes.
    #[must_use]
    pub fn total_len(&self) -> u64 {
        self.total_len
    }

    /// Bytes remaining between the cursor and end of stream.
    #[must_use]
    pub fn remaining(&self) -> u64 {
        self.total_len - self.idx
    }

    fn available(&self) -> usize {
        (self.window_start + self.window.len() as u64 - self.idx) as usize
    }

    /// Reads the next `n` bytes, advancing the cursor.
    ///
    /// # Errors
    /// [`Error::OutOfData`] if `n` exceeds the remaining stream length.
    pub fn read(&mut self, n: usize) -> Result<&[u8]> {
        self.ensure(n)?;
        let start = (self.idx - self.window_start) as usize;
        self.idx += n as u64;
        Ok(&self.window[start..start + n])
    }

    /// Reads the next `n` bytes without advancing the cursor.
    ///
    /// # Errors
    /// [`Error::OutOfData`] if `n` exceeds the remaining stream length.
    pub fn peek(&mut self, n: usize) -> Result<&[u8]> {
        self.ensure(n)?;
        let start = (self.idx - self.window_start) as usize;
        Ok(&self.window[start..start + n])
    }

    /// Advances the cursor by `n` bytes without handing them out.
    ///
    /// Data still flows through the window chunk by chunk, so skipping
    /// never loads more than one chunk beyond the resident window.
    ///
    /// # Errors
    /// [`Error::OutOfData`] if `n` exceeds the remaining stream length.
    pub fn skip(&mut self, n: usize) -> Result<()> {
        if (n as u64) > self.remaining() {
            return Err(Error::OutOfData {
                requested: n,
                remaining: self.remaining(),
            });
        }
        let mut left = n;
        while left > 0 {
            let step = left.min(self.chunk_size);
            self.ensure(step)?;
            self.idx += step as u64;
            left -= step;
        }
        Ok(())
    }

    /// Moves the cursor to an absolute offset, discarding the window and
    /// draining any in-flight prefetch.
    ///
    /// # Errors
    /// [`Error::OutOfData`] for an offset beyond end of stream.
    pub fn rewind_to(&mut self, offset: u64) -> Result<()> {
        if offset > self.total_len {
            return Err(Error::OutOfData {
                requested: (offset - self.total_len) as usize,
                remaining: 0,
            });
        }
        self.wait();
        self.window.clear();
        self.window_start = offset;
        self.idx = offset;
        self.next_fetch = offset;
        Ok(())
    }

    /// Blocks until any in-flight prefetch completes, discarding its
    /// result. Call before shutdown paths that bypass the refill path, so
    /// no read-ahead thread outlives the buffer's use.
    pub fn wait(&mut self) {
        if let Some(prefetch) = self.inflight.take() {
            let _ = prefetch.handle.join();
        }
    }

    fn ensure(&mut self, n: usize) -> Result<()> {
        while self.available() < n {
            if self.next_fetch >= self.total_len {
                return Err(Error::OutOfData {
                    requested: n,
                    remaining: self.remaining(),
                });
            }
            let len = (self.total_len - self.next_fetch).min(self.chunk_size as u64) as usize;
            let chunk = self.next_chunk(len)?;
            self.compact();
            self.window.extend_from_slice(&chunk);
            self.next_fetch += chunk.len() as u64;
            if self.prefetch {
                self.spawn_prefetch();
            }
        }
        Ok(())
    }

    /// Takes the next chunk from a completed prefetch when its offset
    /// lines up, falling back to a direct read.
    fn next_chunk(&mut self, len: usize) -> Result<Vec<u8>> {
        if let Some(prefetch) = self.inflight.take() {
            let offset = prefetch.offset;
            let chunk = prefetch
                .handle
                .join()
                .map_err(|_| io::Error::new(io::ErrorKind::Other, "prefetch thread panicked"))??;
            if offset == self.next_fetch && chunk.len() == len {
                return Ok(chunk);
            }
        }
        Ok(fetch_chunk(&self.source, self.next_fetch, len)?)
    }

    fn spawn_prefetch(&mut self) {
        debug_assert!(self.inflight.is_none(), "prefetch already in flight");
        if self.inflight.is_some() || self.next_fetch >= self.total_len {
            return;
        }
        let offset = self.next_fetch;
        let len = (self.total_len - offset).min(self.chunk_size as u64) as usize;
        let source = Arc::clone(&self.source);
        let handle = thread::spawn(move || fetch_chunk(&source, offset, len));
        self.inflight = Some(Prefetch { offset, handle });
    }

    /// Drops the consumed window prefix once it exceeds one chunk.
    fn compact(&mut self) {
        let consumed = (self.idx - self.window_start) as usize;
        if consumed >= self.chunk_size {
            self.window.drain(..consumed);
            self.window_start = self.idx;
        }
    }
}

impl<R> Drop for ChunkBuffer<R> {
    fn drop(&mut self) {
        if let Some(prefetch) = self.inflight.take() {
            let _ = prefetch.handle.join();
        }
    }
}

fn fetch_chunk<R: Read + Seek>(
    source: &Arc<Mutex<R>>,
    offset: u64,
    len: usize,
) -> io::Result<Vec<u8>> {
    let mut guard = source
        .lock()
        .map_err(|_| io::Error::new(io::ErrorKind::Other, "source lock poisoned"))?;
    guard.seek(SeekFrom::Start(offset))?;
    let mut chunk = vec![0u8; len];
    guard.read_exact(&mut chunk)?;
    Ok(chunk)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn data(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    fn buffer(bytes: Vec<u8>, chunk_size: usize, prefetch: bool) -> ChunkBuffer<Cursor<Vec<u8>>> {
        ChunkBuffer::new(Cursor::new(bytes), chunk_size, prefetch).unwrap()
    }

    #[test]
    fn read_advances_cursor() {
        let mut buf = buffer(data(100), 16, false);
        assert_eq!(buf.total_len(), 100);
        assert_eq!(buf.read(4).unwrap(), &data(100)[0..4]);
        assert_eq!(buf.position(), 4);
        assert_eq!(buf.remaining(), 96);
    }

    #[test]
    fn peek_does_not_advance() {
        let mut buf = buffer(data(32), 8, false);
        assert_eq!(buf.peek(6).unwrap(), &data(32)[0..6]);
        assert_eq!(buf.position(), 0);
        assert_eq!(buf.read(6).unwrap(), &data(32)[0..6]);
    }

    #[test]
    fn reads_crossing_chunk_boundaries() {
        let bytes = data(100);
        let mut buf = buffer(bytes.clone(), 7, false);
        let mut collected = Vec::new();
        for step in [3usize, 11, 20, 5, 41, 20] {
            collected.extend_from_slice(buf.read(step).unwrap());
        }
        assert_eq!(collected, bytes);
        assert_eq!(buf.remaining(), 0);
    }

    #[test]
    fn prefetch_yields_identical_bytes() {
        let bytes = data(1000);
        let mut plain = buffer(bytes.clone(), 32, false);
        let mut fetched = buffer(bytes, 32, true);
        loop {
            let n = 13.min(plain.remaining() as usize);
            if n == 0 {
                break;
            }
            assert_eq!(plain.read(n).unwrap(), fetched.read(n).unwrap());
        }
        assert_eq!(fetched.remaining(), 0);
        fetched.wait();
    }

    #[test]
    fn out_of_data_past_end() {
        let mut buf = buffer(data(10), 4, false);
        buf.read(8).unwrap();
        match buf.read(4) {
            Err(Error::OutOfData {
                requested,
                remaining,
            }) => {
                assert_eq!(requested, 4);
                assert_eq!(remaining, 2);
            }
            other => panic!("expected OutOfData, got {other:?}"),
        }
        // remaining bytes still readable after the failed request
        assert_eq!(buf.read(2).unwrap().len(), 2);
    }

    #[test]
    fn skip_spans_chunks() {
        let bytes = data(100);
        let mut buf = buffer(bytes.clone(), 8, true);
        buf.read(5).unwrap();
        buf.skip(60).unwrap();
        assert_eq!(buf.position(), 65);
        assert_eq!(buf.read(5).unwrap(), &bytes[65..70]);
        assert!(buf.skip(100).is_err());
    }

    #[test]
    fn rewind_discards_window() {
        let bytes = data(64);
        let mut buf = buffer(bytes.clone(), 16, true);
        buf.read(40).unwrap();
        buf.rewind_to(8).unwrap();
        assert_eq!(buf.position(), 8);
        assert_eq!(buf.read(8).unwrap(), &bytes[8..16]);
        assert!(buf.rewind_to(65).is_err());
    }

    #[test]
    fn zero_chunk_size_rejected() {
        assert!(matches!(
            ChunkBuffer::new(Cursor::new(vec![0u8; 4]), 0, false),
            Err(Error::Config(_))
        ));
    }
}
