//! Fixed-capacity circular byte ring.
//!
//! The ring is the storage primitive under each priority tier: a single
//! byte buffer allocated once, with a start cursor marking the oldest byte
//! and a length marking the used region. Appends go through [`RingWriter`]
//! (a [`RecordSink`]), reads through [`RingReader`] (a [`RecordSource`]);
//! both address *logical* offsets counted from the oldest byte, so
//! wraparound is entirely internal.
//!
//! # Design
//!
//! - Capacity is fixed at construction and never transiently exceeded;
//!   appends fail with `NoSpace` rather than evicting.
//! - Eviction removes exactly one oldest block; the caller supplies the
//!   block length it obtained by decoding the record envelope at the read
//!   cursor, since the ring itself is framing-agnostic.
//! - [`RingCheckpoint`] snapshots both cursors in O(1), which is what
//!   makes multi-step operations across several rings atomic: restoring a
//!   checkpoint resurrects evicted bytes because nothing is zeroed.

use crate::error::RecordError;
use crate::record::{RecordSink, RecordSource};

/// A fixed-capacity circular byte buffer.
#[derive(Debug)]
pub struct ByteRing {
    buf: Box<[u8]>,
    /// Physical index of the oldest byte.
    start: usize,
    /// Used bytes.
    len: usize,
}

/// O(1) snapshot of a ring's cursors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RingCheckpoint {
    start: usize,
    len: usize,
}

impl ByteRing {
    /// Allocates a ring of `capacity` bytes. This is the only allocation
    /// the ring ever performs.
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0u8; capacity].into_boxed_slice(),
            start: 0,
            len: 0,
        }
    }

    /// Total capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Bytes currently used.
    pub fn used(&self) -> usize {
        self.len
    }

    /// Bytes currently free.
    pub fn free(&self) -> usize {
        self.buf.len() - self.len
    }

    /// Whether the ring holds no data.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Snapshots both cursors.
    pub fn checkpoint(&self) -> RingCheckpoint {
        RingCheckpoint { start: self.start, len: self.len }
    }

    /// Restores a previously taken checkpoint.
    ///
    /// Valid only for checkpoints taken on this ring, and only while no
    /// bytes the checkpoint covers have been overwritten. The engine
    /// therefore only rewinds its own appends, which never touch bytes a
    /// live checkpoint covers.
    pub fn restore(&mut self, checkpoint: RingCheckpoint) {
        self.start = checkpoint.start;
        self.len = checkpoint.len;
    }

    /// Removes the oldest block of `block_len` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::Malformed`] if `block_len` exceeds the used
    /// region, which means the caller's framing is wrong.
    pub fn evict_oldest(&mut self, block_len: usize) -> Result<(), RecordError> {
        if block_len > self.len {
            return Err(RecordError::Malformed { reason: "evicting past end of ring data" });
        }
        self.start = (self.start + block_len) % self.buf.len();
        self.len -= block_len;
        Ok(())
    }

    /// An appending writer over the free region.
    pub fn writer(&mut self) -> RingWriter<'_> {
        RingWriter { ring: self }
    }

    /// A reader positioned at the oldest byte.
    pub fn reader(&self) -> RingReader<'_> {
        self.reader_at(0)
    }

    /// A reader positioned at logical offset `at` from the oldest byte.
    pub fn reader_at(&self, at: usize) -> RingReader<'_> {
        RingReader { ring: self, at }
    }

    fn index(&self, logical: usize) -> usize {
        (self.start + logical) % self.buf.len()
    }

    /// Wrap-aware copy into the ring at a logical offset.
    fn copy_in(&mut self, logical: usize, bytes: &[u8]) {
        let at = self.index(logical);
        let head = bytes.len().min(self.buf.len() - at);
        self.buf[at..at + head].copy_from_slice(&bytes[..head]);
        if head < bytes.len() {
            self.buf[..bytes.len() - head].copy_from_slice(&bytes[head..]);
        }
    }

    /// Wrap-aware copy out of the ring from a logical offset.
    fn copy_out(&self, logical: usize, out: &mut [u8]) {
        let at = self.index(logical);
        let head = out.len().min(self.buf.len() - at);
        out[..head].copy_from_slice(&self.buf[at..at + head]);
        let tail = out.len() - head;
        if tail > 0 {
            out[head..].copy_from_slice(&self.buf[..tail]);
        }
    }

    /// Overwrites one byte at a logical offset. Test-only corruption hook.
    #[cfg(test)]
    pub(crate) fn poke(&mut self, logical: usize, value: u8) {
        let at = self.index(logical);
        self.buf[at] = value;
    }
}

/// Appending [`RecordSink`] over a [`ByteRing`].
///
/// Stream positions are logical offsets from the ring's oldest byte, so
/// `pos()` equals the ring's used length.
#[derive(Debug)]
pub struct RingWriter<'a> {
    ring: &'a mut ByteRing,
}

impl RecordSink for RingWriter<'_> {
    fn pos(&self) -> usize {
        self.ring.len
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), RecordError> {
        if bytes.len() > self.ring.free() {
            return Err(RecordError::NoSpace {
                needed: bytes.len(),
                available: self.ring.free(),
            });
        }
        let at = self.ring.len;
        self.ring.copy_in(at, bytes);
        self.ring.len += bytes.len();
        Ok(())
    }

    fn patch(&mut self, at: usize, bytes: &[u8]) -> Result<(), RecordError> {
        if at + bytes.len() > self.ring.len {
            return Err(RecordError::Malformed { reason: "patch outside written region" });
        }
        self.ring.copy_in(at, bytes);
        Ok(())
    }

    fn truncate(&mut self, to: usize) {
        if to < self.ring.len {
            self.ring.len = to;
        }
    }
}

/// Reading [`RecordSource`] over a [`ByteRing`].
#[derive(Debug, Clone)]
pub struct RingReader<'a> {
    ring: &'a ByteRing,
    at: usize,
}

impl RecordSource for RingReader<'_> {
    fn offset(&self) -> usize {
        self.at
    }

    fn remaining(&self) -> usize {
        self.ring.len.saturating_sub(self.at)
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), RecordError> {
        if buf.len() > self.remaining() {
            return Err(RecordError::Malformed { reason: "read past end of ring data" });
        }
        self.ring.copy_out(self.at, buf);
        self.at += buf.len();
        Ok(())
    }

    fn skip(&mut self, n: usize) -> Result<(), RecordError> {
        if n > self.remaining() {
            return Err(RecordError::Malformed { reason: "skip past end of ring data" });
        }
        self.at += n;
        Ok(())
    }

    fn peek_at(&self, at: usize, buf: &mut [u8]) -> Result<(), RecordError> {
        if at + buf.len() > self.ring.len {
            return Err(RecordError::Malformed { reason: "peek past end of ring data" });
        }
        self.ring.copy_out(at, buf);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn append(ring: &mut ByteRing, bytes: &[u8]) -> Result<(), RecordError> {
        ring.writer().write_all(bytes)
    }

    fn read_all(ring: &ByteRing) -> Vec<u8> {
        let mut out = vec![0u8; ring.used()];
        let mut reader = ring.reader();
        reader.read_exact(&mut out).unwrap();
        out
    }

    #[test]
    fn test_empty_ring() {
        let ring = ByteRing::new(16);
        assert_eq!(ring.capacity(), 16);
        assert_eq!(ring.used(), 0);
        assert_eq!(ring.free(), 16);
        assert!(ring.is_empty());
    }

    #[test]
    fn test_append_and_read() {
        let mut ring = ByteRing::new(16);
        append(&mut ring, b"hello").unwrap();
        assert_eq!(ring.used(), 5);
        assert_eq!(read_all(&ring), b"hello");
    }

    #[test]
    fn test_no_space_is_all_or_nothing() {
        let mut ring = ByteRing::new(8);
        append(&mut ring, b"12345").unwrap();
        let err = append(&mut ring, b"6789").unwrap_err();
        assert!(matches!(err, RecordError::NoSpace { needed: 4, available: 3 }));
        assert_eq!(ring.used(), 5);
        assert_eq!(read_all(&ring), b"12345");
    }

    #[test]
    fn test_capacity_never_exceeded_at_boundary() {
        let mut ring = ByteRing::new(8);
        append(&mut ring, b"12345678").unwrap();
        assert_eq!(ring.free(), 0);
        assert!(append(&mut ring, b"x").is_err());
    }

    #[test]
    fn test_evict_then_wraparound_append() {
        let mut ring = ByteRing::new(8);
        append(&mut ring, b"abcdef").unwrap();
        ring.evict_oldest(4).unwrap();
        assert_eq!(read_all(&ring), b"ef");

        // Free space spans the physical end; this append wraps.
        append(&mut ring, b"ghijk").unwrap();
        assert_eq!(read_all(&ring), b"efghijk");
    }

    #[test]
    fn test_read_across_wrap_boundary() {
        let mut ring = ByteRing::new(8);
        append(&mut ring, b"abcdef").unwrap();
        ring.evict_oldest(5).unwrap();
        append(&mut ring, b"01234").unwrap();

        let mut reader = ring.reader_at(1);
        let mut buf = [0u8; 4];
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"0123");
    }

    #[test]
    fn test_patch_wraps() {
        let mut ring = ByteRing::new(8);
        append(&mut ring, b"abcdef").unwrap();
        ring.evict_oldest(5).unwrap();
        append(&mut ring, b"01234").unwrap(); // physically wraps

        ring.writer().patch(1, b"XYZW").unwrap();
        assert_eq!(read_all(&ring), b"fXYZW4");
    }

    #[test]
    fn test_evict_past_contents_rejected() {
        let mut ring = ByteRing::new(8);
        append(&mut ring, b"ab").unwrap();
        assert!(ring.evict_oldest(3).is_err());
    }

    #[test]
    fn test_checkpoint_restore_resurrects_evicted_bytes() {
        let mut ring = ByteRing::new(16);
        append(&mut ring, b"abcdef").unwrap();
        let checkpoint = ring.checkpoint();

        ring.evict_oldest(3).unwrap();
        assert_eq!(read_all(&ring), b"def");

        ring.restore(checkpoint);
        assert_eq!(read_all(&ring), b"abcdef");
    }

    #[test]
    fn test_checkpoint_restore_discards_appends() {
        let mut ring = ByteRing::new(16);
        append(&mut ring, b"abc").unwrap();
        let checkpoint = ring.checkpoint();

        append(&mut ring, b"def").unwrap();
        ring.restore(checkpoint);
        assert_eq!(read_all(&ring), b"abc");
    }

    #[test]
    fn test_reader_bounds() {
        let mut ring = ByteRing::new(8);
        append(&mut ring, b"abc").unwrap();

        let mut reader = ring.reader();
        let mut buf = [0u8; 4];
        assert!(reader.read_exact(&mut buf).is_err());
        assert!(reader.skip(4).is_err());
        assert!(reader.peek_at(1, &mut buf).is_err());
    }
}
