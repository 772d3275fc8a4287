//! Self-describing binary record codec.
//!
//! Every event is stored as one framed record. The frame is
//! self-describing: a marker byte, a flags byte, the importance, the total
//! length (patched in place once the payload closure has run), the source
//! fields, a timestamp that is either absolute or a delta against the
//! previous record in the same stream, an optional sequence number, the
//! opaque payload, and an end marker.
//!
//! # Record layout (little-endian)
//!
//! ```text
//! ┌────────┬───────┬────────────┬───────────┬───────────┬────────────┐
//! │ marker │ flags │ importance │ total_len │ source_id │ event_kind │
//! │ 1B     │ 1B    │ 1B         │ u16       │ u16       │ u16        │
//! ├────────┴───────┴────────────┴───────────┴───────────┴────────────┤
//! │ timestamp (u64 absolute ms, or u32 delta ms)                     │
//! │ [sequence u64, only when flagged]                                │
//! │ payload … │ end marker 1B                                        │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! First-in-sequence records carry an absolute timestamp; continuation
//! records carry a u32 delta against the previous record, falling back to
//! the absolute form when the delta is negative or does not fit. Sequence
//! numbers appear only on the first record of a fetched stream; records at
//! rest are numbered implicitly by per-tier bookkeeping.

use crate::error::RecordError;
use crate::schema::{EventSchema, Importance};

/// Marker byte opening every record.
const RECORD_MARK: u8 = 0xE5;

/// Marker byte closing every record.
const RECORD_END: u8 = 0x5E;

/// Flag: the record carries a u64 sequence number.
const FLAG_HAS_SEQ: u8 = 0b0000_0001;

/// Flag: the timestamp field is a u64 absolute value, not a u32 delta.
const FLAG_ABS_TS: u8 = 0b0000_0010;

/// All flag bits the current format defines.
const FLAG_MASK: u8 = FLAG_HAS_SEQ | FLAG_ABS_TS;

/// Bytes before the timestamp field: marker, flags, importance, total_len,
/// source_id, event_kind.
const FIXED_HEAD_LEN: usize = 9;

/// Maximum encodable record length (total_len is a u16).
pub const MAX_RECORD_LEN: usize = u16::MAX as usize;

/// Encoded size of a record after promotion into another tier.
///
/// Conservative: assumes the absolute timestamp form, which is what the
/// record takes when it lands first in an empty destination or when the
/// delta against the destination's newest record does not fit.
pub(crate) fn promoted_record_len(payload_len: usize) -> usize {
    FIXED_HEAD_LEN + 8 + payload_len + 1
}

/// A destination that records can be encoded into.
///
/// Implemented by the tier rings (via [`crate::ring::RingWriter`]) and by
/// flat buffers ([`SliceSink`], `Vec<u8>`) used as fetch destinations.
/// Offsets are stream positions: `pos` grows with `write_all`, `patch`
/// rewrites already-written bytes, and `truncate` rolls back an aborted
/// record. Implementations never partially apply a `write_all`.
pub trait RecordSink {
    /// Current stream position.
    fn pos(&self) -> usize;

    /// Appends `bytes` at the current position.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::NoSpace`] if the destination cannot hold all
    /// of `bytes`; nothing is written in that case.
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), RecordError>;

    /// Rewrites already-written bytes starting at stream position `at`.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::Malformed`] if the range is not entirely
    /// within the written region.
    fn patch(&mut self, at: usize, bytes: &[u8]) -> Result<(), RecordError>;

    /// Discards everything written at or after stream position `to`.
    fn truncate(&mut self, to: usize);
}

/// A source that records can be decoded from.
///
/// Implemented by the tier rings (via [`crate::ring::RingReader`]) and by
/// flat buffers ([`SliceReader`]) so external consumers can decode a
/// fetched batch.
pub trait RecordSource {
    /// Current stream position.
    fn offset(&self) -> usize;

    /// Bytes remaining after the current position.
    fn remaining(&self) -> usize;

    /// Reads exactly `buf.len()` bytes, advancing the position.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::Malformed`] if the source ends early.
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), RecordError>;

    /// Advances the position by `n` bytes without reading.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::Malformed`] if fewer than `n` bytes remain.
    fn skip(&mut self, n: usize) -> Result<(), RecordError>;

    /// Reads `buf.len()` bytes at absolute stream position `at` without
    /// moving the current position.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::Malformed`] if the range is out of bounds.
    fn peek_at(&self, at: usize, buf: &mut [u8]) -> Result<(), RecordError>;
}

/// Fixed-size integer reads over any [`RecordSource`].
macro_rules! read_le {
    ($src:expr, $ty:ty) => {{
        let mut buf = [0u8; std::mem::size_of::<$ty>()];
        $src.read_exact(&mut buf)?;
        <$ty>::from_le_bytes(buf)
    }};
}

/// The decoded header of one record, without its payload.
///
/// This is the partial decode used for eviction and iteration: everything
/// needed to route, size, and timestamp a record without materializing the
/// payload bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Envelope {
    /// Retention importance of the record.
    pub importance: Importance,
    /// Identifier of the emitting component.
    pub source_id: u16,
    /// Source-scoped event kind.
    pub event_kind: u16,
    /// Raw timestamp field: absolute ms when `is_absolute`, else a delta
    /// against the previous record in the stream.
    pub timestamp: u64,
    /// Whether `timestamp` is absolute.
    pub is_absolute: bool,
    /// Sequence number, present only on the first record of a fetched
    /// stream.
    pub sequence: Option<u64>,
    /// Total encoded length, header through end marker.
    pub total_len: usize,
    /// Length of the opaque payload.
    pub payload_len: usize,
}

impl Envelope {
    /// Reconstructs the absolute timestamp given the previous record's
    /// absolute timestamp.
    ///
    /// Uses wrapping arithmetic so a stream encoded from a clock that
    /// stepped backward still round-trips bit-for-bit.
    pub fn absolute_timestamp(&self, previous: u64) -> u64 {
        if self.is_absolute {
            self.timestamp
        } else {
            previous.wrapping_add(self.timestamp)
        }
    }
}

/// Picks the stored timestamp form for a record.
///
/// First-in-sequence records are always absolute. Continuations store a
/// u32 delta against `previous` when it is non-negative and fits, and fall
/// back to the absolute form otherwise.
pub(crate) fn timestamp_field(absolute: u64, previous: u64, first_in_sequence: bool) -> (u64, bool) {
    if first_in_sequence {
        return (absolute, true);
    }
    match absolute.checked_sub(previous) {
        Some(delta) if delta <= u64::from(u32::MAX) => (delta, false),
        _ => (absolute, true),
    }
}

/// Write access to the payload region of a record being encoded.
///
/// Handed to the caller's payload closure so the payload is serialized
/// directly into the destination buffer, with no staging copy. Only
/// appends are possible; the record header is out of reach.
pub struct PayloadWriter<'a> {
    sink: &'a mut dyn RecordSink,
    start: usize,
}

impl PayloadWriter<'_> {
    /// Appends payload bytes.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::NoSpace`] if the destination is full; the
    /// in-progress record is then rolled back by the codec.
    pub fn write_all(&mut self, bytes: &[u8]) -> Result<(), RecordError> {
        self.sink.write_all(bytes)
    }

    /// Payload bytes written so far.
    pub fn written(&self) -> usize {
        self.sink.pos() - self.start
    }
}

/// Encodes one record into `sink`, payload supplied by `write_payload`.
///
/// Writes the structural wrapper, invokes the closure to emit the payload
/// in place, then closes the structure by patching the total length.
/// Returns the total encoded length.
///
/// # Errors
///
/// Returns [`RecordError::NoSpace`] if the sink fills up mid-record,
/// [`RecordError::PayloadTooLarge`] if the record would exceed
/// [`MAX_RECORD_LEN`], or any error the payload closure reports. On every
/// error the sink is truncated back to where the record began — a failed
/// encode never leaves partial bytes behind.
pub fn write_record<F>(
    sink: &mut dyn RecordSink,
    schema: &EventSchema,
    timestamp: u64,
    absolute: bool,
    sequence: Option<u64>,
    write_payload: F,
) -> Result<usize, RecordError>
where
    F: FnOnce(&mut PayloadWriter<'_>) -> Result<(), RecordError>,
{
    let start = sink.pos();
    let result = write_record_inner(sink, schema, timestamp, absolute, sequence, write_payload, start);
    if result.is_err() {
        sink.truncate(start);
    }
    result
}

fn write_record_inner<F>(
    sink: &mut dyn RecordSink,
    schema: &EventSchema,
    timestamp: u64,
    absolute: bool,
    sequence: Option<u64>,
    write_payload: F,
    start: usize,
) -> Result<usize, RecordError>
where
    F: FnOnce(&mut PayloadWriter<'_>) -> Result<(), RecordError>,
{
    let mut flags = 0u8;
    if absolute {
        flags |= FLAG_ABS_TS;
    }
    if sequence.is_some() {
        flags |= FLAG_HAS_SEQ;
    }

    sink.write_all(&[RECORD_MARK, flags, schema.importance as u8])?;
    sink.write_all(&0u16.to_le_bytes())?; // total_len, patched below
    sink.write_all(&schema.source_id.to_le_bytes())?;
    sink.write_all(&schema.event_kind.to_le_bytes())?;
    if absolute {
        sink.write_all(&timestamp.to_le_bytes())?;
    } else {
        #[allow(clippy::cast_possible_truncation)] // delta form implies the value fits
        sink.write_all(&(timestamp as u32).to_le_bytes())?;
    }
    if let Some(seq) = sequence {
        sink.write_all(&seq.to_le_bytes())?;
    }

    let payload_start = sink.pos();
    let mut payload = PayloadWriter { sink, start: payload_start };
    write_payload(&mut payload)?;

    sink.write_all(&[RECORD_END])?;

    let total = sink.pos() - start;
    if total > MAX_RECORD_LEN {
        return Err(RecordError::PayloadTooLarge { len: total, max: MAX_RECORD_LEN });
    }
    #[allow(clippy::cast_possible_truncation)] // bounded by MAX_RECORD_LEN above
    sink.patch(start + 3, &(total as u16).to_le_bytes())?;
    Ok(total)
}

/// Decodes one record header from `src`.
///
/// On success the source is left positioned at the start of the payload;
/// callers iterate by skipping `payload_len + 1` further bytes. The end
/// marker is verified in place without consuming the payload.
///
/// # Errors
///
/// Returns [`RecordError::Malformed`] for a bad marker, unknown flags, an
/// invalid importance, an impossible length, or a missing end marker.
pub fn read_envelope(src: &mut dyn RecordSource) -> Result<Envelope, RecordError> {
    let start = src.offset();

    let marker = read_le!(src, u8);
    if marker != RECORD_MARK {
        return Err(RecordError::Malformed { reason: "bad record marker" });
    }
    let flags = read_le!(src, u8);
    if flags & !FLAG_MASK != 0 {
        return Err(RecordError::Malformed { reason: "unknown record flags" });
    }
    let importance = Importance::from_u8(read_le!(src, u8))
        .ok_or(RecordError::Malformed { reason: "invalid importance" })?;
    let total_len = usize::from(read_le!(src, u16));
    let source_id = read_le!(src, u16);
    let event_kind = read_le!(src, u16);

    let is_absolute = flags & FLAG_ABS_TS != 0;
    let timestamp = if is_absolute {
        read_le!(src, u64)
    } else {
        u64::from(read_le!(src, u32))
    };
    let sequence = if flags & FLAG_HAS_SEQ != 0 {
        Some(read_le!(src, u64))
    } else {
        None
    };

    let header_len = src.offset() - start;
    if total_len < header_len + 1 {
        return Err(RecordError::Malformed { reason: "record length shorter than header" });
    }
    let payload_len = total_len - header_len - 1;

    let mut end = [0u8; 1];
    src.peek_at(start + total_len - 1, &mut end)
        .map_err(|_| RecordError::Malformed { reason: "record truncated" })?;
    if end[0] != RECORD_END {
        return Err(RecordError::Malformed { reason: "missing record end marker" });
    }

    Ok(Envelope {
        importance,
        source_id,
        event_kind,
        timestamp,
        is_absolute,
        sequence,
        total_len,
        payload_len,
    })
}

/// Timestamp and sequence rewrite parameters for [`copy_record`].
#[derive(Debug, Clone, Copy)]
pub struct CopyContext {
    /// Whether this record starts a new sequence in the destination.
    pub first_in_sequence: bool,
    /// Sequence number to stamp, written only when `first_in_sequence`.
    pub sequence: Option<u64>,
    /// The source record's reconstructed absolute timestamp.
    pub absolute_timestamp: u64,
    /// Absolute timestamp of the record preceding this one in the
    /// destination stream; ignored when `first_in_sequence`.
    pub previous_timestamp: u64,
}

/// Copies one record from `src` into `dst`, rewriting the timestamp
/// between delta and absolute form per `ctx`.
///
/// The payload is streamed through a small stack chunk; the source record
/// is fully consumed. Returns the re-encoded length.
///
/// # Errors
///
/// Returns [`RecordError::Malformed`] if the source record does not
/// decode, or [`RecordError::NoSpace`] if the destination fills up — in
/// which case the destination is rolled back to where the copy began.
pub fn copy_record(
    src: &mut dyn RecordSource,
    dst: &mut dyn RecordSink,
    ctx: &CopyContext,
) -> Result<usize, RecordError> {
    let env = read_envelope(src)?;

    let (timestamp, absolute) = if ctx.first_in_sequence {
        (ctx.absolute_timestamp, true)
    } else {
        timestamp_field(ctx.absolute_timestamp, ctx.previous_timestamp, false)
    };
    let sequence = if ctx.first_in_sequence { ctx.sequence } else { None };

    let schema = EventSchema {
        source_id: env.source_id,
        event_kind: env.event_kind,
        importance: env.importance,
    };
    let total = write_record(dst, &schema, timestamp, absolute, sequence, |w| {
        let mut left = env.payload_len;
        let mut chunk = [0u8; 64];
        while left > 0 {
            let n = left.min(chunk.len());
            src.read_exact(&mut chunk[..n])?;
            w.write_all(&chunk[..n])?;
            left -= n;
        }
        Ok(())
    })?;
    src.skip(1)?; // end marker
    Ok(total)
}

/// A [`RecordSink`] over a caller-supplied byte slice.
///
/// Fills the slice front to back and reports [`RecordError::NoSpace`] once
/// full, which is what makes fetches naturally resumable.
#[derive(Debug)]
pub struct SliceSink<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> SliceSink<'a> {
    /// Wraps `buf` as an empty sink.
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes written so far.
    pub fn written(&self) -> usize {
        self.pos
    }

    /// The written prefix of the underlying slice.
    pub fn bytes(&self) -> &[u8] {
        &self.buf[..self.pos]
    }
}

impl RecordSink for SliceSink<'_> {
    fn pos(&self) -> usize {
        self.pos
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), RecordError> {
        let free = self.buf.len() - self.pos;
        if bytes.len() > free {
            return Err(RecordError::NoSpace { needed: bytes.len(), available: free });
        }
        self.buf[self.pos..self.pos + bytes.len()].copy_from_slice(bytes);
        self.pos += bytes.len();
        Ok(())
    }

    fn patch(&mut self, at: usize, bytes: &[u8]) -> Result<(), RecordError> {
        if at + bytes.len() > self.pos {
            return Err(RecordError::Malformed { reason: "patch outside written region" });
        }
        self.buf[at..at + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    fn truncate(&mut self, to: usize) {
        if to < self.pos {
            self.pos = to;
        }
    }
}

impl RecordSink for Vec<u8> {
    fn pos(&self) -> usize {
        self.len()
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), RecordError> {
        self.extend_from_slice(bytes);
        Ok(())
    }

    fn patch(&mut self, at: usize, bytes: &[u8]) -> Result<(), RecordError> {
        if at + bytes.len() > self.len() {
            return Err(RecordError::Malformed { reason: "patch outside written region" });
        }
        self[at..at + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    fn truncate(&mut self, to: usize) {
        Vec::truncate(self, to);
    }
}

/// A [`RecordSource`] over a flat byte slice.
///
/// This is how external consumers (the transport draining fetched batches)
/// decode records without access to the chain.
#[derive(Debug, Clone)]
pub struct SliceReader<'a> {
    buf: &'a [u8],
    at: usize,
}

impl<'a> SliceReader<'a> {
    /// Wraps `buf`, positioned at its start.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, at: 0 }
    }
}

impl RecordSource for SliceReader<'_> {
    fn offset(&self) -> usize {
        self.at
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.at
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), RecordError> {
        if buf.len() > self.remaining() {
            return Err(RecordError::Malformed { reason: "read past end of data" });
        }
        buf.copy_from_slice(&self.buf[self.at..self.at + buf.len()]);
        self.at += buf.len();
        Ok(())
    }

    fn skip(&mut self, n: usize) -> Result<(), RecordError> {
        if n > self.remaining() {
            return Err(RecordError::Malformed { reason: "skip past end of data" });
        }
        self.at += n;
        Ok(())
    }

    fn peek_at(&self, at: usize, buf: &mut [u8]) -> Result<(), RecordError> {
        if at + buf.len() > self.buf.len() {
            return Err(RecordError::Malformed { reason: "peek past end of data" });
        }
        buf.copy_from_slice(&self.buf[at..at + buf.len()]);
        Ok(())
    }
}
