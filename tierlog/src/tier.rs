//! One priority tier: a byte ring plus retention bookkeeping.
//!
//! A tier owns a single [`ByteRing`], an importance ceiling, and the
//! bookkeeping that makes implicit sequence numbering and delta timestamps
//! work: the absolute timestamps of its oldest and newest resident
//! records, the sequence number of the oldest live record it numbers, a
//! drop counter, and a corruption fault latch.
//!
//! Records inside the ring never store their sequence number; a tier's
//! counter numbers records in arrival order, so the oldest matching record
//! has sequence `first_sequence()` and the rest follow consecutively.

use std::cell::Cell;
use std::fmt;

use serde::Serialize;

use crate::counter::EventCounter;
use crate::error::{CounterError, RecordError};
use crate::record::{
    copy_record, read_envelope, write_record, CopyContext, Envelope, PayloadWriter, RecordSource,
    timestamp_field,
};
use crate::ring::{ByteRing, RingCheckpoint, RingReader};
use crate::schema::{EventSchema, Importance, TierSpec};

/// A single priority tier in the chain.
pub struct Tier {
    ring: ByteRing,
    ceiling: Importance,
    /// Ceiling of the next, more-important tier; `None` for the terminal
    /// tier.
    next_ceiling: Option<Importance>,
    counter: Box<dyn EventCounter>,
    /// Sequence number of the oldest live record this tier numbers.
    first_seq: u64,
    /// Absolute timestamp of the oldest record physically in the ring.
    first_ts: u64,
    /// Absolute timestamp of the newest record physically in the ring;
    /// the delta base for the next append.
    last_ts: u64,
    /// Records permanently evicted from this tier.
    dropped: u64,
    /// Latched when stored bytes fail to decode. In a `Cell` so the
    /// read-only fetch path can latch it too.
    faulted: Cell<bool>,
}

// Not derivable past the boxed counter.
impl fmt::Debug for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tier")
            .field("ceiling", &self.ceiling)
            .field("capacity", &self.ring.capacity())
            .field("used", &self.ring.used())
            .field("first_seq", &self.first_seq)
            .field("dropped", &self.dropped)
            .field("faulted", &self.faulted.get())
            .finish_non_exhaustive()
    }
}

/// Copyable snapshot of a tier's mutable bookkeeping, used to roll back
/// a failed append. The sequence counter is deliberately excluded:
/// assigned numbers are never reused, even by a rolled-back operation.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct TierCheckpoint {
    ring: RingCheckpoint,
    first_seq: u64,
    first_ts: u64,
    last_ts: u64,
    dropped: u64,
}

/// Point-in-time usage numbers for one tier.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct TierStats {
    /// The tier's importance ceiling.
    pub ceiling: Importance,
    /// Backing capacity in bytes.
    pub capacity: usize,
    /// Bytes currently used.
    pub used: usize,
    /// Sequence number of the oldest live record this tier numbers.
    pub first_sequence: u64,
    /// Highest sequence number this tier has assigned (0 if none).
    ///
    /// With a durable counter this can over-report by up to one
    /// persistence epoch right after a restart, since the counter resumes
    /// from its saved ceiling rather than the last number handed out.
    pub last_sequence: u64,
    /// Absolute timestamp of the oldest resident record (0 when empty).
    pub first_timestamp: u64,
    /// Absolute timestamp of the newest resident record (0 when empty).
    pub last_timestamp: u64,
    /// Records permanently evicted from this tier.
    pub dropped: u64,
    /// Whether the tier has latched a corruption fault.
    pub faulted: bool,
}

impl Tier {
    pub(crate) fn new(
        spec: &TierSpec,
        next_ceiling: Option<Importance>,
        counter: Box<dyn EventCounter>,
    ) -> Self {
        let first_seq = counter.peek();
        Self {
            ring: ByteRing::new(spec.capacity),
            ceiling: spec.ceiling,
            next_ceiling,
            counter,
            first_seq,
            first_ts: 0,
            last_ts: 0,
            dropped: 0,
            faulted: Cell::new(false),
        }
    }

    /// Whether this tier is where records of `importance` come to rest.
    ///
    /// True when there is no more-important neighbor, or when the neighbor
    /// accepts only records strictly more important than `importance`.
    pub fn is_final_destination(&self, importance: Importance) -> bool {
        match self.next_ceiling {
            None => true,
            Some(next) => next.outranks(importance),
        }
    }

    /// The tier's importance ceiling.
    pub fn ceiling(&self) -> Importance {
        self.ceiling
    }

    /// Backing capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    /// Bytes currently used.
    pub fn used(&self) -> usize {
        self.ring.used()
    }

    /// Bytes currently free.
    pub fn free(&self) -> usize {
        self.ring.free()
    }

    /// Whether no records are resident.
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Sequence number of the oldest live record this tier numbers.
    pub fn first_sequence(&self) -> u64 {
        self.first_seq
    }

    /// Highest sequence number assigned so far, or 0 if none.
    pub fn last_sequence(&self) -> u64 {
        self.counter.peek().saturating_sub(1)
    }

    /// Absolute timestamp of the oldest resident record.
    pub fn first_timestamp(&self) -> u64 {
        self.first_ts
    }

    /// Absolute timestamp of the newest resident record.
    pub fn last_timestamp(&self) -> u64 {
        self.last_ts
    }

    /// Records permanently evicted from this tier.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub(crate) fn is_faulted(&self) -> bool {
        self.faulted.get()
    }

    pub(crate) fn fault(&self) {
        if !self.faulted.replace(true) {
            tracing::error!(ceiling = %self.ceiling, "tier latched corruption fault");
        }
    }

    /// Current usage numbers.
    pub fn stats(&self) -> TierStats {
        TierStats {
            ceiling: self.ceiling,
            capacity: self.capacity(),
            used: self.used(),
            first_sequence: self.first_seq,
            last_sequence: self.last_sequence(),
            first_timestamp: self.first_ts,
            last_timestamp: self.last_ts,
            dropped: self.dropped,
            faulted: self.faulted.get(),
        }
    }

    pub(crate) fn checkpoint(&self) -> TierCheckpoint {
        TierCheckpoint {
            ring: self.ring.checkpoint(),
            first_seq: self.first_seq,
            first_ts: self.first_ts,
            last_ts: self.last_ts,
            dropped: self.dropped,
        }
    }

    pub(crate) fn restore(&mut self, checkpoint: TierCheckpoint) {
        self.ring.restore(checkpoint.ring);
        self.first_seq = checkpoint.first_seq;
        self.first_ts = checkpoint.first_ts;
        self.last_ts = checkpoint.last_ts;
        self.dropped = checkpoint.dropped;
    }

    /// Decodes the envelope of the oldest resident record.
    ///
    /// Latches the tier fault on decode failure.
    pub(crate) fn head_envelope(&self) -> Result<Envelope, RecordError> {
        debug_assert!(!self.ring.is_empty());
        let mut reader = self.ring.reader();
        match read_envelope(&mut reader) {
            Ok(envelope) => Ok(envelope),
            Err(e) => {
                self.fault();
                Err(e)
            }
        }
    }

    /// Removes the oldest record, keeping the first-timestamp bookkeeping
    /// accurate for the record that becomes oldest.
    pub(crate) fn evict_head(&mut self) -> Result<Envelope, RecordError> {
        let envelope = self.head_envelope()?;
        let old_first_ts = self.first_ts;
        self.ring.evict_oldest(envelope.total_len)?;
        if self.ring.is_empty() {
            self.first_ts = 0;
            self.last_ts = 0;
        } else {
            let next = self.head_envelope()?;
            self.first_ts = next.absolute_timestamp(old_first_ts);
        }
        Ok(envelope)
    }

    /// Accounts a permanent eviction: the oldest numbered record is gone,
    /// so its sequence number is retired.
    pub(crate) fn note_final_drop(&mut self) {
        self.first_seq += 1;
        self.dropped += 1;
    }

    /// Assigns the next sequence number from this tier's counter.
    pub(crate) fn next_sequence(&mut self) -> Result<u64, CounterError> {
        self.counter.advance()
    }

    /// Encodes a fresh record at the ring's write cursor.
    ///
    /// The first record in an empty ring is stamped with an absolute
    /// timestamp; later records carry deltas against the newest resident.
    pub(crate) fn append_record<F>(
        &mut self,
        schema: &EventSchema,
        timestamp: u64,
        write_payload: F,
    ) -> Result<usize, RecordError>
    where
        F: FnOnce(&mut PayloadWriter<'_>) -> Result<(), RecordError>,
    {
        let first = self.ring.is_empty();
        let (field, absolute) = timestamp_field(timestamp, self.last_ts, first);
        let mut writer = self.ring.writer();
        let written = write_record(&mut writer, schema, field, absolute, None, write_payload)?;
        if first {
            self.first_ts = timestamp;
        }
        self.last_ts = timestamp;
        Ok(written)
    }

    /// Appends a copy of a record promoted from a less-important tier,
    /// rewriting its timestamp for this ring's stream.
    pub(crate) fn push_copy(
        &mut self,
        src: &mut dyn RecordSource,
        timestamp: u64,
    ) -> Result<usize, RecordError> {
        let first = self.ring.is_empty();
        let ctx = CopyContext {
            first_in_sequence: first,
            sequence: None,
            absolute_timestamp: timestamp,
            previous_timestamp: self.last_ts,
        };
        let mut writer = self.ring.writer();
        let written = copy_record(src, &mut writer, &ctx)?;
        if first {
            self.first_ts = timestamp;
        }
        self.last_ts = timestamp;
        Ok(written)
    }

    /// A reader positioned at logical offset `at` in the ring.
    pub(crate) fn reader_at(&self, at: usize) -> RingReader<'_> {
        self.ring.reader_at(at)
    }

    /// Iterates resident records oldest to newest, reconstructing each
    /// record's absolute timestamp along the way.
    pub fn records(&self) -> TierRecords<'_> {
        TierRecords { tier: self, at: 0, prev_ts: None, failed: false }
    }

    #[cfg(test)]
    pub(crate) fn ring_mut(&mut self) -> &mut ByteRing {
        &mut self.ring
    }
}

/// One decoded record position yielded by [`Tier::records`].
#[derive(Debug, Clone, Copy)]
pub struct RecordView {
    /// Logical ring offset where the record begins.
    pub offset: usize,
    /// The decoded envelope.
    pub envelope: Envelope,
    /// The record's reconstructed absolute timestamp.
    pub timestamp: u64,
}

/// Iterator over a tier's resident records, oldest to newest.
///
/// Decode failures latch the tier fault, yield the error once, and end
/// the iteration.
pub struct TierRecords<'a> {
    tier: &'a Tier,
    at: usize,
    prev_ts: Option<u64>,
    failed: bool,
}

impl Iterator for TierRecords<'_> {
    type Item = Result<RecordView, RecordError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.at >= self.tier.ring.used() {
            return None;
        }
        let mut reader = self.tier.ring.reader_at(self.at);
        match read_envelope(&mut reader) {
            Err(e) => {
                self.failed = true;
                self.tier.fault();
                Some(Err(e))
            }
            Ok(envelope) => {
                let timestamp = match self.prev_ts {
                    // The oldest record's delta base was evicted long ago;
                    // the tier's first-timestamp bookkeeping carries it.
                    None if !envelope.is_absolute => self.tier.first_ts,
                    None => envelope.timestamp,
                    Some(prev) => envelope.absolute_timestamp(prev),
                };
                let view = RecordView { offset: self.at, envelope, timestamp };
                self.at += envelope.total_len;
                self.prev_ts = Some(timestamp);
                Some(Ok(view))
            }
        }
    }
}
