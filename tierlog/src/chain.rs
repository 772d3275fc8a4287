//! The tier chain: the top-level event-log engine.
//!
//! An [`EventChain`] owns an ordered set of priority tiers, entry tier
//! first. Every event is encoded directly into the entry tier's ring;
//! when space runs out, the eviction algorithm walks the chain, evicting
//! end-of-life records and promoting records whose final destination lies
//! further along. Evictions and promotions commit as they happen (they
//! drop or move whole records per policy), while the in-progress record
//! itself is all-or-nothing: any mid-write failure truncates it away, so
//! a failed call can drop the new event but never corrupt retained ones.
//!
//! # Concurrency
//!
//! The chain is single-threaded and cooperative: no call blocks, no call
//! allocates, and one in-flight call owns the whole chain. The Busy state
//! is an advisory reentry guard — callers must not call back into the
//! chain from inside a payload-writing closure.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::counter::{EventCounter, VolatileCounter};
use crate::error::{ChainError, ConfigError, RecordError, Result};
use crate::record::{
    copy_record, promoted_record_len, CopyContext, PayloadWriter, RecordSink,
};
use crate::schema::{ChainSpec, EventSchema, Importance};
use crate::tier::{Tier, TierStats};

/// Starting byte reserve for a new record.
///
/// Grows by doubling whenever an attempt runs out of room, bounded by the
/// entry tier's capacity ([`crate::schema::MIN_TIER_CAPACITY`] guarantees
/// the initial value is always satisfiable).
const INITIAL_RESERVE: usize = 64;

/// Chain lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChainState {
    /// Ready for the next call.
    Idle,
    /// A call is in progress; reentrant calls fail fast.
    Busy,
    /// Terminal; every call fails with `NotReady`.
    ShutDown,
}

/// Per-call options for [`EventChain::log_event`].
#[derive(Debug, Clone, Copy, Default)]
pub struct LogOptions {
    /// Timestamp to stamp the event with, in caller-defined milliseconds.
    /// Defaults to wall-clock milliseconds since the Unix epoch.
    pub timestamp: Option<u64>,
}

/// Resets Busy back to Idle when a call unwinds.
///
/// Owns its handle to the state cell so holding the guard does not
/// freeze the rest of the chain.
struct CallGuard {
    state: Rc<Cell<ChainState>>,
}

impl Drop for CallGuard {
    fn drop(&mut self) {
        if self.state.get() == ChainState::Busy {
            self.state.set(ChainState::Idle);
        }
    }
}

/// A priority-ordered chain of circular event buffers.
///
/// # Example
///
/// ```rust
/// use tierlog::{ChainSpec, EventChain, EventSchema, Importance, LogOptions, TierSpec};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let mut chain = EventChain::new(ChainSpec::new(
///     vec![
///         TierSpec { capacity: 1024, ceiling: Importance::Debug },
///         TierSpec { capacity: 1024, ceiling: Importance::Critical },
///     ],
///     Importance::Debug,
/// )?)?;
///
/// let schema = EventSchema { source_id: 1, event_kind: 7, importance: Importance::Critical };
/// let seq = chain.log_event(
///     &schema,
///     |w| w.write_all(b"overheated"),
///     &LogOptions { timestamp: Some(1_700_000_000_000) },
/// )?;
/// assert_eq!(seq, 1);
/// # Ok(())
/// # }
/// ```
pub struct EventChain {
    /// Tiers ordered least- to most-important; index 0 is the entry tier.
    tiers: Vec<Tier>,
    retention: Importance,
    state: Rc<Cell<ChainState>>,
    bytes_written: u64,
    overflow_drops: u64,
}

// Not derivable past the boxed counters.
impl fmt::Debug for EventChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventChain")
            .field("tiers", &self.tiers)
            .field("retention", &self.retention)
            .field("state", &self.state.get())
            .field("bytes_written", &self.bytes_written)
            .field("overflow_drops", &self.overflow_drops)
            .finish()
    }
}

impl EventChain {
    /// Builds a chain with in-memory sequence counters.
    ///
    /// All backing memory is allocated here; the log and fetch paths are
    /// allocation-free afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `spec` fails validation.
    pub fn new(spec: ChainSpec) -> Result<Self> {
        let counters = spec
            .tiers
            .iter()
            .map(|_| Box::new(VolatileCounter::new()) as Box<dyn EventCounter>)
            .collect();
        Self::with_counters(spec, counters)
    }

    /// Builds a chain with caller-supplied sequence counters, one per
    /// tier, least-important tier first. This is how durable counters
    /// (e.g. [`crate::CheckpointedCounter`]) are injected.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `spec` fails validation or the counter
    /// count does not match the tier count.
    pub fn with_counters(spec: ChainSpec, counters: Vec<Box<dyn EventCounter>>) -> Result<Self> {
        spec.validate()?;
        if counters.len() != spec.tiers.len() {
            return Err(ConfigError::CounterCountMismatch {
                expected: spec.tiers.len(),
                actual: counters.len(),
            }
            .into());
        }

        let mut tiers = Vec::with_capacity(spec.tiers.len());
        for ((i, tier_spec), counter) in spec.tiers.iter().enumerate().zip(counters) {
            let next_ceiling = spec.tiers.get(i + 1).map(|t| t.ceiling);
            tiers.push(Tier::new(tier_spec, next_ceiling, counter));
        }

        Ok(Self {
            tiers,
            retention: spec.retention,
            state: Rc::new(Cell::new(ChainState::Idle)),
            bytes_written: 0,
            overflow_drops: 0,
        })
    }

    /// Number of tiers in the chain.
    pub fn tier_count(&self) -> usize {
        self.tiers.len()
    }

    /// Total bytes of record data ever encoded, monotonic.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Events dropped because they could never fit the entry tier.
    pub fn overflow_drops(&self) -> u64 {
        self.overflow_drops
    }

    /// Point-in-time usage numbers for every tier, entry tier first.
    pub fn stats(&self) -> Vec<TierStats> {
        self.tiers.iter().map(Tier::stats).collect()
    }

    /// Sequence number of the oldest retained event of `importance`'s
    /// band.
    pub fn first_sequence_number(&self, importance: Importance) -> u64 {
        self.tiers[self.destination_index(importance)].first_sequence()
    }

    /// Highest sequence number assigned for `importance`'s band, or 0.
    ///
    /// After a restart with durable counters this can run ahead of the
    /// last number actually handed out, by up to one persistence epoch
    /// (see [`crate::CheckpointedCounter`]).
    pub fn last_sequence_number(&self, importance: Importance) -> u64 {
        self.tiers[self.destination_index(importance)].last_sequence()
    }

    /// Events of `importance`'s band permanently evicted.
    pub fn dropped_events(&self, importance: Importance) -> u64 {
        self.tiers[self.destination_index(importance)].dropped()
    }

    /// Shuts the chain down. Terminal: every subsequent `log_event` or
    /// `fetch_events_since` fails with [`ChainError::NotReady`]. The
    /// accessors above keep reporting the final state.
    pub fn shutdown(&mut self) {
        self.state.set(ChainState::ShutDown);
    }

    /// Whether the chain has been shut down.
    pub fn is_shut_down(&self) -> bool {
        self.state.get() == ChainState::ShutDown
    }

    /// Logs one event, returning its sequence number.
    ///
    /// The payload closure writes directly into the entry tier's ring at
    /// the current write cursor — there is no staging buffer. Events less
    /// important than the retention threshold are silently discarded and
    /// return sequence 0. The sequence number comes from the event's
    /// final-destination tier, which also makes the event immediately
    /// visible to fetches of its band.
    ///
    /// # Errors
    ///
    /// - [`ChainError::NotReady`] / [`ChainError::Busy`] per the state
    ///   machine.
    /// - [`ChainError::Overflow`] if the record cannot fit the entry tier
    ///   even after evicting everything (the event is dropped and
    ///   counted).
    /// - [`ChainError::TierFaulted`] if a tier on the event's path has
    ///   latched a corruption fault.
    /// - [`RecordError`] / counter errors, after truncating the partial
    ///   record away.
    ///
    /// A failed call never leaves a partial record behind, but space it
    /// freed while making room stays freed: records evicted or promoted
    /// on the way to the failure are not resurrected, because their bytes
    /// may already have been overwritten by the attempt.
    pub fn log_event<F>(
        &mut self,
        schema: &EventSchema,
        mut write_payload: F,
        options: &LogOptions,
    ) -> Result<u64>
    where
        F: FnMut(&mut PayloadWriter<'_>) -> std::result::Result<(), RecordError>,
    {
        let _guard = self.begin_call()?;

        if !schema.importance.at_least(self.retention) {
            return Ok(0);
        }

        let dest = self.destination_index(schema.importance);
        if let Some(tier) = self.tiers[..=dest].iter().position(Tier::is_faulted) {
            return Err(ChainError::TierFaulted { tier }.into());
        }

        let timestamp = options.timestamp.unwrap_or_else(now_ms);
        let entry_capacity = self.tiers[0].capacity();
        let mut reserve = INITIAL_RESERVE;

        loop {
            match self.ensure_space(0, reserve) {
                Ok(()) => {
                    // The append only grows the ring, so rewinding this
                    // snapshot cannot resurrect overwritten bytes.
                    let before_append = self.tiers[0].checkpoint();
                    match self.tiers[0].append_record(schema, timestamp, |w| write_payload(w)) {
                        Ok(written) => match self.tiers[dest].next_sequence() {
                            Ok(sequence) => {
                                self.bytes_written += written as u64;
                                tracing::trace!(
                                    importance = %schema.importance,
                                    sequence,
                                    written,
                                    "logged event"
                                );
                                return Ok(sequence);
                            }
                            Err(e) => {
                                self.tiers[0].restore(before_append);
                                return Err(e.into());
                            }
                        },
                        Err(RecordError::NoSpace { .. }) => {
                            self.tiers[0].restore(before_append);
                        }
                        Err(e) => {
                            self.tiers[0].restore(before_append);
                            return Err(e.into());
                        }
                    }
                }
                Err(e) if e.is_no_space() => {}
                Err(e) => return Err(e),
            }

            if reserve >= entry_capacity {
                self.overflow_drops += 1;
                tracing::warn!(
                    importance = %schema.importance,
                    entry_capacity,
                    "event too large for entry tier, dropped"
                );
                return Err(ChainError::Overflow {
                    needed: reserve,
                    capacity: entry_capacity,
                }
                .into());
            }
            reserve = (reserve * 2).min(entry_capacity);
        }
    }

    /// Copies all events of `importance`'s band with sequence numbers at
    /// or after `*sequence` into `destination`, oldest first, and returns
    /// how many were copied.
    ///
    /// The first copied record carries an absolute timestamp and its
    /// sequence number; the rest are delta-stamped continuations, so the
    /// output stream is self-contained. The copy stops the moment the
    /// destination reports `NoSpace`, with `*sequence` advanced past the
    /// last record that fit — calling again with the same cursor resumes
    /// exactly where the previous call stopped. Never moves or rewrites
    /// stored records, though a decode failure latches that tier's fault.
    ///
    /// # Errors
    ///
    /// - [`ChainError::NotReady`] / [`ChainError::Busy`] per the state
    ///   machine.
    /// - [`ChainError::TierFaulted`] if a tier on the band's path has
    ///   latched a corruption fault.
    /// - [`RecordError::Malformed`] if a resident record fails to decode
    ///   (which latches that tier's fault).
    pub fn fetch_events_since(
        &self,
        importance: Importance,
        sequence: &mut u64,
        destination: &mut dyn RecordSink,
    ) -> Result<usize> {
        let _guard = self.begin_call()?;

        let dest = self.destination_index(importance);
        let mut next_seq = self.tiers[dest].first_sequence();
        let mut copied = 0usize;
        let mut prev_ts = 0u64;

        // Promotion is lazy, so band records may still sit anywhere from
        // the entry tier up to their destination. Walking destination
        // back to entry visits them oldest to newest.
        for idx in (0..=dest).rev() {
            if self.tiers[idx].is_faulted() {
                return Err(ChainError::TierFaulted { tier: idx }.into());
            }
            for item in self.tiers[idx].records() {
                let view = item?;
                if self.destination_index(view.envelope.importance) != dest {
                    continue;
                }
                let this_seq = next_seq;
                next_seq += 1;
                if this_seq < *sequence {
                    continue;
                }

                let mut src = self.tiers[idx].reader_at(view.offset);
                let ctx = CopyContext {
                    first_in_sequence: copied == 0,
                    sequence: (copied == 0).then_some(this_seq),
                    absolute_timestamp: view.timestamp,
                    previous_timestamp: prev_ts,
                };
                match copy_record(&mut src, destination, &ctx) {
                    Ok(_) => {
                        copied += 1;
                        prev_ts = view.timestamp;
                        *sequence = this_seq + 1;
                    }
                    Err(RecordError::NoSpace { .. }) => return Ok(copied),
                    Err(e) => {
                        self.tiers[idx].fault();
                        return Err(e.into());
                    }
                }
            }
        }

        Ok(copied)
    }

    /// Index of the tier where records of `importance` come to rest.
    fn destination_index(&self, importance: Importance) -> usize {
        let mut idx = 0;
        while !self.tiers[idx].is_final_destination(importance) {
            idx += 1;
        }
        idx
    }

    /// Frees at least `needed` bytes in tier `idx` by evicting end-of-life
    /// records and promoting the rest, cascading into more-important tiers
    /// as required.
    ///
    /// Evictions and promotions commit immediately. A head is only
    /// evicted after its promoted copy has landed, so a failure mid-walk
    /// never loses a record that was not already end-of-life.
    fn ensure_space(&mut self, idx: usize, needed: usize) -> Result<()> {
        if needed > self.tiers[idx].capacity() {
            return Err(RecordError::NoSpace {
                needed,
                available: self.tiers[idx].capacity(),
            }
            .into());
        }

        while self.tiers[idx].free() < needed {
            if self.tiers[idx].is_faulted() {
                return Err(ChainError::TierFaulted { tier: idx }.into());
            }

            let head = self.tiers[idx].head_envelope()?;
            if self.tiers[idx].is_final_destination(head.importance) {
                self.tiers[idx].evict_head()?;
                self.tiers[idx].note_final_drop();
                tracing::trace!(
                    tier = idx,
                    importance = %head.importance,
                    "evicted end-of-life record"
                );
            } else {
                let next = idx + 1;
                if self.tiers[next].is_faulted() {
                    return Err(ChainError::TierFaulted { tier: next }.into());
                }

                let promoted = promoted_record_len(head.payload_len);
                if self.tiers[next].free() < promoted {
                    self.ensure_space(next, promoted)?;
                }

                let head_ts = self.tiers[idx].first_timestamp();
                let (older, newer) = self.tiers.split_at_mut(next);
                let mut src = older[idx].reader_at(0);
                newer[0].push_copy(&mut src, head_ts)?;

                self.tiers[idx].evict_head()?;
                tracing::trace!(
                    from = idx,
                    to = next,
                    importance = %head.importance,
                    "promoted record"
                );
            }
        }

        Ok(())
    }

    /// Enters the Busy state, or fails fast.
    fn begin_call(&self) -> std::result::Result<CallGuard, ChainError> {
        match self.state.get() {
            ChainState::ShutDown => Err(ChainError::NotReady),
            ChainState::Busy => Err(ChainError::Busy),
            ChainState::Idle => {
                self.state.set(ChainState::Busy);
                Ok(CallGuard { state: Rc::clone(&self.state) })
            }
        }
    }
}

/// Wall-clock milliseconds since the Unix epoch.
fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
