//! # tierlog
//!
//! Fixed-memory, priority-tiered event-log storage engine.
//!
//! tierlog is a Rust library for bounded in-memory event retention,
//! designed to be embedded in constrained devices and other systems
//! software that must keep the most important recent events without ever
//! allocating past startup. Events land in a chain of circular byte
//! buffers ordered by importance; when space runs out, unimportant events
//! age out first while important ones are promoted deeper into the chain
//! and survive longer.
//!
//! **Status**: This crate is in early development. The API is not yet stable.
//!
//! ## Key Properties
//!
//! - Zero-allocation log path: payloads are serialized straight into the
//!   ring via a caller closure, no staging buffers
//! - Priority-banded retention — each importance level has its own
//!   sequence numbering, drop accounting, and effective lifetime
//! - Bounded, predictable memory — size is determined by configuration,
//!   not event volume
//! - Crash-safe ingestion: a failed log call never leaves a partial
//!   record or corrupts already-retained events
//! - Resumable fetches into fixed-size buffers, for paged delivery over
//!   constrained transports
//! - No background threads, no GC
//!
//! ## Quick Start
//!
//! ```rust
//! use tierlog::{
//!     ChainSpec, EventChain, EventSchema, Importance, LogOptions, TierSpec,
//! };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Two tiers: everything enters the first; critical events are
//! // promoted to the second instead of aging out.
//! let mut chain = EventChain::new(ChainSpec::new(
//!     vec![
//!         TierSpec { capacity: 4096, ceiling: Importance::Debug },
//!         TierSpec { capacity: 4096, ceiling: Importance::Critical },
//!     ],
//!     Importance::Debug,
//! )?)?;
//!
//! // Log an event (zero-allocation hot path).
//! let schema = EventSchema { source_id: 1, event_kind: 3, importance: Importance::Critical };
//! let seq = chain.log_event(
//!     &schema,
//!     |w| w.write_all(b"fan stalled"),
//!     &LogOptions::default(),
//! )?;
//!
//! // Fetch everything critical since the beginning.
//! let mut cursor = 0;
//! let mut out = Vec::new();
//! let n = chain.fetch_events_since(Importance::Critical, &mut cursor, &mut out)?;
//! assert_eq!(n, 1);
//! assert_eq!(cursor, seq + 1);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`EventChain`] — Top-level engine; owns the tiers, logs and fetches
//! - [`ChainSpec`] / [`TierSpec`] — Capacity and importance-ceiling
//!   configuration
//! - [`EventSchema`] — Per-event identity: source, kind, importance
//! - [`SliceSink`] / [`SliceReader`] — Flat-buffer adapters for paged
//!   fetch and external decoding
//! - [`CheckpointedCounter`] — Durable sequence numbering that stays
//!   monotonic across restarts
//!
//! ## Modules
//!
//! For lower-level access, the individual modules are also public:
//!
//! - [`chain`] — Chain lifecycle, log, eviction/promotion, fetch
//! - [`tier`] — Per-tier retention bookkeeping and record iteration
//! - [`ring`] — Fixed-capacity circular byte buffer
//! - [`record`] — Self-describing binary record codec
//! - [`schema`] — Importance levels and chain configuration
//! - [`counter`] — Monotonic sequence counters
//! - [`error`] — Error types

pub mod chain;
pub mod counter;
pub mod error;
pub mod record;
pub mod ring;
pub mod schema;
pub mod tier;

// Re-export primary API types at crate root for convenience.
pub use chain::{EventChain, LogOptions};
pub use counter::{CheckpointedCounter, CounterStore, EventCounter, VolatileCounter};
pub use error::{
    ChainError, ConfigError, CounterError, EventLogError, RecordError, Result,
};
pub use record::{
    copy_record, read_envelope, write_record, CopyContext, Envelope, PayloadWriter,
    RecordSink, RecordSource, SliceReader, SliceSink, MAX_RECORD_LEN,
};
pub use schema::{
    ChainSpec, EventSchema, Importance, TierSpec, MAX_TIERS, MIN_TIER_CAPACITY,
};
pub use tier::{RecordView, TierStats};
