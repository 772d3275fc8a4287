//! Error types for the tierlog event-log storage engine.

use thiserror::Error;

/// The main error type for all tierlog operations.
///
/// This enum covers all error conditions that can occur from chain
/// construction through logging, eviction, and fetching.
#[derive(Error, Debug)]
pub enum EventLogError {
    /// Error validating a chain or tier configuration.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Error encoding, decoding, or copying an event record.
    #[error("record error: {0}")]
    Record(#[from] RecordError),

    /// Error in the tier chain state machine or eviction algorithm.
    #[error("chain error: {0}")]
    Chain(#[from] ChainError),

    /// Error advancing or persisting a sequence counter.
    #[error("counter error: {0}")]
    Counter(#[from] CounterError),
}

impl EventLogError {
    /// Returns `true` if this error is a recoverable out-of-space signal.
    ///
    /// Out-of-space is the only retryable failure: callers may free space
    /// or retry with a larger reserve. Every other variant is permanent for
    /// the operation that produced it.
    pub fn is_no_space(&self) -> bool {
        matches!(self, Self::Record(RecordError::NoSpace { .. }))
    }
}

/// Errors that can occur when validating a [`crate::ChainSpec`].
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The chain has no tiers.
    #[error("at least one tier must be configured")]
    NoTiers,

    /// The chain has more tiers than the engine supports.
    #[error("too many tiers: {count} (max {max})")]
    TooManyTiers {
        /// The configured tier count.
        count: usize,
        /// The maximum supported tier count.
        max: usize,
    },

    /// Tier ceilings do not strictly increase in importance from the entry
    /// tier to the terminal tier.
    #[error("tier {tier} ceiling does not outrank its less-important neighbor")]
    CeilingsNotAscending {
        /// The offending tier index.
        tier: usize,
    },

    /// A tier's backing buffer is too small to hold even one record.
    #[error("tier {tier} capacity {capacity} is below the minimum of {min} bytes")]
    CapacityTooSmall {
        /// The offending tier index.
        tier: usize,
        /// The configured capacity.
        capacity: usize,
        /// The minimum accepted capacity.
        min: usize,
    },

    /// The number of injected counters does not match the number of tiers.
    #[error("expected {expected} sequence counters, got {actual}")]
    CounterCountMismatch {
        /// The number of configured tiers.
        expected: usize,
        /// The number of counters supplied.
        actual: usize,
    },
}

/// Errors produced by the record codec and the byte rings underneath it.
#[derive(Error, Debug)]
pub enum RecordError {
    /// The destination cannot hold the bytes being written.
    ///
    /// Always recoverable: the caller may evict, enlarge its reserve, or
    /// resume into a fresh destination.
    #[error("no space: {needed} bytes needed, {available} available")]
    NoSpace {
        /// Bytes the write required.
        needed: usize,
        /// Bytes the destination had free.
        available: usize,
    },

    /// Stored bytes do not form a valid record.
    ///
    /// Fatal for the tier that produced it: record boundaries can no
    /// longer be trusted, so the tier is taken out of service.
    #[error("malformed record: {reason}")]
    Malformed {
        /// What was wrong with the bytes.
        reason: &'static str,
    },

    /// The encoded record would exceed the maximum record length.
    #[error("record of {len} bytes exceeds the maximum of {max}")]
    PayloadTooLarge {
        /// The encoded record length.
        len: usize,
        /// The maximum encodable record length.
        max: usize,
    },
}

/// Errors in the tier-chain state machine and eviction algorithm.
#[derive(Error, Debug)]
pub enum ChainError {
    /// The chain has been shut down; no further calls are accepted.
    #[error("chain is shut down")]
    NotReady,

    /// A call arrived while another call was in progress.
    ///
    /// The chain is single-threaded and non-reentrant; this guards against
    /// reentry from inside a payload-writing callback.
    #[error("chain is busy with another call")]
    Busy,

    /// The record can never fit, even after evicting everything reachable.
    #[error("record needs {needed} bytes but the entry tier holds only {capacity}")]
    Overflow {
        /// The reserve that could not be satisfied.
        needed: usize,
        /// The entry tier's total capacity.
        capacity: usize,
    },

    /// The operation would touch a tier that has latched a corruption fault.
    #[error("tier {tier} is faulted and out of service")]
    TierFaulted {
        /// The faulted tier index.
        tier: usize,
    },
}

/// Errors advancing or persisting sequence counters.
#[derive(Error, Debug)]
pub enum CounterError {
    /// The persistence epoch must be at least 1.
    #[error("invalid counter epoch: {epoch}")]
    InvalidEpoch {
        /// The configured epoch.
        epoch: u64,
    },

    /// The backing store failed to persist a counter checkpoint.
    #[error("failed to persist counter checkpoint: {source}")]
    Persist {
        /// The underlying store error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Type alias for `Result<T, EventLogError>`.
pub type Result<T> = std::result::Result<T, EventLogError>;
