//! Monotonic sequence counters for event numbering.
//!
//! Each tier numbers the events it is the final destination for with its
//! own counter. Counters are strictly monotonic and never reuse a value,
//! even across restarts when backed by persistent storage: the
//! [`CheckpointedCounter`] persists an upper bound in epochs so a crash
//! can only skip numbers, never repeat them.

use crate::error::CounterError;

/// A per-tier, strictly monotonic sequence counter.
///
/// `advance` returns the assigned value; values returned by successive
/// calls strictly increase and are never handed out twice, including
/// across restarts for durable implementations.
pub trait EventCounter {
    /// Returns the next value that `advance` would assign.
    fn peek(&self) -> u64;

    /// Assigns and returns the next sequence number.
    ///
    /// # Errors
    ///
    /// Returns [`CounterError`] if a durable backend fails to persist the
    /// checkpoint required to keep the monotonicity guarantee.
    fn advance(&mut self) -> Result<u64, CounterError>;
}

/// An in-memory counter starting at 1.
///
/// Sequence 0 is reserved for "not logged" (events below the retention
/// threshold), so assigned numbers start at 1.
#[derive(Debug, Clone)]
pub struct VolatileCounter {
    next: u64,
}

impl VolatileCounter {
    /// Creates a counter whose first assigned value is 1.
    pub fn new() -> Self {
        Self { next: 1 }
    }

    /// Creates a counter whose first assigned value is `start`.
    pub fn with_start(start: u64) -> Self {
        Self { next: start }
    }
}

impl Default for VolatileCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl EventCounter for VolatileCounter {
    fn peek(&self) -> u64 {
        self.next
    }

    fn advance(&mut self) -> Result<u64, CounterError> {
        let value = self.next;
        self.next += 1;
        Ok(value)
    }
}

/// Persistence hook for [`CheckpointedCounter`].
///
/// `save` receives a ceiling: a value the counter promises not to assign
/// before persisting again. On restart the counter resumes *at* the last
/// saved ceiling, which may skip numbers but never repeats one.
pub trait CounterStore {
    /// Persists the counter ceiling.
    ///
    /// # Errors
    ///
    /// Returns [`CounterError`] if the backing store rejects the write.
    fn save(&mut self, ceiling: u64) -> Result<(), CounterError>;
}

impl<F> CounterStore for F
where
    F: FnMut(u64) -> Result<(), CounterError>,
{
    fn save(&mut self, ceiling: u64) -> Result<(), CounterError> {
        self(ceiling)
    }
}

/// A durable counter that persists in epochs.
///
/// Persisting on every `advance` would make logging as slow as the backing
/// store, so the counter persists `next + epoch` whenever `next` crosses
/// the previously saved ceiling. A restart constructed from the saved
/// ceiling resumes past every number that could have been assigned.
pub struct CheckpointedCounter<S: CounterStore> {
    next: u64,
    ceiling: u64,
    epoch: u64,
    store: S,
}

impl<S: CounterStore> CheckpointedCounter<S> {
    /// Creates a checkpointed counter.
    ///
    /// `restored` is the ceiling loaded from the backing store, or `None`
    /// for a brand-new counter (which starts at 1). The initial ceiling is
    /// persisted immediately so that a crash at any later point is covered.
    ///
    /// # Errors
    ///
    /// Returns [`CounterError`] if `epoch` is 0 or the initial checkpoint
    /// cannot be persisted.
    pub fn new(mut store: S, restored: Option<u64>, epoch: u64) -> Result<Self, CounterError> {
        if epoch == 0 {
            return Err(CounterError::InvalidEpoch { epoch });
        }
        let next = restored.unwrap_or(1);
        let ceiling = next + epoch;
        store.save(ceiling)?;
        Ok(Self { next, ceiling, epoch, store })
    }
}

impl<S: CounterStore> EventCounter for CheckpointedCounter<S> {
    fn peek(&self) -> u64 {
        self.next
    }

    fn advance(&mut self) -> Result<u64, CounterError> {
        if self.next >= self.ceiling {
            let ceiling = self.next + self.epoch;
            self.store.save(ceiling)?;
            self.ceiling = ceiling;
        }
        let value = self.next;
        self.next += 1;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    fn shared_store(cell: &Rc<Cell<Option<u64>>>) -> impl FnMut(u64) -> Result<(), CounterError> {
        let cell = Rc::clone(cell);
        move |ceiling| {
            cell.set(Some(ceiling));
            Ok(())
        }
    }

    #[test]
    fn test_volatile_counter_starts_at_one() {
        let mut counter = VolatileCounter::new();
        assert_eq!(counter.peek(), 1);
        assert_eq!(counter.advance().unwrap(), 1);
        assert_eq!(counter.advance().unwrap(), 2);
        assert_eq!(counter.peek(), 3);
    }

    #[test]
    fn test_checkpointed_counter_persists_in_epochs() {
        let saved = Rc::new(Cell::new(None));
        let mut counter = CheckpointedCounter::new(shared_store(&saved), None, 4).unwrap();
        assert_eq!(saved.get(), Some(5)); // initial ceiling 1 + 4

        for expected in 1..=4 {
            assert_eq!(counter.advance().unwrap(), expected);
        }
        assert_eq!(saved.get(), Some(5));

        // Crossing the ceiling persists the next epoch boundary.
        assert_eq!(counter.advance().unwrap(), 5);
        assert_eq!(saved.get(), Some(9));
    }

    #[test]
    fn test_checkpointed_counter_monotonic_across_restart() {
        let saved = Rc::new(Cell::new(None));
        let last_assigned;
        {
            let mut counter = CheckpointedCounter::new(shared_store(&saved), None, 8).unwrap();
            for _ in 0..3 {
                counter.advance().unwrap();
            }
            last_assigned = counter.advance().unwrap();
            // Counter dropped without any further persistence: a crash.
        }

        let mut reborn = CheckpointedCounter::new(shared_store(&saved), saved.get(), 8).unwrap();
        let first_after_restart = reborn.advance().unwrap();
        assert!(first_after_restart > last_assigned);
    }

    #[test]
    fn test_zero_epoch_rejected() {
        let result = CheckpointedCounter::new(|_| Ok(()), None, 0);
        assert!(matches!(result, Err(CounterError::InvalidEpoch { epoch: 0 })));
    }
}
