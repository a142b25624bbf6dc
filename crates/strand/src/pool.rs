// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Fixed-capacity slot pool for producer/consumer resource handoff.
//!
//! One producer fills slots, one consumer post-processes the newest filled
//! slot. Only the newest unconsumed generation matters: publishing a new
//! slot reclaims every older one the consumer has not picked up.
//!
//! # Slot state machine
//!
//! ```text
//!            src_acquire                src_release
//!   FREE ---------------> SRC_IN_FLIGHT -----------> AVAILABLE
//!    ^                                                |   ^
//!    |  src_release (older AVAILABLE reclaimed)       |   |
//!    +------------------------------------------------+   |
//!    |                                                    |
//!    |   consumer_release         consumer_acquire        |
//!    |   (no longer latest)  +--------------------------+ |
//!    +-------------------- POST_PROCESSING_IN_FLIGHT <--+ |
//!                                     |                   |
//!                                     +-------------------+
//!                                      consumer_release (still latest)
//! ```
//!
//! State array and latest index sit under one `parking_lot::Mutex`: the
//! reclaim on release updates several slots and the latest index together.

use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::sync::Arc;

/// State of one pool slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotState {
    /// Unused; may be acquired by the producer.
    Free,
    /// Held by the producer.
    SrcInFlight,
    /// Filled and waiting for the consumer.
    Available,
    /// Held by the consumer.
    PostProcessingInFlight,
}

struct PoolState<T> {
    states: Vec<SlotState>,
    payloads: Vec<Option<Arc<T>>>,
    latest: Option<usize>,
}

impl<T> PoolState<T> {
    fn check(&self, index: usize, expected: SlotState) -> Result<()> {
        let actual = *self.states.get(index).ok_or(Error::InvalidSlot(index))?;
        if actual != expected {
            return Err(Error::InvalidSlotState {
                index,
                expected,
                actual,
            });
        }
        Ok(())
    }

    fn free(&mut self, index: usize) {
        self.states[index] = SlotState::Free;
        self.payloads[index] = None;
    }
}

/// Slot pool with `capacity` slots holding payloads of type `T`.
///
/// # Example
///
/// ```rust
/// use strand::{SlotPool, SlotState};
///
/// let pool = SlotPool::<&str>::new(2);
///
/// let slot = pool.src_acquire()?;
/// pool.src_release(slot, "frame-1")?;
///
/// let (index, frame) = pool.consumer_acquire(None).expect("fresh frame");
/// assert_eq!(*frame, "frame-1");
/// // Same generation is not handed out twice.
/// pool.consumer_release(index)?;
/// assert!(pool.consumer_acquire(Some(index)).is_none());
/// assert_eq!(pool.state(index), Some(SlotState::Available));
/// # Ok::<(), strand::Error>(())
/// ```
pub struct SlotPool<T> {
    inner: Mutex<PoolState<T>>,
    capacity: usize,
}

impl<T> SlotPool<T> {
    /// Create a pool with `capacity` FREE slots.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(PoolState {
                states: vec![SlotState::Free; capacity],
                payloads: (0..capacity).map(|_| None).collect(),
                latest: None,
            }),
            capacity,
        }
    }

    /// Number of slots.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Claim the lowest FREE slot for the producer.
    ///
    /// # Errors
    /// [`Error::PoolExhausted`] when no slot is FREE. The pool never grows;
    /// sizing it for the pipeline depth is the caller's job.
    pub fn src_acquire(&self) -> Result<usize> {
        let mut inner = self.inner.lock();
        let index = inner
            .states
            .iter()
            .position(|s| *s == SlotState::Free)
            .ok_or(Error::PoolExhausted {
                capacity: self.capacity,
            })?;
        inner.states[index] = SlotState::SrcInFlight;
        Ok(index)
    }

    /// Hand a filled slot to the consumer side.
    ///
    /// Every slot still AVAILABLE (an older, never consumed generation) is
    /// reclaimed first. `index` then becomes AVAILABLE and the latest.
    ///
    /// # Errors
    /// [`Error::InvalidSlot`] / [`Error::InvalidSlotState`] unless `index`
    /// is SRC_IN_FLIGHT; the pool is left untouched.
    pub fn src_release(&self, index: usize, payload: impl Into<Arc<T>>) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.check(index, SlotState::SrcInFlight)?;

        for i in 0..self.capacity {
            if inner.states[i] == SlotState::Available {
                inner.free(i);
            }
        }
        inner.states[index] = SlotState::Available;
        inner.payloads[index] = Some(payload.into());
        inner.latest = Some(index);
        Ok(())
    }

    /// Claim the latest AVAILABLE slot for the consumer.
    ///
    /// Returns `None` if nothing was released yet, if the latest slot is not
    /// AVAILABLE (already held by the consumer), or if it is `last_seen`.
    pub fn consumer_acquire(&self, last_seen: Option<usize>) -> Option<(usize, Arc<T>)> {
        let mut inner = self.inner.lock();
        let index = inner.latest?;
        if Some(index) == last_seen || inner.states[index] != SlotState::Available {
            return None;
        }
        let payload = inner.payloads[index].clone()?;
        inner.states[index] = SlotState::PostProcessingInFlight;
        Some((index, payload))
    }

    /// Return a slot the consumer is done with.
    ///
    /// The slot goes back to AVAILABLE if it is still the latest, FREE
    /// (payload dropped) otherwise.
    ///
    /// # Errors
    /// [`Error::InvalidSlot`] / [`Error::InvalidSlotState`] unless `index`
    /// is POST_PROCESSING_IN_FLIGHT.
    pub fn consumer_release(&self, index: usize) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.check(index, SlotState::PostProcessingInFlight)?;
        if inner.latest == Some(index) {
            inner.states[index] = SlotState::Available;
        } else {
            inner.free(index);
        }
        Ok(())
    }

    /// State of slot `index`, `None` if out of range.
    pub fn state(&self, index: usize) -> Option<SlotState> {
        self.inner.lock().states.get(index).copied()
    }

    /// Index of the most recently released slot.
    pub fn latest(&self) -> Option<usize> {
        self.inner.lock().latest
    }

    /// Number of slots currently in `state`.
    pub fn count(&self, state: SlotState) -> usize {
        self.inner.lock().states.iter().filter(|s| **s == state).count()
    }

    /// Snapshot of every slot state.
    pub fn states(&self) -> Vec<SlotState> {
        self.inner.lock().states.clone()
    }
}

impl<T> std::fmt::Debug for SlotPool<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("SlotPool")
            .field("states", &inner.states)
            .field("latest", &inner.latest)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_then_exhausted() {
        let pool = SlotPool::<u8>::new(3);
        for expected in 0..3 {
            assert_eq!(pool.src_acquire().ok(), Some(expected));
        }
        assert!(matches!(
            pool.src_acquire(),
            Err(Error::PoolExhausted { capacity: 3 })
        ));
    }

    #[test]
    fn test_release_requires_src_in_flight() {
        let pool = SlotPool::<u8>::new(2);
        assert!(matches!(
            pool.src_release(0, 1_u8),
            Err(Error::InvalidSlotState {
                index: 0,
                expected: SlotState::SrcInFlight,
                actual: SlotState::Free,
            })
        ));
        assert!(matches!(pool.src_release(9, 1_u8), Err(Error::InvalidSlot(9))));
        assert!(matches!(pool.consumer_release(0), Err(Error::InvalidSlotState { .. })));
        assert_eq!(pool.count(SlotState::Free), 2);
        assert_eq!(pool.latest(), None);
    }

    #[test]
    fn test_consumer_acquire_skips_last_seen() -> Result<()> {
        let pool = SlotPool::<char>::new(2);
        assert!(pool.consumer_acquire(None).is_none());

        let idx = pool.src_acquire()?;
        pool.src_release(idx, 'A')?;
        assert_eq!(pool.count(SlotState::Available), 1);
        assert!(pool.consumer_acquire(Some(idx)).is_none());

        let (got, payload) = pool.consumer_acquire(None).expect("available slot");
        assert_eq!((got, *payload), (idx, 'A'));
        // Already held by the consumer.
        assert!(pool.consumer_acquire(None).is_none());
        Ok(())
    }

    #[test]
    fn test_in_flight_consumer_slot_not_reclaimed() -> Result<()> {
        let pool = SlotPool::<&str>::new(3);
        let a = pool.src_acquire()?;
        pool.src_release(a, "A")?;
        let (held, _) = pool.consumer_acquire(None).expect("A available");

        let b = pool.src_acquire()?;
        pool.src_release(b, "B")?;
        assert_eq!(pool.state(held), Some(SlotState::PostProcessingInFlight));

        // No longer latest: goes back to FREE.
        pool.consumer_release(held)?;
        assert_eq!(pool.state(held), Some(SlotState::Free));
        assert_eq!(pool.state(b), Some(SlotState::Available));
        Ok(())
    }

    #[test]
    fn test_freed_payload_is_dropped() -> Result<()> {
        let pool = SlotPool::<Vec<u8>>::new(2);
        let payload = Arc::new(vec![0_u8; 16]);

        let a = pool.src_acquire()?;
        pool.src_release(a, Arc::clone(&payload))?;
        assert_eq!(Arc::strong_count(&payload), 2);

        let b = pool.src_acquire()?;
        pool.src_release(b, vec![1_u8])?;
        assert_eq!(pool.state(a), Some(SlotState::Free));
        assert_eq!(Arc::strong_count(&payload), 1);
        Ok(())
    }
}
