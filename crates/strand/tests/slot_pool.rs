// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::uninlined_format_args)] // Test readability over pedantic

//! Slot pool integration tests
//!
//! Capacity, the producer/consumer handoff and a randomized operation
//! sequence checked against the pool invariants.

use std::sync::Arc;
use std::time::Duration;
use strand::{Error, SlotPool, SlotState};

#[test]
fn capacity_bounds_in_flight_slots() {
    for capacity in 1..=6 {
        let pool = SlotPool::<u32>::new(capacity);
        let acquired: Vec<usize> = (0..capacity)
            .map(|_| pool.src_acquire().expect("free slot"))
            .collect();
        assert_eq!(acquired, (0..capacity).collect::<Vec<_>>());
        assert!(matches!(
            pool.src_acquire(),
            Err(Error::PoolExhausted { capacity: c }) if c == capacity
        ));
        assert_eq!(pool.count(SlotState::SrcInFlight), capacity);
    }
}

#[test]
fn two_slot_pipeline_handoff() -> strand::Result<()> {
    let pool = SlotPool::<&str>::new(2);

    // Producer fills slot 0; consumer takes it.
    let a = pool.src_acquire()?;
    pool.src_release(a, "A")?;
    let (held, frame) = pool.consumer_acquire(None).expect("A");
    assert_eq!((held, *frame), (a, "A"));

    // Producer keeps going while the consumer is busy.
    let b = pool.src_acquire()?;
    assert_ne!(a, b);
    pool.src_release(b, "B")?;
    assert_eq!(
        pool.states(),
        vec![SlotState::PostProcessingInFlight, SlotState::Available]
    );

    // The pool is full until the consumer lets go of A.
    assert!(pool.src_acquire().is_err());
    pool.consumer_release(held)?;
    assert_eq!(pool.states(), vec![SlotState::Free, SlotState::Available]);

    // Consumer moves on to B; nothing newer afterwards.
    let (next, frame) = pool.consumer_acquire(Some(held)).expect("B");
    assert_eq!((next, *frame), (b, "B"));
    pool.consumer_release(next)?;
    assert!(pool.consumer_acquire(Some(next)).is_none());
    assert_eq!(pool.latest(), Some(b));
    Ok(())
}

#[test]
fn newest_generation_wins_over_unconsumed_ones() -> strand::Result<()> {
    let pool = SlotPool::<u64>::new(4);
    for generation in 1..=3_u64 {
        let slot = pool.src_acquire()?;
        pool.src_release(slot, generation)?;
        assert_eq!(pool.count(SlotState::Available), 1);
    }
    let (_, newest) = pool.consumer_acquire(None).expect("newest");
    assert_eq!(*newest, 3);
    assert_eq!(pool.count(SlotState::Free), 3);
    Ok(())
}

/// Invariants that hold between any two operations.
fn check_invariants(pool: &SlotPool<u64>, producer_held: &[usize], consumer_held: Option<usize>) {
    let states = pool.states();
    assert!(
        states.iter().filter(|s| **s == SlotState::Available).count() <= 1,
        "more than one AVAILABLE slot: {:?}",
        states
    );
    assert!(
        states
            .iter()
            .filter(|s| **s == SlotState::PostProcessingInFlight)
            .count()
            <= 1
    );
    for &slot in producer_held {
        assert_eq!(states[slot], SlotState::SrcInFlight);
    }
    if let Some(slot) = consumer_held {
        assert_eq!(states[slot], SlotState::PostProcessingInFlight);
    }
    if let Some(latest) = pool.latest() {
        assert!(matches!(
            states[latest],
            SlotState::Available | SlotState::PostProcessingInFlight
        ));
    }
}

#[test]
fn random_operation_sequence_keeps_invariants() {
    let mut rng = fastrand::Rng::with_seed(0x5eed_5107);
    let pool = SlotPool::<u64>::new(4);
    let mut producer_held: Vec<usize> = Vec::new();
    let mut consumer_held: Option<usize> = None;
    let mut last_seen: Option<usize> = None;
    let mut generation = 0_u64;
    let mut last_consumed = 0_u64;

    for _ in 0..5_000 {
        match rng.u8(0..4) {
            0 => match pool.src_acquire() {
                Ok(slot) => producer_held.push(slot),
                Err(Error::PoolExhausted { .. }) => {
                    assert_eq!(pool.count(SlotState::Free), 0);
                }
                Err(e) => panic!("unexpected error {}", e),
            },
            1 if !producer_held.is_empty() => {
                let slot = producer_held.swap_remove(rng.usize(..producer_held.len()));
                generation += 1;
                pool.src_release(slot, generation).expect("held by producer");
            }
            2 if consumer_held.is_none() => {
                if let Some((slot, value)) = pool.consumer_acquire(last_seen) {
                    assert!(*value > last_consumed, "stale generation handed out");
                    last_consumed = *value;
                    consumer_held = Some(slot);
                }
            }
            3 => {
                if let Some(slot) = consumer_held.take() {
                    pool.consumer_release(slot).expect("held by consumer");
                    last_seen = Some(slot);
                }
            }
            _ => {}
        }
        check_invariants(&pool, &producer_held, consumer_held);
    }
}

#[test]
fn producer_and_consumer_threads() -> strand::Result<()> {
    let pool = Arc::new(SlotPool::<u64>::new(3));
    let frames = 2_000_u64;

    let producer = {
        let pool = Arc::clone(&pool);
        std::thread::spawn(move || -> strand::Result<()> {
            let mut produced = 0;
            while produced < frames {
                match pool.src_acquire() {
                    Ok(slot) => {
                        produced += 1;
                        pool.src_release(slot, produced)?;
                    }
                    Err(Error::PoolExhausted { .. }) => std::thread::yield_now(),
                    Err(e) => return Err(e),
                }
            }
            Ok(())
        })
    };

    // Slot indices are reused, so progress is tracked by payload here.
    let mut last_value = 0;
    let deadline = std::time::Instant::now() + Duration::from_secs(10);
    while last_value < frames {
        assert!(std::time::Instant::now() < deadline, "consumer starved");
        if let Some((slot, value)) = pool.consumer_acquire(None) {
            assert!(*value >= last_value, "consumer went backwards");
            last_value = *value;
            pool.consumer_release(slot)?;
        } else {
            std::thread::yield_now();
        }
    }

    producer.join().expect("producer thread")?;
    Ok(())
}
