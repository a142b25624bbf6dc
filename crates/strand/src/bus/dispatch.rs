// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Re-entrant publish guard.
//!
//! A subscriber callback may publish, including to the topic it listens on.
//! Each nested `put` on a thread bumps a thread-local depth counter; past
//! [`MAX_DISPATCH_DEPTH`] the publish is rejected before it touches the topic.

use crate::error::{Error, Result};
use std::cell::Cell;

/// Deepest chain of publishes nested inside subscriber callbacks.
pub const MAX_DISPATCH_DEPTH: usize = 16;

thread_local! {
    static DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Holds one level of dispatch depth; released on drop (including unwind).
pub(crate) struct DispatchGuard(());

impl DispatchGuard {
    pub(crate) fn enter(topic: &str) -> Result<Self> {
        DEPTH.with(|depth| {
            let current = depth.get();
            if current >= MAX_DISPATCH_DEPTH {
                log::warn!(
                    "[bus] Publish on '{}' rejected at dispatch depth {}",
                    topic,
                    current
                );
                return Err(Error::DispatchDepthExceeded(topic.to_string()));
            }
            depth.set(current + 1);
            Ok(DispatchGuard(()))
        })
    }

    #[cfg(test)]
    fn current() -> usize {
        DEPTH.with(Cell::get)
    }
}

impl Drop for DispatchGuard {
    fn drop(&mut self) {
        DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}
