// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Application-wide start/stop synchronization.
//!
//! Three one-shot signals, each only ever going from unset to set:
//!
//! - **ready**: every plugin started; polling workers may begin iterating.
//! - **should stop**: shutdown requested; loops exit at their next turn.
//! - **shutdown complete**: every plugin stopped and every worker joined.
//!
//! The runtime registers its stoplight in the service registry so plugins
//! can observe (or request) shutdown.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

#[derive(Default)]
struct Signals {
    ready: bool,
    should_stop: bool,
    shutdown_complete: bool,
}

/// Start/stop signals shared by the runtime and its plugins.
#[derive(Default)]
pub struct Stoplight {
    signals: Mutex<Signals>,
    changed: Condvar,
    // Polled on every worker loop turn; kept outside the mutex.
    stop_flag: AtomicBool,
}

impl Stoplight {
    /// All signals unset.
    pub fn new() -> Self {
        Self::default()
    }

    fn update(&self, f: impl FnOnce(&mut Signals)) {
        let mut signals = self.signals.lock();
        f(&mut signals);
        self.changed.notify_all();
    }

    /// Wait until `done` holds or `deadline` passes. Returns the final `done`.
    fn wait_until(&self, deadline: Option<Instant>, done: impl Fn(&Signals) -> bool) -> bool {
        let mut signals = self.signals.lock();
        while !done(&signals) {
            match deadline {
                Some(deadline) => {
                    if self.changed.wait_until(&mut signals, deadline).timed_out() {
                        return done(&signals);
                    }
                }
                None => self.changed.wait(&mut signals),
            }
        }
        true
    }

    /// Mark every plugin as started.
    pub fn signal_ready(&self) {
        self.update(|s| s.ready = true);
    }

    /// True once [`signal_ready`](Self::signal_ready) was called.
    pub fn is_ready(&self) -> bool {
        self.signals.lock().ready
    }

    /// Block until ready or until shutdown was requested, whichever first.
    ///
    /// Returns true if ready was signaled.
    pub fn wait_for_ready(&self) -> bool {
        self.wait_until(None, |s| s.ready || s.should_stop);
        self.is_ready()
    }

    /// Request shutdown.
    pub fn signal_should_stop(&self) {
        self.stop_flag.store(true, Ordering::Release);
        self.update(|s| s.should_stop = true);
    }

    /// Non-blocking shutdown check, cheap enough for every loop turn.
    #[inline]
    pub fn check_should_stop(&self) -> bool {
        self.stop_flag.load(Ordering::Acquire)
    }

    /// Block until shutdown is requested or `timeout` elapses.
    ///
    /// Returns true if shutdown was requested.
    pub fn wait_for_should_stop(&self, timeout: Duration) -> bool {
        self.wait_until(Some(Instant::now() + timeout), |s| s.should_stop)
    }

    /// Mark shutdown as finished.
    pub fn signal_shutdown_complete(&self) {
        self.update(|s| s.shutdown_complete = true);
    }

    /// True once shutdown finished.
    pub fn is_shutdown_complete(&self) -> bool {
        self.signals.lock().shutdown_complete
    }

    /// Block until shutdown finished.
    pub fn wait_for_shutdown_complete(&self) {
        self.wait_until(None, |s| s.shutdown_complete);
    }
}

impl std::fmt::Debug for Stoplight {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let signals = self.signals.lock();
        f.debug_struct("Stoplight")
            .field("ready", &signals.ready)
            .field("should_stop", &signals.should_stop)
            .field("shutdown_complete", &signals.shutdown_complete)
            .finish()
    }
}
