// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Polling plugin worker thread.
//!
//! One thread per polling plugin. The thread parks until the runtime signals
//! ready, applies the scheduling policy, runs `thread_setup`, then loops on
//! `should_skip` until the plugin says stop, the runtime asks this plugin to
//! stop, or the whole application is stopping. On every exit path the thread
//! returns the plugin through its `JoinHandle` for the runtime's `stop()`.

use crate::config::FailurePolicy;
use crate::error::{Error, Result};
use crate::plugin::{PluginId, PluginState, PollingPlugin, SkipOption};
use crate::sched::{self, SchedulingPolicy};
use crate::stoplight::Stoplight;
use crossbeam::channel;
use parking_lot::Mutex;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Loop counters of one polling plugin.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    /// Completed `one_iteration` calls.
    pub iterations: u64,
    /// Loop turns skipped (yield or spin) since the start.
    pub skips: u64,
    /// Skips since the last completed iteration.
    pub consecutive_skips: u64,
}

/// Per-plugin bookkeeping shared by the runtime and the plugin's worker.
pub(crate) struct PluginRecord {
    pub(crate) id: PluginId,
    pub(crate) kind: &'static str,
    state: Mutex<PluginState>,
    iterations: AtomicU64,
    skips: AtomicU64,
    consecutive_skips: AtomicU64,
    /// Kernel thread id of the worker, 0 until it runs.
    tid: AtomicI32,
}

impl PluginRecord {
    pub(crate) fn new(id: PluginId, kind: &'static str) -> Self {
        Self {
            id,
            kind,
            state: Mutex::new(PluginState::Constructed),
            iterations: AtomicU64::new(0),
            skips: AtomicU64::new(0),
            consecutive_skips: AtomicU64::new(0),
            tid: AtomicI32::new(0),
        }
    }

    pub(crate) fn state(&self) -> PluginState {
        *self.state.lock()
    }

    pub(crate) fn set_state(&self, state: PluginState) {
        *self.state.lock() = state;
    }

    /// Move to `to` only from `from`. Returns whether it moved.
    pub(crate) fn transition(&self, from: PluginState, to: PluginState) -> bool {
        let mut state = self.state.lock();
        if *state == from {
            *state = to;
            true
        } else {
            false
        }
    }

    /// Move to `to` unless the plugin already failed.
    pub(crate) fn transition_unless_failed(&self, to: PluginState) {
        let mut state = self.state.lock();
        if *state != PluginState::Failed {
            *state = to;
        }
    }

    pub(crate) fn stats(&self) -> WorkerStats {
        WorkerStats {
            iterations: self.iterations.load(Ordering::Relaxed),
            skips: self.skips.load(Ordering::Relaxed),
            consecutive_skips: self.consecutive_skips.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn tid(&self) -> Option<i32> {
        match self.tid.load(Ordering::Acquire) {
            0 => None,
            tid => Some(tid),
        }
    }

    fn skipped(&self) {
        self.skips.fetch_add(1, Ordering::Relaxed);
        self.consecutive_skips.fetch_add(1, Ordering::Relaxed);
    }

    fn iterated(&self) {
        self.iterations.fetch_add(1, Ordering::Relaxed);
        self.consecutive_skips.store(0, Ordering::Relaxed);
    }
}

/// How a worker applies scheduling and handles failures.
#[derive(Debug, Clone, Copy)]
pub(crate) struct WorkerSettings {
    pub(crate) policy: SchedulingPolicy,
    pub(crate) priority: i32,
    pub(crate) load_index: usize,
    pub(crate) strict_sched: bool,
    pub(crate) failure_policy: FailurePolicy,
}

/// Handle to a running worker thread.
///
/// The thread hands the plugin back when it exits, so the runtime can call
/// `stop()` on it. When dropped, signals the thread to stop and joins it;
/// the plugin is then dropped without `stop()`.
pub(crate) struct Worker {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<Option<Box<dyn PollingPlugin>>>>,
}

/// Thread creation failed; the plugin is returned unstarted on the worker side.
pub(crate) struct SpawnFailure {
    pub(crate) error: Error,
    pub(crate) plugin: Box<dyn PollingPlugin>,
}

impl Worker {
    /// Spawn the worker thread of `plugin`.
    pub(crate) fn spawn(
        name: &str,
        plugin: Box<dyn PollingPlugin>,
        record: Arc<PluginRecord>,
        stoplight: Arc<Stoplight>,
        settings: WorkerSettings,
    ) -> std::result::Result<Self, SpawnFailure> {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_clone = Arc::clone(&stop);
        let name_owned = name.to_string();
        // The plugin moves in only once the thread exists, so a failed spawn
        // can return it.
        let (handoff, inbox) = channel::bounded::<Box<dyn PollingPlugin>>(1);

        let spawned = std::thread::Builder::new()
            .name(format!("strand-{}", name))
            .spawn(move || -> Option<Box<dyn PollingPlugin>> {
                let mut plugin = inbox.recv().ok()?;
                worker_main(&name_owned, plugin.as_mut(), &record, &stoplight, &stop_clone, settings);
                Some(plugin)
            });

        let thread = match spawned {
            Ok(thread) => thread,
            Err(e) => {
                return Err(SpawnFailure {
                    error: e.into(),
                    plugin,
                })
            }
        };
        if let Err(channel::SendError(plugin)) = handoff.send(plugin) {
            // Unreachable while the thread blocks in recv.
            let _ = thread.join();
            return Err(SpawnFailure {
                error: Error::InvalidState(format!("worker '{}' exited before start", name)),
                plugin,
            });
        }

        Ok(Self {
            stop,
            thread: Some(thread),
        })
    }

    /// Ask this worker alone to leave its loop at the next turn.
    pub(crate) fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// Request stop, wait for the thread to exit and take the plugin back.
    ///
    /// `None` after a previous join, or if the thread panicked outside the
    /// loop (in `on_stop`).
    pub(crate) fn join(&mut self) -> Option<Box<dyn PollingPlugin>> {
        self.request_stop();
        let handle = self.thread.take()?;
        match handle.join() {
            Ok(plugin) => plugin,
            Err(_) => {
                log::error!("[worker] Worker thread panicked while exiting");
                None
            }
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        let _ = self.join();
    }
}

/// Body of the worker thread, between spawn and hand-back.
fn worker_main(
    name: &str,
    plugin: &mut dyn PollingPlugin,
    record: &PluginRecord,
    stoplight: &Stoplight,
    stop: &AtomicBool,
    settings: WorkerSettings,
) {
    if !stoplight.wait_for_ready() {
        log::debug!("[worker] '{}' stopped before ready", name);
        record.transition_unless_failed(PluginState::Stopped);
        return;
    }
    if let Ok(tid) = sched::current_tid() {
        record.tid.store(tid, Ordering::Release);
    }

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        run_loop(name, &mut *plugin, record, stoplight, stop, settings)
    }));

    match outcome {
        Ok(Ok(())) => {
            plugin.on_stop();
            record.transition_unless_failed(PluginState::Stopped);
            log::debug!(
                "[worker] '{}' exited after {} iterations",
                name,
                record.stats().iterations
            );
        }
        Ok(Err(e)) => fail(name, record, settings.failure_policy, &e.to_string()),
        Err(payload) => fail(
            name,
            record,
            settings.failure_policy,
            &panic_message(payload.as_ref()),
        ),
    }
}

fn run_loop(
    name: &str,
    plugin: &mut dyn PollingPlugin,
    record: &PluginRecord,
    stoplight: &Stoplight,
    stop: &AtomicBool,
    settings: WorkerSettings,
) -> Result<()> {
    if let Err(e) = sched::apply(settings.policy, settings.priority, settings.load_index) {
        if settings.strict_sched {
            return Err(e);
        }
        log::warn!(
            "[sched] Could not apply {} policy to '{}': {} (continuing)",
            settings.policy,
            name,
            e
        );
    }

    plugin.thread_setup()?;
    log::debug!("[worker] '{}' running", name);

    while !stop.load(Ordering::Acquire) && !stoplight.check_should_stop() {
        match plugin.should_skip() {
            SkipOption::Run => {
                plugin.one_iteration()?;
                record.iterated();
            }
            SkipOption::SkipAndYield => {
                record.skipped();
                std::thread::yield_now();
            }
            SkipOption::SkipAndSpin => {
                record.skipped();
                std::hint::spin_loop();
            }
            SkipOption::Stop => break,
        }
    }
    Ok(())
}

fn fail(name: &str, record: &PluginRecord, policy: FailurePolicy, reason: &str) {
    record.set_state(PluginState::Failed);
    match policy {
        FailurePolicy::Isolate => {
            log::error!("[worker] Plugin '{}' failed: {}", name, reason);
        }
        FailurePolicy::Abort => {
            log::error!("[worker] Plugin '{}' failed: {}; aborting", name, reason);
            log::logger().flush();
            std::process::abort();
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panic: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panic: {}", s)
    } else {
        "panic with non-string payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn settings() -> WorkerSettings {
        WorkerSettings {
            policy: SchedulingPolicy::Default,
            priority: 10,
            load_index: 0,
            strict_sched: false,
            failure_policy: FailurePolicy::Isolate,
        }
    }

    fn launch(
        name: &str,
        plugin: Box<dyn PollingPlugin>,
        record: &Arc<PluginRecord>,
        stoplight: &Arc<Stoplight>,
    ) -> Result<Worker> {
        Worker::spawn(name, plugin, Arc::clone(record), Arc::clone(stoplight), settings())
            .map_err(|failure| failure.error)
    }

    fn wait_for(record: &PluginRecord, state: PluginState) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while record.state() != state {
            assert!(Instant::now() < deadline, "state stuck at {:?}", record.state());
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    struct Script {
        script: Vec<SkipOption>,
        ran: Arc<AtomicU64>,
        stopped: Arc<AtomicBool>,
    }

    impl PollingPlugin for Script {
        fn should_skip(&mut self) -> SkipOption {
            if self.script.is_empty() {
                SkipOption::Stop
            } else {
                self.script.remove(0)
            }
        }
        fn one_iteration(&mut self) -> Result<()> {
            self.ran.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn on_stop(&mut self) {
            self.stopped.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_waits_for_ready_then_follows_script() -> Result<()> {
        let ran = Arc::new(AtomicU64::new(0));
        let stopped = Arc::new(AtomicBool::new(false));
        let plugin = Script {
            script: vec![
                SkipOption::Run,
                SkipOption::SkipAndYield,
                SkipOption::SkipAndSpin,
                SkipOption::Run,
            ],
            ran: Arc::clone(&ran),
            stopped: Arc::clone(&stopped),
        };
        let record = Arc::new(PluginRecord::new(PluginId(1), "polling"));
        let stoplight = Arc::new(Stoplight::new());
        let mut worker = launch("script", Box::new(plugin), &record, &stoplight)?;

        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(ran.load(Ordering::SeqCst), 0);

        stoplight.signal_ready();
        wait_for(&record, PluginState::Stopped);
        assert!(worker.join().is_some());
        assert!(worker.join().is_none());

        assert_eq!(ran.load(Ordering::SeqCst), 2);
        assert!(stopped.load(Ordering::SeqCst));
        assert_eq!(
            record.stats(),
            WorkerStats {
                iterations: 2,
                skips: 2,
                consecutive_skips: 0,
            }
        );
        Ok(())
    }

    #[test]
    fn test_stop_before_ready_skips_loop() -> Result<()> {
        let ran = Arc::new(AtomicU64::new(0));
        let stopped = Arc::new(AtomicBool::new(false));
        let record = Arc::new(PluginRecord::new(PluginId(1), "polling"));
        let stoplight = Arc::new(Stoplight::new());
        let plugin = Script {
            script: vec![SkipOption::Run],
            ran: Arc::clone(&ran),
            stopped: Arc::clone(&stopped),
        };
        let mut worker = launch("never", Box::new(plugin), &record, &stoplight)?;

        stoplight.signal_should_stop();
        // Handed back for the runtime's stop() even though it never ran.
        assert!(worker.join().is_some());
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert!(!stopped.load(Ordering::SeqCst));
        assert_eq!(record.state(), PluginState::Stopped);
        Ok(())
    }

    struct Faulty {
        panic: bool,
    }

    impl PollingPlugin for Faulty {
        fn one_iteration(&mut self) -> Result<()> {
            if self.panic {
                panic!("sensor unplugged");
            }
            Err(Error::Plugin("calibration lost".to_string()))
        }
    }

    #[test]
    fn test_iteration_error_and_panic_isolated() -> Result<()> {
        for panic in [false, true] {
            let record = Arc::new(PluginRecord::new(PluginId(1), "polling"));
            let stoplight = Arc::new(Stoplight::new());
            let mut worker = launch("faulty", Box::new(Faulty { panic }), &record, &stoplight)?;
            stoplight.signal_ready();
            wait_for(&record, PluginState::Failed);
            assert!(worker.join().is_some(), "plugin lost after panic={}", panic);
            assert_eq!(record.state(), PluginState::Failed);
            assert_eq!(record.stats().iterations, 0);
        }
        Ok(())
    }

    #[test]
    fn test_panic_message_forms() {
        assert_eq!(panic_message(&"boom"), "panic: boom");
        assert_eq!(panic_message(&"boom".to_string()), "panic: boom");
        assert_eq!(panic_message(&42_u8), "panic with non-string payload");
    }

    #[test]
    fn test_transition_guards() {
        let record = PluginRecord::new(PluginId(1), "reactive");
        assert!(record.transition(PluginState::Constructed, PluginState::Started));
        assert!(!record.transition(PluginState::Constructed, PluginState::Running));
        record.set_state(PluginState::Failed);
        record.transition_unless_failed(PluginState::Stopped);
        assert_eq!(record.state(), PluginState::Failed);
        assert!(record.tid().is_none());
    }
}
