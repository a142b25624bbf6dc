// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Plugin runtime: loading, start/stop ordering, worker threads.
//!
//! # Lifecycle
//!
//! ```text
//! Runtime::new      registry <- Stoplight, RuntimeConfig, EnvStore, TopicBus,
//!                               RelativeClock
//! load(names)       construct all (load order) -> start all (load order)
//!                   -> clock.start -> stoplight.ready: workers begin iterating
//! stop()            stoplight.should_stop
//!                   -> per plugin, reverse load order:
//!                        reactive: stop()
//!                        polling:  join worker, then stop() on this thread
//!                        drop its subscriptions
//!                   -> stoplight.shutdown_complete
//! ```
//!
//! Each runtime owns its registry, bus and stoplight; several runtimes in
//! one process do not see each other.

mod worker;

pub use worker::WorkerStats;

use crate::bus::TopicBus;
use crate::clock::RelativeClock;
use crate::config::{EnvStore, RuntimeConfig};
use crate::error::{Error, Result};
use crate::plugin::{
    FactoryTable, Plugin, PluginContext, PluginFactory, PluginId, PluginKind, PluginState,
};
use crate::registry::ServiceRegistry;
use crate::sched::{self, SchedulingPolicy};
use crate::stoplight::Stoplight;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use worker::{PluginRecord, SpawnFailure, Worker, WorkerSettings};

enum Body {
    Reactive(Box<dyn Plugin>),
    Polling(Worker),
}

struct LoadedPlugin {
    name: String,
    record: Arc<PluginRecord>,
    body: Body,
}

/// Owns a set of plugins and the bus and registry they share.
pub struct Runtime {
    config: RuntimeConfig,
    factories: FactoryTable,
    services: Arc<ServiceRegistry>,
    bus: Arc<TopicBus>,
    stoplight: Arc<Stoplight>,
    clock: Arc<RelativeClock>,
    /// Load order.
    plugins: Mutex<Vec<LoadedPlugin>>,
    /// Started plugins only.
    records: DashMap<String, Arc<PluginRecord>>,
    next_id: AtomicU64,
    polling_loaded: AtomicUsize,
    stopped: AtomicBool,
}

impl Runtime {
    /// Create a runtime with `config`, resolving plugin names in `factories`.
    ///
    /// # Errors
    /// Registration errors from the service registry (not expected on a
    /// fresh runtime).
    pub fn new(config: RuntimeConfig, factories: FactoryTable) -> Result<Self> {
        let services = Arc::new(ServiceRegistry::new());
        let bus = Arc::new(TopicBus::new());
        let stoplight = Arc::new(Stoplight::new());
        let clock = Arc::new(RelativeClock::new());

        services.register::<Stoplight>(Arc::clone(&stoplight))?;
        services.register::<RelativeClock>(Arc::clone(&clock))?;
        services.register::<TopicBus>(Arc::clone(&bus))?;
        services.register::<RuntimeConfig>(Arc::new(config.clone()))?;
        services.register::<EnvStore>(Arc::new(EnvStore::new()))?;

        log::debug!(
            "[runtime] Created (scheduler={}, failure_policy={:?}, {} factories)",
            config.scheduler,
            config.failure_policy,
            factories.len()
        );

        Ok(Self {
            config,
            factories,
            services,
            bus,
            stoplight,
            clock,
            plugins: Mutex::new(Vec::new()),
            records: DashMap::new(),
            next_id: AtomicU64::new(1),
            polling_loaded: AtomicUsize::new(0),
            stopped: AtomicBool::new(false),
        })
    }

    /// [`new`](Self::new) with the configuration read from the environment.
    ///
    /// # Errors
    /// [`Error::InvalidConfig`] for malformed environment values.
    pub fn from_env(factories: FactoryTable) -> Result<Self> {
        Self::new(RuntimeConfig::from_env()?, factories)
    }

    /// Startup configuration.
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// The bus shared by every plugin.
    pub fn bus(&self) -> &Arc<TopicBus> {
        &self.bus
    }

    /// The registry shared by every plugin.
    pub fn services(&self) -> &Arc<ServiceRegistry> {
        &self.services
    }

    /// Start/stop signals.
    pub fn stoplight(&self) -> &Arc<Stoplight> {
        &self.stoplight
    }

    /// Clock started when the runtime signals ready.
    pub fn clock(&self) -> &Arc<RelativeClock> {
        &self.clock
    }

    /// Construct, then start, the plugins named in `names`, in that order.
    ///
    /// Every plugin is constructed before any is started. Once all started,
    /// the runtime signals ready and polling workers begin iterating.
    ///
    /// # Errors
    /// - [`Error::UnknownPlugin`] / [`Error::InvalidConfig`]: nothing is
    ///   started.
    /// - A factory error: nothing is started.
    /// - A `start` error (or a worker thread that cannot be spawned): plugins
    ///   started so far are stopped (reverse order) and the runtime shuts
    ///   down. The failed plugin is not listed by
    ///   [`plugin_names`](Self::plugin_names).
    pub fn load(&self, names: &[&str]) -> Result<()> {
        self.ensure_running()?;

        let mut seen = std::collections::HashSet::new();
        for name in names {
            if !seen.insert(*name) || self.records.contains_key(*name) {
                return Err(Error::InvalidConfig(format!(
                    "plugin '{}' loaded twice",
                    name
                )));
            }
        }

        let factories = names
            .iter()
            .map(|name| self.factories.get(name))
            .collect::<Result<Vec<_>>>()?;

        let mut constructed = Vec::with_capacity(names.len());
        for (name, factory) in names.iter().zip(factories) {
            constructed.push(self.construct(name, &factory)?);
        }

        for (name, id, kind) in constructed {
            if let Err(e) = self.start_one(name, id, kind) {
                log::error!("[runtime] Startup failed: {}", e);
                if let Err(stop_err) = self.stop() {
                    log::error!("[runtime] Stop after failed startup: {}", stop_err);
                }
                return Err(e);
            }
        }

        self.signal_ready();
        Ok(())
    }

    /// Construct one plugin from `factory` and start it immediately.
    ///
    /// On a running runtime the plugin joins the ready phase at once.
    ///
    /// # Errors
    /// [`Error::InvalidConfig`] if `name` is taken, the factory's error, or
    /// the plugin's `start` error (the plugin is then dropped).
    pub fn load_factory<F>(&self, name: &str, factory: F) -> Result<PluginId>
    where
        F: Fn(&PluginContext) -> Result<PluginKind> + Send + Sync + 'static,
    {
        self.ensure_running()?;
        if self.records.contains_key(name) {
            return Err(Error::InvalidConfig(format!(
                "plugin '{}' loaded twice",
                name
            )));
        }
        let factory: PluginFactory = Arc::new(factory);
        let (name, id, kind) = self.construct(name, &factory)?;
        self.start_one(name, id, kind)?;
        self.signal_ready();
        Ok(id)
    }

    fn ensure_running(&self) -> Result<()> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(Error::InvalidState("runtime already stopped".to_string()));
        }
        Ok(())
    }

    fn construct(&self, name: &str, factory: &PluginFactory) -> Result<(String, PluginId, PluginKind)> {
        let id = PluginId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let ctx = PluginContext::new(
            name,
            id,
            Arc::clone(&self.bus),
            Arc::clone(&self.services),
        );
        let kind = factory(&ctx).map_err(|e| {
            log::error!("[runtime] Factory of '{}' failed: {}", name, e);
            e
        })?;
        log::debug!("[runtime] Constructed '{}' ({}, {})", name, id, kind.label());
        Ok((name.to_string(), id, kind))
    }

    /// Start one constructed plugin. Only a started plugin gets a record; on
    /// failure its subscriptions are dropped and nothing is kept.
    fn start_one(&self, name: String, id: PluginId, kind: PluginKind) -> Result<()> {
        let record = Arc::new(PluginRecord::new(id, kind.label()));
        let body = match self.start_body(&name, kind, &record) {
            Ok(body) => body,
            Err(e) => {
                self.bus.unsubscribe_plugin(id);
                return Err(e);
            }
        };

        record.transition(PluginState::Constructed, PluginState::Started);
        self.records.insert(name.clone(), Arc::clone(&record));
        log::debug!("[runtime] Started '{}' ({})", name, id);
        self.plugins.lock().push(LoadedPlugin { name, record, body });
        Ok(())
    }

    fn start_body(&self, name: &str, kind: PluginKind, record: &Arc<PluginRecord>) -> Result<Body> {
        match kind {
            PluginKind::Reactive(mut plugin) => {
                plugin.start()?;
                Ok(Body::Reactive(plugin))
            }
            PluginKind::Polling(mut plugin) => {
                plugin.start()?;
                let settings = WorkerSettings {
                    policy: self.config.scheduler,
                    priority: plugin.priority().unwrap_or(self.config.default_priority),
                    load_index: self.polling_loaded.fetch_add(1, Ordering::Relaxed),
                    strict_sched: self.config.strict_sched,
                    failure_policy: self.config.failure_policy,
                };
                match Worker::spawn(
                    name,
                    plugin,
                    Arc::clone(record),
                    Arc::clone(&self.stoplight),
                    settings,
                ) {
                    Ok(worker) => Ok(Body::Polling(worker)),
                    Err(SpawnFailure { error, mut plugin }) => {
                        log::error!("[runtime] No worker thread for '{}': {}", name, error);
                        if let Err(e) = plugin.stop() {
                            log::error!("[runtime] Plugin '{}' failed to stop: {}", name, e);
                        }
                        Err(error)
                    }
                }
            }
        }
    }

    fn signal_ready(&self) {
        match self.clock.start() {
            Ok(true) => log::debug!("[runtime] Clock started"),
            Ok(false) => {}
            Err(e) => log::error!("[runtime] Clock not started: {}", e),
        }
        self.stoplight.signal_ready();
        for record in self.records.iter() {
            record.transition(PluginState::Started, PluginState::Running);
        }
    }

    /// Stop every plugin in reverse load order and join every worker.
    ///
    /// A polling plugin's worker is joined first, then its `stop()` runs on
    /// this thread, whether the worker exited cleanly, failed or never got
    /// past the ready wait. Idempotent: later calls return `Ok` at once. Every
    /// plugin is stopped even if an earlier one fails to; the first failure
    /// is returned.
    ///
    /// # Errors
    /// The first `stop` error of any plugin.
    pub fn stop(&self) -> Result<()> {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        log::debug!("[runtime] Stopping");
        self.stoplight.signal_should_stop();

        // Plugins are stopped outside the table lock.
        let plugins = std::mem::take(&mut *self.plugins.lock());

        let mut first_error = None;
        for mut plugin in plugins.into_iter().rev() {
            plugin.record.transition_unless_failed(PluginState::Stopping);
            let stopped = match &mut plugin.body {
                Body::Reactive(body) => body.stop(),
                Body::Polling(worker) => stop_polling(&plugin.name, worker),
            };
            if let Err(e) = stopped {
                log::error!("[runtime] Plugin '{}' failed to stop: {}", plugin.name, e);
                first_error.get_or_insert(e);
            }
            let removed = self.bus.unsubscribe_plugin(plugin.record.id);
            plugin.record.transition_unless_failed(PluginState::Stopped);
            log::debug!(
                "[runtime] Stopped '{}' ({} subscription(s) dropped)",
                plugin.name,
                removed
            );
        }

        self.stoplight.signal_shutdown_complete();
        log::debug!("[runtime] Shutdown complete");
        first_error.map_or(Ok(()), Err)
    }

    /// Block until [`stop`](Self::stop) completed (called from elsewhere).
    pub fn wait(&self) {
        self.stoplight.wait_for_shutdown_complete();
    }

    /// Run until `duration` elapsed or shutdown is requested, then stop.
    ///
    /// # Errors
    /// See [`stop`](Self::stop).
    pub fn run_for(&self, duration: Duration) -> Result<()> {
        self.stoplight.wait_for_should_stop(duration);
        self.stop()
    }

    /// Run until the configured duration elapsed or a plugin requests
    /// shutdown through the stoplight, then stop.
    ///
    /// # Errors
    /// See [`stop`](Self::stop).
    pub fn run(&self) -> Result<()> {
        match self.config.run_duration {
            Some(duration) => self.run_for(duration),
            None => {
                while !self.stoplight.wait_for_should_stop(Duration::from_secs(1)) {}
                self.stop()
            }
        }
    }

    /// Lifecycle state of plugin `name`.
    pub fn plugin_state(&self, name: &str) -> Option<PluginState> {
        self.records.get(name).map(|r| r.state())
    }

    /// Id of plugin `name`.
    pub fn plugin_id(&self, name: &str) -> Option<PluginId> {
        self.records.get(name).map(|r| r.id)
    }

    /// Names of loaded plugins, in load order.
    pub fn plugin_names(&self) -> Vec<String> {
        let mut named: Vec<_> = self
            .records
            .iter()
            .map(|r| (r.id, r.key().clone()))
            .collect();
        named.sort();
        named.into_iter().map(|(_, name)| name).collect()
    }

    /// Loop counters of polling plugin `name`.
    pub fn worker_stats(&self, name: &str) -> Option<WorkerStats> {
        self.records
            .get(name)
            .filter(|r| r.kind == "polling")
            .map(|r| r.stats())
    }

    /// Change the SCHED_FIFO priority of a running polling plugin.
    ///
    /// # Errors
    /// - [`Error::InvalidState`] unless the scheduler is
    ///   [`SchedulingPolicy::Dynamic`] and the plugin's worker is running.
    /// - [`Error::UnknownPlugin`] for an unknown name.
    /// - OS errors from [`sched::set_thread_priority`].
    pub fn set_priority(&self, name: &str, priority: i32) -> Result<()> {
        if self.config.scheduler != SchedulingPolicy::Dynamic {
            return Err(Error::InvalidState(format!(
                "priority changes need the dynamic scheduler, running {}",
                self.config.scheduler
            )));
        }
        let record = self
            .records
            .get(name)
            .map(|r| Arc::clone(r.value()))
            .ok_or_else(|| Error::UnknownPlugin(name.to_string()))?;
        let tid = record
            .tid()
            .filter(|_| record.state() == PluginState::Running)
            .ok_or_else(|| Error::InvalidState(format!("'{}' has no running worker", name)))?;
        sched::set_thread_priority(tid, priority)?;
        log::debug!("[sched] '{}' priority set to {}", name, priority);
        Ok(())
    }
}

/// Join the worker, then stop the plugin it handed back.
fn stop_polling(name: &str, worker: &mut Worker) -> Result<()> {
    match worker.join() {
        Some(mut plugin) => plugin.stop(),
        None => {
            log::warn!("[runtime] '{}' not handed back by its worker; stop() skipped", name);
            Ok(())
        }
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            log::error!("[runtime] Stop on drop: {}", e);
        }
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.config)
            .field("plugins", &self.plugin_names())
            .field("stopped", &self.stopped.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::{PollingPlugin, SkipOption};
    use std::sync::atomic::AtomicU32;

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl Plugin for Recorder {
        fn start(&mut self) -> Result<()> {
            self.log.lock().push(format!("start {}", self.name));
            Ok(())
        }
        fn stop(&mut self) -> Result<()> {
            self.log.lock().push(format!("stop {}", self.name));
            Ok(())
        }
    }

    fn recording_table(log: &Arc<Mutex<Vec<String>>>, names: &[&'static str]) -> FactoryTable {
        let mut table = FactoryTable::new();
        for &name in names {
            let log = Arc::clone(log);
            table
                .register(name, move |_| {
                    Ok(PluginKind::reactive(Recorder {
                        name,
                        log: Arc::clone(&log),
                    }))
                })
                .expect("unique name");
        }
        table
    }

    #[test]
    fn test_start_in_order_stop_in_reverse() -> Result<()> {
        let log = Arc::new(Mutex::new(Vec::new()));
        let runtime = Runtime::new(RuntimeConfig::default(), recording_table(&log, &["a", "b", "c"]))?;

        runtime.load(&["a", "b", "c"])?;
        assert_eq!(runtime.plugin_state("b"), Some(PluginState::Running));
        assert_eq!(runtime.plugin_names(), vec!["a", "b", "c"]);

        runtime.stop()?;
        runtime.stop()?;
        assert_eq!(
            *log.lock(),
            vec!["start a", "start b", "start c", "stop c", "stop b", "stop a"]
        );
        assert_eq!(runtime.plugin_state("a"), Some(PluginState::Stopped));
        assert!(runtime.stoplight().is_shutdown_complete());
        Ok(())
    }

    #[test]
    fn test_unknown_plugin_starts_nothing() -> Result<()> {
        let log = Arc::new(Mutex::new(Vec::new()));
        let runtime = Runtime::new(RuntimeConfig::default(), recording_table(&log, &["a"]))?;

        assert!(matches!(runtime.load(&["a", "slam"]), Err(Error::UnknownPlugin(n)) if n == "slam"));
        assert!(log.lock().is_empty());
        assert!(matches!(runtime.load(&["a", "a"]), Err(Error::InvalidConfig(_))));
        Ok(())
    }

    #[test]
    fn test_runtime_services_registered() -> Result<()> {
        let runtime = Runtime::new(RuntimeConfig::default(), FactoryTable::new())?;
        let stoplight = runtime.services().lookup::<Stoplight>()?;
        assert!(Arc::ptr_eq(&stoplight, runtime.stoplight()));
        assert!(runtime.services().has::<TopicBus>());
        assert!(runtime.services().has::<RuntimeConfig>());
        assert!(runtime.services().has::<EnvStore>());

        let clock = runtime.services().lookup::<RelativeClock>()?;
        assert!(Arc::ptr_eq(&clock, runtime.clock()));
        assert!(!clock.is_started());
        runtime.load(&[])?;
        assert!(clock.is_started());
        assert!(clock.now().is_ok());
        Ok(())
    }

    #[test]
    fn test_reactive_subscriptions_dropped_on_stop() -> Result<()> {
        struct Echo {
            ctx: PluginContext,
        }
        impl Plugin for Echo {
            fn start(&mut self) -> Result<()> {
                let out = self.ctx.bus().writer::<u32>("out")?;
                self.ctx
                    .bus()
                    .schedule(self.ctx.id(), "in", move |v: &Arc<u32>, _: u64| {
                        let _ = out.put(**v * 2);
                    })?;
                Ok(())
            }
        }

        let runtime = Runtime::new(RuntimeConfig::default(), FactoryTable::new())?;
        runtime.load_factory("echo", |ctx| Ok(PluginKind::reactive(Echo { ctx: ctx.clone() })))?;

        let input = runtime.bus().writer::<u32>("in")?;
        let output = runtime.bus().reader::<u32>("out")?;
        input.put(21_u32)?;
        assert_eq!(output.get().as_deref(), Some(&42));

        runtime.stop()?;
        assert_eq!(runtime.bus().topic_stats("in").map(|s| s.subscribers), Some(0));
        Ok(())
    }

    #[test]
    fn test_start_failure_stops_started_plugins() -> Result<()> {
        struct Broken;
        impl Plugin for Broken {
            fn start(&mut self) -> Result<()> {
                Err(Error::Plugin("no device".to_string()))
            }
        }

        let log = Arc::new(Mutex::new(Vec::new()));
        let mut table = recording_table(&log, &["a"]);
        table.register("broken", |_| Ok(PluginKind::reactive(Broken)))?;
        let runtime = Runtime::new(RuntimeConfig::default(), table)?;

        assert!(matches!(runtime.load(&["a", "broken"]), Err(Error::Plugin(_))));
        assert_eq!(*log.lock(), vec!["start a", "stop a"]);
        assert!(matches!(runtime.load(&["a"]), Err(Error::InvalidState(_))));

        // Only plugins that started are tracked.
        assert_eq!(runtime.plugin_names(), vec!["a"]);
        assert_eq!(runtime.plugin_state("a"), Some(PluginState::Stopped));
        assert_eq!(runtime.plugin_state("broken"), None);
        assert_eq!(runtime.plugin_id("broken"), None);
        Ok(())
    }

    #[test]
    fn test_failed_load_factory_frees_the_name() -> Result<()> {
        struct Broken;
        impl PollingPlugin for Broken {
            fn start(&mut self) -> Result<()> {
                Err(Error::Plugin("no device".to_string()))
            }
            fn one_iteration(&mut self) -> Result<()> {
                Ok(())
            }
        }

        let runtime = Runtime::new(RuntimeConfig::default(), FactoryTable::new())?;
        let failed = runtime.load_factory("camera", |ctx| {
            ctx.bus().schedule(ctx.id(), "trigger", |_: &Arc<u32>, _| {})?;
            Ok(PluginKind::polling(Broken))
        });
        assert!(matches!(failed, Err(Error::Plugin(_))));
        assert!(runtime.plugin_names().is_empty());
        assert_eq!(runtime.plugin_state("camera"), None);
        assert_eq!(runtime.bus().topic_stats("trigger").map(|s| s.subscribers), Some(0));

        let log = Arc::new(Mutex::new(Vec::new()));
        let shared = Arc::clone(&log);
        runtime.load_factory("camera", move |_| {
            Ok(PluginKind::reactive(Recorder {
                name: "camera",
                log: Arc::clone(&shared),
            }))
        })?;
        assert_eq!(runtime.plugin_names(), vec!["camera"]);
        runtime.stop()?;
        assert_eq!(*log.lock(), vec!["start camera", "stop camera"]);
        Ok(())
    }

    #[test]
    fn test_polling_worker_counts() -> Result<()> {
        struct Ticker(Arc<AtomicU32>);
        impl PollingPlugin for Ticker {
            fn should_skip(&mut self) -> SkipOption {
                if self.0.load(Ordering::SeqCst) >= 5 {
                    SkipOption::Stop
                } else {
                    SkipOption::Run
                }
            }
            fn one_iteration(&mut self) -> Result<()> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }

        let ticks = Arc::new(AtomicU32::new(0));
        let runtime = Runtime::new(RuntimeConfig::default(), FactoryTable::new())?;
        let shared = Arc::clone(&ticks);
        runtime.load_factory("ticker", move |_| {
            Ok(PluginKind::polling(Ticker(Arc::clone(&shared))))
        })?;

        runtime.run_for(Duration::from_millis(50))?;
        assert_eq!(ticks.load(Ordering::SeqCst), 5);
        assert_eq!(runtime.worker_stats("ticker").map(|s| s.iterations), Some(5));
        assert_eq!(runtime.plugin_state("ticker"), Some(PluginState::Stopped));
        Ok(())
    }

    #[test]
    fn test_set_priority_requires_dynamic() -> Result<()> {
        let runtime = Runtime::new(RuntimeConfig::default(), FactoryTable::new())?;
        assert!(matches!(runtime.set_priority("x", 10), Err(Error::InvalidState(_))));

        let dynamic = Runtime::new(
            RuntimeConfig::default().with_scheduler(SchedulingPolicy::Dynamic),
            FactoryTable::new(),
        )?;
        assert!(matches!(dynamic.set_priority("x", 10), Err(Error::UnknownPlugin(_))));
        Ok(())
    }
}
