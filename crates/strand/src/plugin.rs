// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Plugin contracts.
//!
//! A plugin is either *reactive* ([`Plugin`]): it registers subscriber
//! callbacks in `start` and does its work inside them, or *polling*
//! ([`PollingPlugin`]): the runtime gives it a dedicated worker thread that
//! repeatedly asks [`should_skip`](PollingPlugin::should_skip) and runs
//! [`one_iteration`](PollingPlugin::one_iteration) when told to.
//!
//! Plugins are built from a [`FactoryTable`] by name. Each factory receives a
//! [`PluginContext`] carrying the plugin's name, id and handles to the
//! runtime's bus and service registry.
//!
//! # Example
//!
//! ```rust
//! use strand::{FactoryTable, PluginKind, PollingPlugin, SkipOption};
//!
//! struct Counter(u64);
//!
//! impl PollingPlugin for Counter {
//!     fn should_skip(&mut self) -> SkipOption {
//!         if self.0 >= 3 { SkipOption::Stop } else { SkipOption::Run }
//!     }
//!     fn one_iteration(&mut self) -> strand::Result<()> {
//!         self.0 += 1;
//!         Ok(())
//!     }
//! }
//!
//! let mut table = FactoryTable::new();
//! table.register("counter", |_ctx| Ok(PluginKind::polling(Counter(0))))?;
//! assert!(table.contains("counter"));
//! # Ok::<(), strand::Error>(())
//! ```

use crate::bus::TopicBus;
use crate::error::{Error, Result};
use crate::registry::ServiceRegistry;
use std::collections::HashMap;
use std::sync::Arc;

/// Runtime-unique plugin identifier, assigned in load order starting at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PluginId(pub u64);

impl std::fmt::Display for PluginId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle state of a loaded plugin.
///
/// `Constructed -> Started -> Running -> Stopping -> Stopped`; a polling
/// plugin whose worker terminated on a failure ends in `Failed` instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginState {
    /// Built by its factory, `start` not yet called.
    Constructed,
    /// `start` returned; waiting for the runtime to signal ready.
    Started,
    /// Runtime signaled ready; polling workers are iterating.
    Running,
    /// `stop` in progress.
    Stopping,
    /// Stopped and joined.
    Stopped,
    /// Worker terminated on an iteration error or panic.
    Failed,
}

/// Decision returned by [`PollingPlugin::should_skip`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipOption {
    /// Run one iteration now.
    Run,
    /// Skip and give up the CPU (`thread::yield_now`).
    SkipAndYield,
    /// Skip and ask again immediately.
    SkipAndSpin,
    /// Leave the loop; the worker exits.
    Stop,
}

/// Reactive plugin: does its work in subscriber callbacks.
pub trait Plugin: Send {
    /// Register subscriptions and publish initial state.
    fn start(&mut self) -> Result<()> {
        Ok(())
    }

    /// Release resources. Subscriptions are removed by the runtime afterwards.
    fn stop(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Polling plugin: driven by a dedicated worker thread.
///
/// Loop, after the runtime signals ready:
///
/// ```text
/// thread_setup()
/// while !stop_requested:
///     match should_skip():
///         Run          => one_iteration()
///         SkipAndYield => yield
///         SkipAndSpin  => (nothing)
///         Stop         => break
/// on_stop()
/// ```
///
/// At shutdown the runtime joins the worker, then calls `stop()` on its own
/// thread, in reverse load order. `stop()` runs for every started plugin,
/// including one whose worker failed or never left the ready wait. It is
/// skipped only if the worker thread itself panicked outside the loop.
pub trait PollingPlugin: Send {
    /// Runs on the runtime thread before the worker is spawned.
    fn start(&mut self) -> Result<()> {
        Ok(())
    }

    /// Runs once on the worker thread, after the scheduling policy was
    /// applied and before the first `should_skip`.
    fn thread_setup(&mut self) -> Result<()> {
        Ok(())
    }

    /// Decide what the next loop turn does.
    fn should_skip(&mut self) -> SkipOption {
        SkipOption::Run
    }

    /// One unit of work. An error terminates the worker.
    fn one_iteration(&mut self) -> Result<()>;

    /// Runs on the worker thread after the loop exited normally.
    fn on_stop(&mut self) {}

    /// Release what `start` acquired. Runs on the runtime thread once the
    /// worker has exited.
    fn stop(&mut self) -> Result<()> {
        Ok(())
    }

    /// SCHED_FIFO priority requested under the priority and dynamic
    /// policies. `None` uses the runtime default.
    fn priority(&self) -> Option<i32> {
        None
    }
}

/// A constructed plugin, tagged by execution model.
pub enum PluginKind {
    /// Callback-driven plugin.
    Reactive(Box<dyn Plugin>),
    /// Thread-driven plugin.
    Polling(Box<dyn PollingPlugin>),
}

impl PluginKind {
    /// Wrap a reactive plugin.
    pub fn reactive<P: Plugin + 'static>(plugin: P) -> Self {
        PluginKind::Reactive(Box::new(plugin))
    }

    /// Wrap a polling plugin.
    pub fn polling<P: PollingPlugin + 'static>(plugin: P) -> Self {
        PluginKind::Polling(Box::new(plugin))
    }

    pub(crate) fn label(&self) -> &'static str {
        match self {
            PluginKind::Reactive(_) => "reactive",
            PluginKind::Polling(_) => "polling",
        }
    }
}

/// What a factory gets to build its plugin.
#[derive(Clone)]
pub struct PluginContext {
    name: String,
    id: PluginId,
    bus: Arc<TopicBus>,
    services: Arc<ServiceRegistry>,
}

impl PluginContext {
    pub(crate) fn new(
        name: &str,
        id: PluginId,
        bus: Arc<TopicBus>,
        services: Arc<ServiceRegistry>,
    ) -> Self {
        Self {
            name: name.to_string(),
            id,
            bus,
            services,
        }
    }

    /// Name the plugin was loaded under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Identifier to pass to [`TopicBus::schedule`].
    pub fn id(&self) -> PluginId {
        self.id
    }

    /// The runtime's topic bus.
    pub fn bus(&self) -> &Arc<TopicBus> {
        &self.bus
    }

    /// The runtime's service registry.
    pub fn services(&self) -> &Arc<ServiceRegistry> {
        &self.services
    }

    /// Shortcut for `services().lookup::<S>()`.
    pub fn lookup<S: ?Sized + Send + Sync + 'static>(&self) -> Result<Arc<S>> {
        self.services.lookup::<S>()
    }
}

impl std::fmt::Debug for PluginContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginContext")
            .field("name", &self.name)
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// Builds one plugin instance.
pub type PluginFactory = Arc<dyn Fn(&PluginContext) -> Result<PluginKind> + Send + Sync>;

/// Build-time table from plugin name to factory.
#[derive(Default, Clone)]
pub struct FactoryTable {
    factories: HashMap<String, PluginFactory>,
}

impl FactoryTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a factory under `name`.
    ///
    /// # Errors
    /// [`Error::InvalidConfig`] if `name` is already taken.
    pub fn register<F>(&mut self, name: &str, factory: F) -> Result<&mut Self>
    where
        F: Fn(&PluginContext) -> Result<PluginKind> + Send + Sync + 'static,
    {
        if self.factories.contains_key(name) {
            return Err(Error::InvalidConfig(format!(
                "plugin '{}' registered twice",
                name
            )));
        }
        self.factories.insert(name.to_string(), Arc::new(factory));
        Ok(self)
    }

    /// Factory registered under `name`.
    ///
    /// # Errors
    /// [`Error::UnknownPlugin`] if absent.
    pub fn get(&self, name: &str) -> Result<PluginFactory> {
        self.factories
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownPlugin(name.to_string()))
    }

    /// True if `name` has a factory.
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of registered factories.
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    /// True when no factory is registered.
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl std::fmt::Debug for FactoryTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FactoryTable")
            .field("plugins", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Idle;
    impl Plugin for Idle {}

    #[test]
    fn test_factory_table_rejects_duplicates() -> Result<()> {
        let mut table = FactoryTable::new();
        table
            .register("a", |_| Ok(PluginKind::reactive(Idle)))?
            .register("b", |_| Ok(PluginKind::reactive(Idle)))?;

        assert!(matches!(
            table.register("a", |_| Ok(PluginKind::reactive(Idle))),
            Err(Error::InvalidConfig(_))
        ));
        assert_eq!(table.names(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(table.len(), 2);
        Ok(())
    }

    #[test]
    fn test_unknown_plugin() {
        let table = FactoryTable::new();
        assert!(table.is_empty());
        assert!(matches!(table.get("slam"), Err(Error::UnknownPlugin(n)) if n == "slam"));
    }

    #[test]
    fn test_context_exposes_handles() -> Result<()> {
        let services = Arc::new(ServiceRegistry::new());
        services.register::<String>(Arc::new("calib".to_string()))?;
        let ctx = PluginContext::new("cam", PluginId(2), Arc::new(TopicBus::new()), services);

        assert_eq!(ctx.name(), "cam");
        assert_eq!(ctx.id(), PluginId(2));
        assert_eq!(ctx.id().to_string(), "#2");
        assert_eq!(ctx.lookup::<String>()?.as_str(), "calib");
        assert!(ctx.bus().topic_names().is_empty());
        Ok(())
    }

    #[test]
    fn test_kind_labels() {
        struct Once;
        impl PollingPlugin for Once {
            fn one_iteration(&mut self) -> Result<()> {
                Ok(())
            }
        }
        assert_eq!(PluginKind::reactive(Idle).label(), "reactive");
        assert_eq!(PluginKind::polling(Once).label(), "polling");
    }
}
