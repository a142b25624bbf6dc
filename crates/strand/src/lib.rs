// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # strand - plugin runtime core for real-time sensor pipelines
//!
//! Independently built plugins exchange immutable, typed events over a topic
//! bus and are driven by a runtime that starts them, runs polling plugins on
//! dedicated worker threads and stops everything in reverse order.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::time::Duration;
//! use strand::{
//!     FactoryTable, PluginKind, PluginState, PollingPlugin, Runtime, RuntimeConfig, SkipOption,
//! };
//!
//! struct Imu {
//!     writer: strand::Writer<u64>,
//!     t: u64,
//! }
//!
//! impl PollingPlugin for Imu {
//!     fn should_skip(&mut self) -> SkipOption {
//!         if self.t < 3 { SkipOption::Run } else { SkipOption::Stop }
//!     }
//!     fn one_iteration(&mut self) -> strand::Result<()> {
//!         self.t += 1;
//!         self.writer.put(self.t)?;
//!         Ok(())
//!     }
//! }
//!
//! let mut plugins = FactoryTable::new();
//! plugins.register("imu", |ctx| {
//!     let writer = ctx.bus().writer::<u64>("imu")?;
//!     Ok(PluginKind::polling(Imu { writer, t: 0 }))
//! })?;
//!
//! let runtime = Runtime::new(RuntimeConfig::default(), plugins)?;
//! let mut samples = runtime.bus().buffered_reader::<u64>("imu")?;
//! runtime.load(&["imu"])?;
//!
//! // The worker leaves its loop after three samples.
//! while runtime.plugin_state("imu") != Some(PluginState::Stopped) {
//!     std::thread::sleep(Duration::from_millis(1));
//! }
//! runtime.stop()?;
//!
//! let got: Vec<u64> = std::iter::from_fn(|| samples.dequeue()).map(|e| *e).collect();
//! assert_eq!(got, vec![1, 2, 3]);
//! # Ok::<(), strand::Error>(())
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------------------------------+
//! |                             Runtime                                 |
//! |   FactoryTable -> construct -> start (load order) -> ready          |
//! |   stop: should_stop -> stop/join (reverse order) -> complete        |
//! +---------------------------------------------------------------------+
//! |        Plugins: reactive (callbacks) | polling (worker thread)      |
//! +---------------------------------------------------------------------+
//! |   TopicBus                         |   ServiceRegistry              |
//! |   Writer / Reader / BufferedReader |   TypeId -> Arc<dyn Service>   |
//! |   subscriber fan-out, network put  |   Stoplight, clock, config, env|
//! +---------------------------------------------------------------------+
//! |   SlotPool (per pipeline stage)    |   sched (SCHED_FIFO, affinity) |
//! +---------------------------------------------------------------------+
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`TopicBus`] | Named, typed topics; factory for writers and readers |
//! | [`ServiceRegistry`] | One instance per service type |
//! | [`Runtime`] | Loads, starts and stops plugins |
//! | [`PollingPlugin`] | Plugin driven by a worker thread |
//! | [`SlotPool`] | Four-state producer/consumer slot handoff |
//! | [`RelativeClock`] | Time since the runtime signaled ready |

/// Event bus: topics, writers, readers, subscriptions.
pub mod bus;
/// Relative clock.
pub mod clock;
/// Runtime configuration and environment cache.
pub mod config;
mod error;
/// Installable `log` backend.
pub mod logging;
/// Networked topic contract and loopback backend.
pub mod network;
/// Plugin traits, context and factory table.
pub mod plugin;
/// Slot buffer pool.
pub mod pool;
/// Service registry.
pub mod registry;
/// Plugin runtime.
pub mod runtime;
/// Scheduling policies and OS thread attributes.
pub mod sched;
/// Start/stop synchronization.
pub mod stoplight;

pub use bus::{
    BufferedReader, Callback, NetworkWriter, Reader, SubscriptionHandle, TopicBus, TopicStats,
    Writer, MAX_DISPATCH_DEPTH,
};
pub use clock::RelativeClock;
pub use config::{EnvStore, FailurePolicy, RuntimeConfig};
pub use error::{Error, Result};
pub use network::{LoopbackBackend, NetworkBackend, Serializable, SerializationMethod, TopicConfig};
pub use plugin::{
    FactoryTable, Plugin, PluginContext, PluginFactory, PluginId, PluginKind, PluginState,
    PollingPlugin, SkipOption,
};
pub use pool::{SlotPool, SlotState};
pub use registry::ServiceRegistry;
pub use runtime::{Runtime, WorkerStats};
pub use sched::SchedulingPolicy;
pub use stoplight::Stoplight;

/// strand version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
