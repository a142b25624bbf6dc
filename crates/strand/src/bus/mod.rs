// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Typed topic bus.
//!
//! Topics are created lazily on first use and bound to one element type for
//! their lifetime. Every handle (writer, reader, buffered reader,
//! subscription) refers directly to its topic; the topic table lock is only
//! taken to create or look up a handle, never on the publish path.
//!
//! ```text
//!  TopicBus
//!    topics: RwLock<name -> TopicEntry { TypeId, Arc<Topic<T>> as Any, control }>
//!
//!  Writer<T> ---put---> Topic<T> --latest--> Reader<T>
//!                                --queue---> BufferedReader<T>
//!                                --call----> subscriber callbacks (same thread)
//! ```

mod dispatch;
mod reader;
mod subscriber;
mod topic;
mod writer;

pub use dispatch::MAX_DISPATCH_DEPTH;
pub use reader::{BufferedReader, Reader};
pub use subscriber::{Callback, SubscriptionHandle};
pub use writer::{NetworkWriter, Writer};

use crate::error::{Error, Result};
use crate::network::{NetworkBackend, Serializable, TopicConfig};
use crate::plugin::PluginId;
use parking_lot::RwLock;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use subscriber::Subscription;
use topic::{Topic, TopicControl};

/// Snapshot of one topic's counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicStats {
    /// Topic name.
    pub name: String,
    /// Element type the topic is bound to.
    pub type_name: &'static str,
    /// Number of events published (also the latest sequence number).
    pub published: u64,
    /// Registered subscriber callbacks.
    pub subscribers: usize,
    /// Attached buffered reader queues.
    pub buffered_readers: usize,
    /// Total subscriber invocations over the topic's lifetime.
    pub callbacks_invoked: u64,
}

struct TopicEntry {
    type_id: TypeId,
    typed: Arc<dyn Any + Send + Sync>,
    control: Arc<dyn TopicControl>,
}

/// Named, typed publish/subscribe store shared by every plugin of a runtime.
pub struct TopicBus {
    topics: RwLock<HashMap<String, TopicEntry>>,
    next_subscription: AtomicU64,
}

impl TopicBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            next_subscription: AtomicU64::new(1),
        }
    }

    /// Resolve `name` to its typed topic, creating it bound to `T` if absent.
    fn topic<T: Send + Sync + 'static>(&self, name: &str) -> Result<Arc<Topic<T>>> {
        if let Some(entry) = self.topics.read().get(name) {
            return Self::downcast(name, entry);
        }

        let mut topics = self.topics.write();
        // Another thread may have created it between the two locks.
        let entry = topics.entry(name.to_string()).or_insert_with(|| {
            log::debug!(
                "[bus] Topic '{}' created for {}",
                name,
                std::any::type_name::<T>()
            );
            let topic = Arc::new(Topic::<T>::new(name));
            TopicEntry {
                type_id: TypeId::of::<T>(),
                typed: Arc::clone(&topic) as Arc<dyn Any + Send + Sync>,
                control: topic as Arc<dyn TopicControl>,
            }
        });
        Self::downcast(name, entry)
    }

    fn downcast<T: Send + Sync + 'static>(name: &str, entry: &TopicEntry) -> Result<Arc<Topic<T>>> {
        let mismatch = || Error::TypeMismatch {
            topic: name.to_string(),
            bound: entry.control.type_name(),
            requested: std::any::type_name::<T>(),
        };
        if entry.type_id != TypeId::of::<T>() {
            let err = mismatch();
            log::error!("[bus] {}", err);
            return Err(err);
        }
        Arc::clone(&entry.typed)
            .downcast::<Topic<T>>()
            .map_err(|_| mismatch())
    }

    fn control(&self, name: &str) -> Option<Arc<dyn TopicControl>> {
        self.topics
            .read()
            .get(name)
            .map(|entry| Arc::clone(&entry.control))
    }

    /// Writer handle for `name`.
    ///
    /// # Errors
    /// [`Error::TypeMismatch`] if the topic is bound to another type.
    pub fn writer<T: Send + Sync + 'static>(&self, name: &str) -> Result<Writer<T>> {
        Ok(Writer::new(self.topic(name)?))
    }

    /// Latest-value reader for `name`.
    ///
    /// # Errors
    /// [`Error::TypeMismatch`] if the topic is bound to another type.
    pub fn reader<T: Send + Sync + 'static>(&self, name: &str) -> Result<Reader<T>> {
        Ok(Reader::new(self.topic(name)?))
    }

    /// Reader receiving every event published on `name` after this call.
    ///
    /// # Errors
    /// [`Error::TypeMismatch`] if the topic is bound to another type.
    pub fn buffered_reader<T: Send + Sync + 'static>(
        &self,
        name: &str,
    ) -> Result<BufferedReader<T>> {
        Ok(BufferedReader::new(self.topic(name)?))
    }

    /// Writer that also forwards events to `backend`.
    ///
    /// Registers the topic with the backend through
    /// [`NetworkBackend::topic_create`].
    ///
    /// # Errors
    /// [`Error::TypeMismatch`] if the topic is bound to another type.
    pub fn network_writer<T: Serializable + Send + Sync + 'static>(
        &self,
        name: &str,
        backend: Arc<dyn NetworkBackend>,
        config: TopicConfig,
    ) -> Result<NetworkWriter<T>> {
        let local = self.writer::<T>(name)?;
        backend.topic_create(name, config);
        Ok(NetworkWriter::new(local, backend))
    }

    /// Decode `bytes` as `T` and publish the result locally on `name`.
    ///
    /// Receiving side of a networked topic.
    ///
    /// # Errors
    /// Decoding errors from [`Serializable::from_bytes`], or
    /// [`Error::TypeMismatch`].
    pub fn put_serialized<T: Serializable + Send + Sync + 'static>(
        &self,
        name: &str,
        bytes: &[u8],
    ) -> Result<u64> {
        let topic = self.topic::<T>(name)?;
        let event = T::from_bytes(bytes)?;
        topic.put(Arc::new(event))
    }

    /// Register `callback` to run synchronously on every publish to `name`.
    ///
    /// Callbacks of one topic run in registration order on the publishing
    /// thread. A callback registered during a publish first runs on the next
    /// publish.
    ///
    /// # Errors
    /// [`Error::TypeMismatch`] if the topic is bound to another type.
    pub fn schedule<T, F>(
        &self,
        plugin: PluginId,
        name: &str,
        callback: F,
    ) -> Result<SubscriptionHandle>
    where
        T: Send + Sync + 'static,
        F: Fn(&Arc<T>, u64) + Send + Sync + 'static,
    {
        let topic = self.topic::<T>(name)?;
        let id = self.next_subscription.fetch_add(1, Ordering::Relaxed);
        topic.subscribe(Subscription::new(id, plugin, Arc::new(callback)));
        log::debug!(
            "[bus] Plugin {} subscribed to '{}' (subscription {})",
            plugin,
            name,
            id
        );
        Ok(SubscriptionHandle {
            topic: name.to_string(),
            id,
            plugin,
        })
    }

    /// Remove one subscription. Returns false if it was already gone.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        self.control(&handle.topic)
            .is_some_and(|control| control.unsubscribe(handle.id))
    }

    /// Remove every subscription owned by `plugin`, on every topic.
    pub fn unsubscribe_plugin(&self, plugin: PluginId) -> usize {
        let controls: Vec<_> = self
            .topics
            .read()
            .values()
            .map(|entry| Arc::clone(&entry.control))
            .collect();
        let removed = controls
            .iter()
            .map(|control| control.unsubscribe_plugin(plugin))
            .sum();
        if removed > 0 {
            log::debug!(
                "[bus] Removed {} subscription(s) of plugin {}",
                removed,
                plugin
            );
        }
        removed
    }

    /// True once any handle for `name` was created.
    pub fn topic_exists(&self, name: &str) -> bool {
        self.topics.read().contains_key(name)
    }

    /// Names of every topic, sorted.
    pub fn topic_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.topics.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Counters of topic `name`, if it exists.
    pub fn topic_stats(&self, name: &str) -> Option<TopicStats> {
        self.control(name).map(|control| control.stats())
    }
}

impl Default for TopicBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TopicBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopicBus")
            .field("topics", &self.topic_names())
            .finish()
    }
}
