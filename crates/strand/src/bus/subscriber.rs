// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Synchronous topic subscriptions.

use crate::plugin::PluginId;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Callback invoked on every publish: `(event, sequence number)`.
///
/// Runs on the publishing thread. A panic unwinds through the publisher's
/// `put` call; the bus does not catch it.
pub type Callback<T> = Arc<dyn Fn(&Arc<T>, u64) + Send + Sync>;

/// One (plugin, callback) binding on a topic.
pub(crate) struct Subscription<T> {
    pub(crate) id: u64,
    pub(crate) plugin: PluginId,
    callback: Callback<T>,
    invocations: AtomicU64,
}

impl<T> Subscription<T> {
    pub(crate) fn new(id: u64, plugin: PluginId, callback: Callback<T>) -> Self {
        Self {
            id,
            plugin,
            callback,
            invocations: AtomicU64::new(0),
        }
    }

    #[inline]
    pub(crate) fn invoke(&self, event: &Arc<T>, seq: u64) {
        self.invocations.fetch_add(1, Ordering::Relaxed);
        (self.callback)(event, seq);
    }

    pub(crate) fn invocations(&self) -> u64 {
        self.invocations.load(Ordering::Relaxed)
    }
}

/// Handle returned by [`TopicBus::schedule`](crate::TopicBus::schedule).
///
/// Dropping the handle does not unsubscribe; pass it to
/// [`TopicBus::unsubscribe`](crate::TopicBus::unsubscribe) or let the runtime
/// drop every subscription of a plugin when the plugin stops.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    pub(crate) topic: String,
    pub(crate) id: u64,
    pub(crate) plugin: PluginId,
}

impl SubscriptionHandle {
    /// Topic this subscription listens on.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Plugin that owns the subscription.
    pub fn plugin(&self) -> PluginId {
        self.plugin
    }
}
