// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-topic storage: latest event, buffered queues, subscriptions.
//!
//! # Publish path
//!
//! ```text
//! put(event)
//!   |-- buffers lock ----------------------------+
//!   |   seq = ++published                        |
//!   |   latest.store(event)        (ArcSwap)     |
//!   |   for q in buffers: q.send(event)          |
//!   +--------------------------------------------+
//!   |-- subscriptions.load()      (snapshot, no lock)
//!       for s in subscriptions: s.callback(event, seq)
//! ```
//!
//! Callbacks run with no topic lock held, so a callback may subscribe,
//! read or publish without deadlocking. Concurrent puts from several writers
//! may therefore deliver callbacks out of sequence order; the queues and
//! `latest` stay in order.

use super::dispatch::DispatchGuard;
use super::subscriber::Subscription;
use super::TopicStats;
use crate::error::Result;
use crate::plugin::PluginId;
use arc_swap::{ArcSwap, ArcSwapOption};
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Typed topic. Held in the bus table behind `Arc<dyn Any>`.
pub(crate) struct Topic<T> {
    name: Arc<str>,
    type_name: &'static str,
    latest: ArcSwapOption<T>,
    published: AtomicU64,
    /// Also serializes sequence assignment and latest replacement.
    buffers: Mutex<Vec<Sender<Arc<T>>>>,
    subscriptions: ArcSwap<Vec<Arc<Subscription<T>>>>,
}

impl<T: Send + Sync + 'static> Topic<T> {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            type_name: std::any::type_name::<T>(),
            latest: ArcSwapOption::empty(),
            published: AtomicU64::new(0),
            buffers: Mutex::new(Vec::new()),
            subscriptions: ArcSwap::from_pointee(Vec::new()),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// Most recent event, `None` before the first publish.
    #[inline]
    pub(crate) fn latest(&self) -> Option<Arc<T>> {
        self.latest.load_full()
    }

    /// Sequence number of the most recent publish (0 before any).
    pub(crate) fn sequence(&self) -> u64 {
        self.published.load(Ordering::Acquire)
    }

    /// Publish `event`; returns its sequence number once every callback returned.
    pub(crate) fn put(&self, event: Arc<T>) -> Result<u64> {
        let _depth = DispatchGuard::enter(&self.name)?;

        let seq = {
            let mut buffers = self.buffers.lock();
            let seq = self.published.fetch_add(1, Ordering::AcqRel) + 1;
            self.latest.store(Some(Arc::clone(&event)));
            // Disconnected senders belong to dropped buffered readers.
            buffers.retain(|queue| queue.send(Arc::clone(&event)).is_ok());
            seq
        };

        let subscriptions = self.subscriptions.load_full();
        for sub in subscriptions.iter() {
            sub.invoke(&event, seq);
        }
        Ok(seq)
    }

    /// Open a queue that receives every publish from now on.
    pub(crate) fn open_buffer(&self) -> Receiver<Arc<T>> {
        let (tx, rx) = channel::unbounded();
        self.buffers.lock().push(tx);
        log::debug!("[bus] Buffered reader opened on '{}'", self.name);
        rx
    }

    pub(crate) fn subscribe(&self, sub: Subscription<T>) {
        let sub = Arc::new(sub);
        self.subscriptions.rcu(|current| {
            let mut next = Vec::with_capacity(current.len() + 1);
            next.extend(current.iter().cloned());
            next.push(Arc::clone(&sub));
            next
        });
    }

    fn remove_where<F>(&self, pred: F) -> usize
    where
        F: Fn(&Subscription<T>) -> bool,
    {
        let previous = self.subscriptions.rcu(|current| {
            current
                .iter()
                .filter(|s| !pred(s))
                .cloned()
                .collect::<Vec<_>>()
        });
        previous.iter().filter(|s| pred(s)).count()
    }
}

/// Type-erased operations the bus runs over every topic.
pub(crate) trait TopicControl: Send + Sync {
    fn type_name(&self) -> &'static str;
    fn unsubscribe(&self, id: u64) -> bool;
    fn unsubscribe_plugin(&self, plugin: PluginId) -> usize;
    fn stats(&self) -> TopicStats;
}

impl<T: Send + Sync + 'static> TopicControl for Topic<T> {
    fn type_name(&self) -> &'static str {
        self.type_name
    }

    fn unsubscribe(&self, id: u64) -> bool {
        self.remove_where(|s| s.id == id) > 0
    }

    fn unsubscribe_plugin(&self, plugin: PluginId) -> usize {
        self.remove_where(|s| s.plugin == plugin)
    }

    fn stats(&self) -> TopicStats {
        let subscriptions = self.subscriptions.load();
        // Queues of dropped readers linger until the next publish prunes them.
        let buffered_readers = self.buffers.lock().len();
        TopicStats {
            name: self.name.to_string(),
            type_name: self.type_name,
            published: self.sequence(),
            subscribers: subscriptions.len(),
            buffered_readers,
            callbacks_invoked: subscriptions.iter().map(|s| s.invocations()).sum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Callback;

    fn noop() -> Callback<u32> {
        Arc::new(|_: &Arc<u32>, _: u64| {})
    }

    #[test]
    fn test_latest_empty_before_put() {
        let topic = Topic::<u32>::new("t");
        assert!(topic.latest().is_none());
        assert_eq!(topic.sequence(), 0);
    }

    #[test]
    fn test_put_replaces_latest_and_counts() -> Result<()> {
        let topic = Topic::<u32>::new("t");
        assert_eq!(topic.put(Arc::new(1))?, 1);
        assert_eq!(topic.put(Arc::new(2))?, 2);
        assert_eq!(topic.latest().as_deref(), Some(&2));
        assert_eq!(topic.sequence(), 2);
        Ok(())
    }

    #[test]
    fn test_buffer_only_sees_later_puts() -> Result<()> {
        let topic = Topic::<u32>::new("t");
        topic.put(Arc::new(1))?;
        let rx = topic.open_buffer();
        topic.put(Arc::new(2))?;
        topic.put(Arc::new(3))?;
        let got: Vec<u32> = rx.try_iter().map(|e| *e).collect();
        assert_eq!(got, vec![2, 3]);
        Ok(())
    }

    #[test]
    fn test_dropped_buffer_is_pruned() -> Result<()> {
        let topic = Topic::<u32>::new("t");
        let rx = topic.open_buffer();
        assert_eq!(topic.stats().buffered_readers, 1);
        drop(rx);
        topic.put(Arc::new(1))?;
        assert_eq!(topic.stats().buffered_readers, 0);
        Ok(())
    }

    #[test]
    fn test_unsubscribe_plugin_removes_only_its_callbacks() {
        let topic = Topic::<u32>::new("t");
        topic.subscribe(Subscription::new(1, PluginId(1), noop()));
        topic.subscribe(Subscription::new(2, PluginId(2), noop()));
        topic.subscribe(Subscription::new(3, PluginId(1), noop()));

        assert_eq!(topic.unsubscribe_plugin(PluginId(1)), 2);
        assert_eq!(topic.stats().subscribers, 1);
        assert!(!topic.unsubscribe(1));
        assert!(topic.unsubscribe(2));
        assert_eq!(topic.stats().subscribers, 0);
    }
}
