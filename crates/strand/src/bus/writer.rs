// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Local and networked writers.

use super::topic::Topic;
use crate::error::Result;
use crate::network::{NetworkBackend, Serializable};
use std::sync::Arc;

/// Publishes events to one topic.
///
/// # Example
///
/// ```rust
/// use strand::TopicBus;
///
/// let bus = TopicBus::new();
/// let writer = bus.writer::<f64>("temperature")?;
/// let reader = bus.reader::<f64>("temperature")?;
///
/// writer.put(21.5_f64)?;
/// assert_eq!(reader.get().as_deref(), Some(&21.5));
/// # Ok::<(), strand::Error>(())
/// ```
pub struct Writer<T> {
    topic: Arc<Topic<T>>,
}

impl<T: Send + Sync + 'static> Writer<T> {
    pub(crate) fn new(topic: Arc<Topic<T>>) -> Self {
        Self { topic }
    }

    /// Topic name.
    pub fn topic(&self) -> &str {
        self.topic.name()
    }

    /// Publish `event` and return its sequence number.
    ///
    /// Replaces the topic's latest event, appends to every buffered reader,
    /// then runs every subscriber callback on this thread in registration
    /// order. Returns once the last callback returned.
    ///
    /// Sequence numbers, the latest event and buffered queues follow one
    /// global publish order. Subscriber callbacks do not: they run after the
    /// topic lock is released, so two writers putting concurrently on the
    /// same topic may have their callbacks interleave, and a subscriber can
    /// see seq 2 before seq 1. Callers that need ordered callbacks across
    /// writers serialize their `put` calls themselves.
    ///
    /// # Errors
    /// [`Error::DispatchDepthExceeded`](crate::Error::DispatchDepthExceeded)
    /// when called from too deep a chain of subscriber callbacks.
    pub fn put(&self, event: impl Into<Arc<T>>) -> Result<u64> {
        self.topic.put(event.into())
    }
}

impl<T> Clone for Writer<T> {
    fn clone(&self) -> Self {
        Self {
            topic: Arc::clone(&self.topic),
        }
    }
}

/// Writer that also sends events to peers when the topic is networked.
pub struct NetworkWriter<T> {
    local: Writer<T>,
    backend: Arc<dyn NetworkBackend>,
}

impl<T: Serializable + Send + Sync + 'static> NetworkWriter<T> {
    pub(crate) fn new(local: Writer<T>, backend: Arc<dyn NetworkBackend>) -> Self {
        Self { local, backend }
    }

    /// Topic name.
    pub fn topic(&self) -> &str {
        self.local.topic()
    }

    /// Send `event` to peers (if networked), then publish it locally.
    ///
    /// # Errors
    /// Encoding or transport failure is returned as is; the event is then
    /// not published locally either.
    pub fn put(&self, event: impl Into<Arc<T>>) -> Result<u64> {
        let event = event.into();
        let topic = self.local.topic();
        if self.backend.is_topic_networked(topic) {
            let bytes = event.to_bytes()?;
            log::debug!("[bus] Sending {} bytes on '{}'", bytes.len(), topic);
            self.backend.topic_send(topic, bytes)?;
        }
        self.local.put(event)
    }
}
