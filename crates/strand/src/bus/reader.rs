// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Latest-value and buffered readers.

use super::topic::Topic;
use crate::error::{Error, Result};
use crossbeam::channel::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

/// Reads the most recent event of a topic.
///
/// Cheap to clone; every clone sees the same topic. Reading never blocks
/// and never observes a partially published event.
pub struct Reader<T> {
    topic: Arc<Topic<T>>,
}

impl<T: Send + Sync + 'static> Reader<T> {
    pub(crate) fn new(topic: Arc<Topic<T>>) -> Self {
        Self { topic }
    }

    /// Topic name.
    pub fn topic(&self) -> &str {
        self.topic.name()
    }

    /// Latest event, or `None` if nothing was published yet.
    #[inline]
    pub fn get(&self) -> Option<Arc<T>> {
        self.topic.latest()
    }

    /// Latest event.
    ///
    /// # Errors
    /// [`Error::NoData`] if nothing was published yet.
    pub fn get_required(&self) -> Result<Arc<T>> {
        self.get()
            .ok_or_else(|| Error::NoData(self.topic.name().to_string()))
    }

    /// Owned copy of the latest event, for callers that need to mutate it.
    pub fn get_cloned(&self) -> Option<T>
    where
        T: Clone,
    {
        self.get().map(|event| (*event).clone())
    }

    /// Sequence number of the latest publish (0 before any).
    pub fn sequence(&self) -> u64 {
        self.topic.sequence()
    }
}

impl<T> Clone for Reader<T> {
    fn clone(&self) -> Self {
        Self {
            topic: Arc::clone(&self.topic),
        }
    }
}

/// Queue of every event published after the reader was created.
///
/// The queue is unbounded: a reader that never dequeues grows without
/// limit. Drop the reader to detach its queue from the topic.
pub struct BufferedReader<T> {
    topic: Arc<Topic<T>>,
    queue: Receiver<Arc<T>>,
    dequeued: u64,
}

impl<T: Send + Sync + 'static> BufferedReader<T> {
    pub(crate) fn new(topic: Arc<Topic<T>>) -> Self {
        let queue = topic.open_buffer();
        Self {
            topic,
            queue,
            dequeued: 0,
        }
    }

    /// Topic name.
    pub fn topic(&self) -> &str {
        self.topic.name()
    }

    /// Oldest undelivered event, or `None` if the queue is empty. Never blocks.
    pub fn dequeue(&mut self) -> Option<Arc<T>> {
        let event = self.queue.try_recv().ok()?;
        self.dequeued += 1;
        Some(event)
    }

    /// Like [`dequeue`](Self::dequeue) but waits up to `timeout` for an event.
    pub fn dequeue_timeout(&mut self, timeout: Duration) -> Option<Arc<T>> {
        match self.queue.recv_timeout(timeout) {
            Ok(event) => {
                self.dequeued += 1;
                Some(event)
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Events waiting in the queue.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// True when no event is waiting.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Events dequeued so far through this reader.
    pub fn dequeued(&self) -> u64 {
        self.dequeued
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reader_nullable_then_required() -> Result<()> {
        let topic = Arc::new(Topic::<String>::new("names"));
        let reader = Reader::new(Arc::clone(&topic));

        assert!(reader.get().is_none());
        assert!(matches!(reader.get_required(), Err(Error::NoData(t)) if t == "names"));

        topic.put(Arc::new("a".to_string()))?;
        assert_eq!(reader.get_required()?.as_str(), "a");
        assert_eq!(reader.get_cloned().as_deref(), Some("a"));
        assert_eq!(reader.sequence(), 1);
        Ok(())
    }

    #[test]
    fn test_buffered_reader_fifo() -> Result<()> {
        let topic = Arc::new(Topic::<u64>::new("ticks"));
        let mut reader = BufferedReader::new(Arc::clone(&topic));
        assert!(reader.is_empty());

        for i in 1..=3 {
            topic.put(Arc::new(i))?;
        }
        assert_eq!(reader.len(), 3);
        assert_eq!(reader.dequeue().as_deref(), Some(&1));
        assert_eq!(reader.dequeue().as_deref(), Some(&2));
        assert_eq!(reader.dequeue().as_deref(), Some(&3));
        assert!(reader.dequeue().is_none());
        assert_eq!(reader.dequeued(), 3);
        Ok(())
    }

    #[test]
    fn test_dequeue_timeout_empty() {
        let topic = Arc::new(Topic::<u64>::new("ticks"));
        let mut reader = BufferedReader::new(topic);
        assert!(reader.dequeue_timeout(Duration::from_millis(5)).is_none());
    }
}
