// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Networked topic contract.
//!
//! The bus only needs two things to publish an event beyond the process:
//! an event type that turns into bytes and back ([`Serializable`]) and a
//! transport that knows which topics leave the process ([`NetworkBackend`]).
//! The wire encoding and the transport itself are supplied by the embedding
//! application.
//!
//! [`LoopbackBackend`] is an in-process backend: sent messages are queued
//! per topic and can be read back, which is how a single process exercises
//! the networked path end to end.

use crate::error::{Error, Result};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// Event type that can cross a process boundary.
pub trait Serializable: Sized {
    /// Encode into a byte sequence.
    ///
    /// # Errors
    /// [`Error::SerializationError`] if the value cannot be encoded.
    fn to_bytes(&self) -> Result<Vec<u8>>;

    /// Rebuild from bytes produced by [`to_bytes`](Self::to_bytes).
    ///
    /// # Errors
    /// [`Error::SerializationError`] on malformed input.
    fn from_bytes(bytes: &[u8]) -> Result<Self>;
}

/// Raw payloads pass through untouched.
impl Serializable for Vec<u8> {
    fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(self.clone())
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(bytes.to_vec())
    }
}

impl Serializable for String {
    fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(self.as_bytes().to_vec())
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        String::from_utf8(bytes.to_vec()).map_err(|e| Error::SerializationError(e.to_string()))
    }
}

/// How the payload of a networked topic is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SerializationMethod {
    /// The event type's own [`Serializable`] encoding.
    #[default]
    Native,
    /// Payload is already a byte or text message.
    Raw,
}

/// Per-topic network configuration handed to the backend on creation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopicConfig {
    /// Payload encoding.
    pub serialization: SerializationMethod,
}

/// Transport for networked topics.
///
/// Implementations must be thread-safe: any plugin thread may publish.
pub trait NetworkBackend: Send + Sync {
    /// Called when a network writer is created for `topic`.
    fn topic_create(&self, topic: &str, config: TopicConfig);

    /// Whether `topic` is sent to peers.
    fn is_topic_networked(&self, topic: &str) -> bool;

    /// Send one encoded message. May block on the transport.
    ///
    /// # Errors
    /// [`Error::SendFailed`] on transport failure; the bus does not retry.
    fn topic_send(&self, topic: &str, message: Vec<u8>) -> Result<()>;

    /// Oldest received message, without removing it.
    fn topic_get(&self, topic: &str) -> Option<Arc<Vec<u8>>>;

    /// Oldest received message, removed from the queue.
    fn topic_dequeue(&self, topic: &str) -> Option<Arc<Vec<u8>>>;
}

/// In-process backend: every sent message lands in its topic's inbox.
pub struct LoopbackBackend {
    networked: DashMap<String, TopicConfig>,
    inbox: DashMap<String, Mutex<VecDeque<Arc<Vec<u8>>>>>,
}

impl LoopbackBackend {
    /// Create a backend with no networked topics.
    pub fn new() -> Self {
        Self {
            networked: DashMap::new(),
            inbox: DashMap::new(),
        }
    }

    /// Configuration of a networked topic.
    pub fn topic_config(&self, topic: &str) -> Option<TopicConfig> {
        self.networked.get(topic).map(|c| c.value().clone())
    }

    /// Messages waiting in `topic`'s inbox.
    pub fn pending(&self, topic: &str) -> usize {
        self.inbox.get(topic).map_or(0, |q| q.lock().len())
    }
}

impl Default for LoopbackBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkBackend for LoopbackBackend {
    fn topic_create(&self, topic: &str, config: TopicConfig) {
        log::debug!("[network] Topic '{}' networked ({:?})", topic, config);
        self.networked.insert(topic.to_string(), config);
        self.inbox.entry(topic.to_string()).or_default();
    }

    fn is_topic_networked(&self, topic: &str) -> bool {
        self.networked.contains_key(topic)
    }

    fn topic_send(&self, topic: &str, message: Vec<u8>) -> Result<()> {
        let queue = self
            .inbox
            .get(topic)
            .ok_or_else(|| Error::SendFailed(format!("topic '{}' is not networked", topic)))?;
        queue.lock().push_back(Arc::new(message));
        Ok(())
    }

    fn topic_get(&self, topic: &str) -> Option<Arc<Vec<u8>>> {
        self.inbox.get(topic)?.lock().front().cloned()
    }

    fn topic_dequeue(&self, topic: &str) -> Option<Arc<Vec<u8>>> {
        self.inbox.get(topic)?.lock().pop_front()
    }
}
