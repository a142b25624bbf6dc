// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error type shared by every strand component.

use crate::pool::SlotState;

/// Errors returned by strand operations.
///
/// Grouped by how callers are expected to react: configuration errors abort
/// startup and capacity errors document a sizing contract. Slot misuse means
/// the caller broke the pool handoff protocol. Plugin errors belong to the
/// plugin that raised them; transport errors surface to the publisher.
///
/// # Example
///
/// ```rust
/// use strand::{Error, TopicBus};
///
/// let bus = TopicBus::new();
/// let _w = bus.writer::<u32>("imu").expect("first bind");
///
/// match bus.reader::<f64>("imu") {
///     Err(Error::TypeMismatch { topic, .. }) => assert_eq!(topic, "imu"),
///     _ => unreachable!(),
/// }
/// ```
#[derive(Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Topic already bound to another element type.
    TypeMismatch {
        /// Topic name.
        topic: String,
        /// Type the topic was bound to on first use.
        bound: &'static str,
        /// Type the caller asked for.
        requested: &'static str,
    },
    /// Service looked up before anyone registered it.
    NotRegistered(&'static str),
    /// Service registered twice.
    AlreadyRegistered(&'static str),
    /// Plugin name missing from the factory table.
    UnknownPlugin(String),
    /// Configuration value could not be parsed.
    InvalidConfig(String),

    // ========================================================================
    // Capacity Errors
    // ========================================================================
    /// Every slot of the buffer pool is in use.
    PoolExhausted {
        /// Number of slots in the pool.
        capacity: usize,
    },

    // ========================================================================
    // Slot Misuse Errors
    // ========================================================================
    /// Slot index outside the pool.
    InvalidSlot(usize),
    /// Slot is not in the state the operation requires.
    InvalidSlotState {
        /// Slot index.
        index: usize,
        /// State required by the operation.
        expected: SlotState,
        /// State the slot was actually in.
        actual: SlotState,
    },

    // ========================================================================
    // Plugin Errors
    // ========================================================================
    /// Failure raised by a plugin body.
    Plugin(String),
    /// Operation not valid in the current lifecycle state.
    InvalidState(String),

    // ========================================================================
    // Data / Transport Errors
    // ========================================================================
    /// Topic has no published event yet.
    NoData(String),
    /// Publish nested too deeply inside subscriber callbacks.
    DispatchDepthExceeded(String),
    /// Event could not be serialized or deserialized.
    SerializationError(String),
    /// Network backend failed to send.
    SendFailed(String),
    /// OS call failed (thread spawn, scheduler attributes).
    IoError(std::io::Error),
    /// Requested operation is not supported on this platform.
    Unsupported,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::TypeMismatch {
                topic,
                bound,
                requested,
            } => write!(
                f,
                "Type mismatch on topic '{}': holds {}, caller used {}",
                topic, bound, requested
            ),
            Error::NotRegistered(name) => {
                write!(f, "Attempted to lookup an unregistered service: {}", name)
            }
            Error::AlreadyRegistered(name) => write!(f, "Service already registered: {}", name),
            Error::UnknownPlugin(name) => write!(f, "Unknown plugin: {}", name),
            Error::InvalidConfig(msg) => write!(f, "Invalid configuration: {}", msg),
            Error::PoolExhausted { capacity } => {
                write!(f, "No free slot in buffer pool (capacity {})", capacity)
            }
            Error::InvalidSlot(index) => write!(f, "Invalid slot index: {}", index),
            Error::InvalidSlotState {
                index,
                expected,
                actual,
            } => write!(
                f,
                "Slot {} is {:?}, expected {:?}",
                index, actual, expected
            ),
            Error::Plugin(msg) => write!(f, "Plugin failure: {}", msg),
            Error::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            Error::NoData(topic) => write!(f, "No event on topic '{}'", topic),
            Error::DispatchDepthExceeded(topic) => {
                write!(f, "Re-entrant publish depth exceeded on topic '{}'", topic)
            }
            Error::SerializationError(msg) => write!(f, "Serialization failed: {}", msg),
            Error::SendFailed(msg) => write!(f, "Send failed: {}", msg),
            Error::IoError(e) => write!(f, "I/O error: {}", e),
            Error::Unsupported => write!(f, "Unsupported operation"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::IoError(e)
    }
}

impl Error {
    /// True for errors that must abort startup rather than be handled at runtime.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::TypeMismatch { .. }
                | Error::NotRegistered(_)
                | Error::AlreadyRegistered(_)
                | Error::UnknownPlugin(_)
                | Error::InvalidConfig(_)
        )
    }

    /// True when a slot pool call broke the acquire/release protocol.
    pub fn is_slot_misuse(&self) -> bool {
        matches!(self, Error::InvalidSlot(_) | Error::InvalidSlotState { .. })
    }
}

/// Convenient alias for results using the crate `Error`.
pub type Result<T> = core::result::Result<T, Error>;
