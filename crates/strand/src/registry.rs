// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Service registry: one shared instance per service identity.
//!
//! Plugins never reference each other directly. A plugin that provides a
//! cross-cutting service (clock, display backend, ...) registers it here and
//! consumers look it up by identity, usually a trait object type.
//!
//! ```rust
//! use std::sync::Arc;
//! use strand::ServiceRegistry;
//!
//! trait Clock: Send + Sync {
//!     fn now_ns(&self) -> u64;
//! }
//!
//! struct FixedClock;
//! impl Clock for FixedClock {
//!     fn now_ns(&self) -> u64 { 42 }
//! }
//!
//! let services = ServiceRegistry::new();
//! services.register::<dyn Clock>(Arc::new(FixedClock))?;
//! assert_eq!(services.lookup::<dyn Clock>()?.now_ns(), 42);
//! # Ok::<(), strand::Error>(())
//! ```
//!
//! Load order is the caller's problem: looking up a service that has not
//! been registered yet fails with [`Error::NotRegistered`].

use crate::error::{Error, Result};
use parking_lot::RwLock;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

struct Entry {
    name: &'static str,
    /// Always holds an `Arc<S>` for the `S` keyed by this entry.
    instance: Box<dyn Any + Send + Sync>,
}

/// Thread-safe map from service identity to instance.
///
/// # Design
///
/// - Keyed by `TypeId` of the service identity
/// - Single `RwLock`; no user code runs while it is held
/// - No replace, no unregister: instances live as long as the registry
pub struct ServiceRegistry {
    services: RwLock<HashMap<TypeId, Entry>>,
}

impl ServiceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            services: RwLock::new(HashMap::new()),
        }
    }

    /// Register `instance` as the implementation of `S`.
    ///
    /// # Errors
    /// [`Error::AlreadyRegistered`] if `S` already has an implementation.
    pub fn register<S>(&self, instance: Arc<S>) -> Result<()>
    where
        S: ?Sized + Send + Sync + 'static,
    {
        let name = std::any::type_name::<S>();
        let mut services = self.services.write();
        if services.contains_key(&TypeId::of::<S>()) {
            return Err(Error::AlreadyRegistered(name));
        }
        log::debug!("[registry] Register {}", name);
        services.insert(
            TypeId::of::<S>(),
            Entry {
                name,
                instance: Box::new(instance),
            },
        );
        Ok(())
    }

    /// Look up the implementation of `S`.
    ///
    /// Every successful call returns a clone of the same `Arc`.
    ///
    /// # Errors
    /// [`Error::NotRegistered`] if nothing was registered for `S`.
    pub fn lookup<S>(&self) -> Result<Arc<S>>
    where
        S: ?Sized + Send + Sync + 'static,
    {
        let services = self.services.read();
        services
            .get(&TypeId::of::<S>())
            .and_then(|entry| entry.instance.downcast_ref::<Arc<S>>())
            .cloned()
            .ok_or(Error::NotRegistered(std::any::type_name::<S>()))
    }

    /// Whether an implementation of `S` is registered.
    pub fn has<S>(&self) -> bool
    where
        S: ?Sized + 'static,
    {
        self.services.read().contains_key(&TypeId::of::<S>())
    }

    /// Number of registered services.
    pub fn len(&self) -> usize {
        self.services.read().len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.services.read().is_empty()
    }

    /// Names of registered services, sorted.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.services.read().values().map(|e| e.name).collect();
        names.sort_unstable();
        names
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("services", &self.names())
            .finish()
    }
}
