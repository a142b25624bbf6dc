// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Runtime configuration.
//!
//! # Architecture
//!
//! - **Level 1 (Static)**: environment variable names, priority bounds
//! - **Level 2 (Startup)**: [`RuntimeConfig`], read once when the runtime
//!   is built, immutable afterwards
//! - **Level 3 (Plugin-visible)**: [`EnvStore`], a concurrent cache of
//!   environment variables plugins read and override while running
//!
//! # Environment
//!
//! | Variable                  | Values                                   | Default   |
//! |---------------------------|------------------------------------------|-----------|
//! | `STRAND_SCHEDULER`        | default, priority, manual, static, dynamic | default |
//! | `STRAND_FAILURE_POLICY`   | isolate, abort                           | isolate   |
//! | `STRAND_STRICT_SCHED`     | boolean                                  | false     |
//! | `STRAND_DEFAULT_PRIORITY` | 1..=99                                   | 10        |
//! | `STRAND_RUN_DURATION`     | seconds (float)                          | unbounded |
//! | `STRAND_LOG_LEVEL`        | debug, info, warn, error                 | info      |

use crate::error::{Error, Result};
use crate::logging::LogLevel;
use crate::sched::SchedulingPolicy;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;

/// Scheduling policy selector.
pub const ENV_SCHEDULER: &str = "STRAND_SCHEDULER";
/// Worker failure policy selector.
pub const ENV_FAILURE_POLICY: &str = "STRAND_FAILURE_POLICY";
/// Fail workers whose scheduling attributes cannot be applied.
pub const ENV_STRICT_SCHED: &str = "STRAND_STRICT_SCHED";
/// SCHED_FIFO priority for plugins that do not request one.
pub const ENV_DEFAULT_PRIORITY: &str = "STRAND_DEFAULT_PRIORITY";
/// Stop the runtime automatically after this many seconds.
pub const ENV_RUN_DURATION: &str = "STRAND_RUN_DURATION";
/// Level for the built-in logging backend.
pub const ENV_LOG_LEVEL: &str = "STRAND_LOG_LEVEL";

/// Lowest SCHED_FIFO priority on Linux.
pub const MIN_PRIORITY: i32 = 1;
/// Highest SCHED_FIFO priority on Linux.
pub const MAX_PRIORITY: i32 = 99;
/// Priority used when neither the plugin nor the environment picks one.
pub const DEFAULT_PRIORITY: i32 = 10;

/// What happens when a polling plugin's iteration fails or panics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Log, mark the plugin failed, keep the rest of the runtime running.
    #[default]
    Isolate,
    /// Log and abort the process.
    Abort,
}

impl FailurePolicy {
    /// Parse `isolate` or `abort`.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "isolate" => Some(FailurePolicy::Isolate),
            "abort" => Some(FailurePolicy::Abort),
            _ => None,
        }
    }
}

/// Startup configuration of a [`Runtime`](crate::Runtime).
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeConfig {
    /// OS scheduling of polling workers.
    pub scheduler: SchedulingPolicy,
    /// Reaction to a failing polling iteration.
    pub failure_policy: FailurePolicy,
    /// Treat scheduling attribute failures as worker failures.
    pub strict_sched: bool,
    /// SCHED_FIFO priority for plugins without their own.
    pub default_priority: i32,
    /// Automatic stop for [`Runtime::run`](crate::Runtime::run).
    pub run_duration: Option<Duration>,
    /// Level for [`logging::init_logger`](crate::logging::init_logger).
    pub log_level: LogLevel,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulingPolicy::Default,
            failure_policy: FailurePolicy::Isolate,
            strict_sched: false,
            default_priority: DEFAULT_PRIORITY,
            run_duration: None,
            log_level: LogLevel::Info,
        }
    }
}

impl RuntimeConfig {
    /// Read the configuration from the process environment.
    ///
    /// # Errors
    /// [`Error::InvalidConfig`] for values that are present but malformed.
    /// An unknown scheduler name is not an error; it selects the default.
    pub fn from_env() -> Result<Self> {
        Self::from_store(&EnvStore::new())
    }

    /// Read the configuration from `env`.
    ///
    /// # Errors
    /// See [`from_env`](Self::from_env).
    pub fn from_store(env: &EnvStore) -> Result<Self> {
        let scheduler = SchedulingPolicy::from_setting(env.get(ENV_SCHEDULER).as_deref());

        let failure_policy = match env.get(ENV_FAILURE_POLICY) {
            None => FailurePolicy::Isolate,
            Some(v) => FailurePolicy::parse(&v).ok_or_else(|| {
                Error::InvalidConfig(format!("{}={} (expected isolate|abort)", ENV_FAILURE_POLICY, v))
            })?,
        };

        let default_priority = env.get_i64(ENV_DEFAULT_PRIORITY, i64::from(DEFAULT_PRIORITY))?;
        if !(i64::from(MIN_PRIORITY)..=i64::from(MAX_PRIORITY)).contains(&default_priority) {
            return Err(Error::InvalidConfig(format!(
                "{}={} (expected {}..={})",
                ENV_DEFAULT_PRIORITY, default_priority, MIN_PRIORITY, MAX_PRIORITY
            )));
        }

        let run_duration = match env.get(ENV_RUN_DURATION) {
            None => None,
            Some(_) => {
                let secs = env.get_f64(ENV_RUN_DURATION, 0.0)?;
                Some(Duration::try_from_secs_f64(secs).map_err(|_| {
                    Error::InvalidConfig(format!("{}={}", ENV_RUN_DURATION, secs))
                })?)
            }
        };

        let log_level = match env.get(ENV_LOG_LEVEL) {
            None => LogLevel::Info,
            Some(v) => LogLevel::parse(&v).ok_or_else(|| {
                Error::InvalidConfig(format!("{}={}", ENV_LOG_LEVEL, v))
            })?,
        };

        let config = Self {
            scheduler,
            failure_policy,
            strict_sched: env.get_bool(ENV_STRICT_SCHED, false),
            default_priority: default_priority as i32,
            run_duration,
            log_level,
        };
        log::debug!("[config] {:?}", config);
        Ok(config)
    }

    /// Override the scheduling policy.
    pub fn with_scheduler(mut self, scheduler: SchedulingPolicy) -> Self {
        self.scheduler = scheduler;
        self
    }

    /// Override the failure policy.
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Override strict scheduling.
    pub fn with_strict_sched(mut self, strict: bool) -> Self {
        self.strict_sched = strict;
        self
    }

    /// Override the default priority.
    pub fn with_default_priority(mut self, priority: i32) -> Self {
        self.default_priority = priority;
        self
    }

    /// Override the automatic stop.
    pub fn with_run_duration(mut self, duration: Option<Duration>) -> Self {
        self.run_duration = duration;
        self
    }
}

/// Concurrent cache of environment variables.
///
/// Lookups check the cache first and fall back to the process environment,
/// caching what they find. [`set`](Self::set) only changes the cache: the
/// process environment is never written.
#[derive(Debug)]
pub struct EnvStore {
    vars: DashMap<Arc<str>, Arc<str>>,
    process_fallback: bool,
}

impl Default for EnvStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EnvStore {
    /// Empty cache backed by the process environment.
    pub fn new() -> Self {
        Self {
            vars: DashMap::new(),
            process_fallback: true,
        }
    }

    /// Empty store that never reads the process environment.
    pub fn isolated() -> Self {
        Self {
            vars: DashMap::new(),
            process_fallback: false,
        }
    }

    /// Value of `var`; empty values count as unset.
    pub fn get(&self, var: &str) -> Option<Arc<str>> {
        if let Some(value) = self.vars.get(var) {
            return Some(Arc::clone(value.value()));
        }
        if !self.process_fallback {
            return None;
        }
        let value: Arc<str> = Arc::from(std::env::var(var).ok()?.as_str());
        if value.is_empty() {
            return None;
        }
        self.vars.insert(Arc::from(var), Arc::clone(&value));
        Some(value)
    }

    /// Value of `var`, or `default`.
    pub fn get_or(&self, var: &str, default: &str) -> String {
        self.get(var).map_or_else(|| default.to_string(), |v| v.to_string())
    }

    /// Boolean value of `var`.
    ///
    /// Integers are true when positive; otherwise `yes`, `y`, `true`, `on`
    /// (any case) are true and everything else is false.
    pub fn get_bool(&self, var: &str, default: bool) -> bool {
        let Some(value) = self.get(var) else {
            return default;
        };
        let value = value.trim();
        if let Ok(n) = value.parse::<i64>() {
            return n > 0;
        }
        ["yes", "y", "true", "on"]
            .iter()
            .any(|yes| value.eq_ignore_ascii_case(yes))
    }

    /// Integer value of `var`, or `default` when unset.
    ///
    /// # Errors
    /// [`Error::InvalidConfig`] if set but not an integer.
    pub fn get_i64(&self, var: &str, default: i64) -> Result<i64> {
        match self.get(var) {
            None => Ok(default),
            Some(v) => v
                .trim()
                .parse()
                .map_err(|_| Error::InvalidConfig(format!("{}={} (expected integer)", var, v))),
        }
    }

    /// Float value of `var`, or `default` when unset.
    ///
    /// # Errors
    /// [`Error::InvalidConfig`] if set but not a number.
    pub fn get_f64(&self, var: &str, default: f64) -> Result<f64> {
        match self.get(var) {
            None => Ok(default),
            Some(v) => v
                .trim()
                .parse()
                .map_err(|_| Error::InvalidConfig(format!("{}={} (expected number)", var, v))),
        }
    }

    /// Override `var` for every reader of this store.
    pub fn set(&self, var: &str, value: &str) {
        self.vars.insert(Arc::from(var), Arc::from(value));
    }

    /// Names currently cached, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.vars.iter().map(|e| e.key().to_string()).collect();
        names.sort();
        names
    }
}
