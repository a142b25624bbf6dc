// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Worker thread scheduling policies and OS thread attributes.
//!
//! The policy is picked once per runtime and only touches OS attributes of
//! polling workers (real-time priority, CPU affinity). It never changes
//! what a plugin's loop does.
//!
//! Real-time priorities need `CAP_SYS_NICE` (or root) on Linux. Without it
//! `sched_setscheduler` fails with `EPERM`; the runtime logs that and keeps
//! going unless strict scheduling is configured.

use crate::error::{Error, Result};
use std::fmt;

/// How worker threads are placed on the OS scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulingPolicy {
    /// Leave threads alone.
    #[default]
    Default,
    /// SCHED_FIFO with the plugin's priority.
    Priority,
    /// Leave threads alone; plugins set their own attributes.
    Manual,
    /// Pin each worker to one core, round-robin in load order.
    Static,
    /// SCHED_FIFO, priority adjustable while running.
    Dynamic,
}

impl SchedulingPolicy {
    /// Parse a policy name. Unknown names yield `None`.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "default" => Some(SchedulingPolicy::Default),
            "priority" => Some(SchedulingPolicy::Priority),
            "manual" => Some(SchedulingPolicy::Manual),
            "static" => Some(SchedulingPolicy::Static),
            "dynamic" => Some(SchedulingPolicy::Dynamic),
            _ => None,
        }
    }

    /// Policy from an optional setting; absent or unknown means `Default`.
    pub fn from_setting(value: Option<&str>) -> Self {
        match value {
            None => SchedulingPolicy::Default,
            Some(v) => Self::parse(v).unwrap_or_else(|| {
                log::warn!("[sched] Unknown scheduler '{}', using default", v);
                SchedulingPolicy::Default
            }),
        }
    }

    /// True for the policies that put workers under SCHED_FIFO.
    pub fn is_realtime(self) -> bool {
        matches!(self, SchedulingPolicy::Priority | SchedulingPolicy::Dynamic)
    }
}

impl fmt::Display for SchedulingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SchedulingPolicy::Default => "default",
            SchedulingPolicy::Priority => "priority",
            SchedulingPolicy::Manual => "manual",
            SchedulingPolicy::Static => "static",
            SchedulingPolicy::Dynamic => "dynamic",
        };
        f.write_str(name)
    }
}

/// Apply `policy` to the calling worker thread.
///
/// `load_index` is the plugin's position among polling plugins and picks
/// the core under [`SchedulingPolicy::Static`].
pub(crate) fn apply(policy: SchedulingPolicy, priority: i32, load_index: usize) -> Result<()> {
    match policy {
        SchedulingPolicy::Default | SchedulingPolicy::Manual => Ok(()),
        SchedulingPolicy::Priority | SchedulingPolicy::Dynamic => set_current_priority(priority),
        SchedulingPolicy::Static => set_current_affinity(load_index % available_cores()),
    }
}

/// Number of cores usable by this process (at least 1).
pub fn available_cores() -> usize {
    std::thread::available_parallelism().map_or(1, |n| n.get())
}

/// Put the calling thread under SCHED_FIFO at `priority`.
///
/// # Errors
/// [`Error::InvalidConfig`] if `priority` is outside the SCHED_FIFO range,
/// [`Error::IoError`] if the kernel refuses, [`Error::Unsupported`] off Linux.
pub fn set_current_priority(priority: i32) -> Result<()> {
    set_thread_priority(0, priority)
}

#[cfg(target_os = "linux")]
mod os {
    use super::*;
    use std::mem;

    pub fn current_tid() -> Result<i32> {
        // SAFETY: gettid takes no arguments and cannot fail.
        let tid = unsafe { libc::syscall(libc::SYS_gettid) };
        Ok(tid as i32)
    }

    pub fn set_thread_priority(tid: i32, priority: i32) -> Result<()> {
        // SAFETY: plain queries on a constant policy value.
        let (min, max) = unsafe {
            (
                libc::sched_get_priority_min(libc::SCHED_FIFO),
                libc::sched_get_priority_max(libc::SCHED_FIFO),
            )
        };
        if priority < min || priority > max {
            return Err(Error::InvalidConfig(format!(
                "SCHED_FIFO priority {} outside {}..={}",
                priority, min, max
            )));
        }

        let param = libc::sched_param {
            sched_priority: priority,
        };
        // SAFETY:
        // - param is a valid, initialized sched_param living for the call
        // - tid 0 designates the calling thread; other tids are checked by the kernel
        let ret = unsafe { libc::sched_setscheduler(tid, libc::SCHED_FIFO, &param) };
        if ret != 0 {
            return Err(Error::IoError(std::io::Error::last_os_error()));
        }
        Ok(())
    }

    pub fn set_current_affinity(core: usize) -> Result<()> {
        if core >= libc::CPU_SETSIZE as usize {
            return Err(Error::InvalidConfig(format!("core {} out of range", core)));
        }
        // SAFETY:
        // - cpu_set_t is plain data; all-zero is the empty set
        // - core < CPU_SETSIZE was checked above, so CPU_SET stays in bounds
        // - pid 0 designates the calling thread
        let ret = unsafe {
            let mut cpu_set: libc::cpu_set_t = mem::zeroed();
            libc::CPU_SET(core, &mut cpu_set);
            libc::sched_setaffinity(0, mem::size_of::<libc::cpu_set_t>(), &cpu_set)
        };
        if ret != 0 {
            return Err(Error::IoError(std::io::Error::last_os_error()));
        }
        Ok(())
    }
}

#[cfg(not(target_os = "linux"))]
mod os {
    use super::*;

    pub fn current_tid() -> Result<i32> {
        Err(Error::Unsupported)
    }

    pub fn set_thread_priority(_tid: i32, _priority: i32) -> Result<()> {
        Err(Error::Unsupported)
    }

    pub fn set_current_affinity(_core: usize) -> Result<()> {
        Err(Error::Unsupported)
    }
}

/// Kernel thread id of the calling thread.
///
/// # Errors
/// [`Error::Unsupported`] off Linux.
pub fn current_tid() -> Result<i32> {
    os::current_tid()
}

/// Put thread `tid` under SCHED_FIFO at `priority` (`tid` 0 = caller).
///
/// # Errors
/// See [`set_current_priority`].
pub fn set_thread_priority(tid: i32, priority: i32) -> Result<()> {
    os::set_thread_priority(tid, priority)
}

/// Pin the calling thread to `core`.
///
/// # Errors
/// [`Error::InvalidConfig`] for an out-of-range core, [`Error::IoError`] if
/// the kernel refuses, [`Error::Unsupported`] off Linux.
pub fn set_current_affinity(core: usize) -> Result<()> {
    os::set_current_affinity(core)
}
