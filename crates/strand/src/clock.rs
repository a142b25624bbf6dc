// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Relative clock shared by every plugin of a runtime.
//!
//! Timestamps are durations since the runtime signaled ready. The runtime
//! registers one [`RelativeClock`] and starts it right before releasing the
//! polling workers, so the first sample any plugin stamps is close to zero.
//!
//! Readings come from the monotonic clock (`CLOCK_MONOTONIC` on Linux), so
//! [`RelativeClock::absolute_ns`] lines up with timestamps taken by drivers
//! or other processes on the same host.

use crate::error::{Error, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Monotonic time since the clock was started.
///
/// # Example
///
/// ```rust
/// use strand::RelativeClock;
///
/// let clock = RelativeClock::new();
/// assert!(clock.now().is_err());
///
/// clock.start()?;
/// let t0 = clock.now()?;
/// let t1 = clock.now()?;
/// assert!(t1 >= t0);
/// # Ok::<(), strand::Error>(())
/// ```
#[derive(Debug, Default)]
pub struct RelativeClock {
    /// Monotonic reading at start, 0 while stopped.
    start_ns: AtomicU64,
}

impl RelativeClock {
    /// Create a clock that is not started yet.
    pub fn new() -> Self {
        Self {
            start_ns: AtomicU64::new(0),
        }
    }

    /// Start the clock. All later readings are relative to this point.
    ///
    /// Only the first call sets the origin; returns whether this call did.
    ///
    /// # Errors
    /// [`Error::IoError`] if the monotonic clock cannot be read.
    pub fn start(&self) -> Result<bool> {
        let origin = monotonic_ns()?.max(1);
        let started = self
            .start_ns
            .compare_exchange(0, origin, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if started {
            log::debug!("[clock] Started at {} ns", origin);
        }
        Ok(started)
    }

    /// Whether [`start`](Self::start) was called.
    pub fn is_started(&self) -> bool {
        self.start_ns.load(Ordering::Acquire) != 0
    }

    /// Time elapsed since start.
    ///
    /// # Errors
    /// [`Error::InvalidState`] before start, [`Error::IoError`] if the
    /// monotonic clock cannot be read.
    pub fn now(&self) -> Result<Duration> {
        let origin = self.origin()?;
        Ok(Duration::from_nanos(monotonic_ns()?.saturating_sub(origin)))
    }

    /// Monotonic reading at start, `None` before start.
    pub fn start_time(&self) -> Option<Duration> {
        match self.start_ns.load(Ordering::Acquire) {
            0 => None,
            ns => Some(Duration::from_nanos(ns)),
        }
    }

    /// Convert a relative timestamp to monotonic nanoseconds.
    ///
    /// # Errors
    /// [`Error::InvalidState`] before start.
    pub fn absolute_ns(&self, relative: Duration) -> Result<u64> {
        let origin = self.origin()?;
        let relative = u64::try_from(relative.as_nanos()).unwrap_or(u64::MAX);
        Ok(origin.saturating_add(relative))
    }

    fn origin(&self) -> Result<u64> {
        match self.start_ns.load(Ordering::Acquire) {
            0 => Err(Error::InvalidState("clock read before start".to_string())),
            ns => Ok(ns),
        }
    }
}

/// Period of a source running at `hz`.
///
/// # Errors
/// [`Error::InvalidConfig`] unless `hz` is finite and positive.
pub fn period_from_hz(hz: f64) -> Result<Duration> {
    if !hz.is_finite() || hz <= 0.0 {
        return Err(Error::InvalidConfig(format!("frequency {} Hz", hz)));
    }
    Ok(Duration::from_secs_f64(1.0 / hz))
}

#[cfg(target_os = "linux")]
fn monotonic_ns() -> Result<u64> {
    // SAFETY: timespec is plain data; all-zero is a valid value.
    let mut ts: libc::timespec = unsafe { std::mem::zeroed() };
    // SAFETY: &mut ts points to a properly sized timespec for the call.
    let ret = unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
    if ret < 0 {
        return Err(Error::IoError(std::io::Error::last_os_error()));
    }
    Ok(ts.tv_sec as u64 * 1_000_000_000 + ts.tv_nsec as u64)
}

#[cfg(not(target_os = "linux"))]
fn monotonic_ns() -> Result<u64> {
    use std::sync::OnceLock;
    use std::time::Instant;

    static BASE: OnceLock<Instant> = OnceLock::new();
    let base = BASE.get_or_init(Instant::now);
    Ok(u64::try_from(base.elapsed().as_nanos()).unwrap_or(u64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_before_start_is_invalid_state() {
        let clock = RelativeClock::new();
        assert!(!clock.is_started());
        assert!(clock.start_time().is_none());
        assert!(matches!(clock.now(), Err(Error::InvalidState(_))));
        assert!(matches!(
            clock.absolute_ns(Duration::from_millis(1)),
            Err(Error::InvalidState(_))
        ));
    }

    #[test]
    fn test_readings_are_relative_and_monotonic() -> Result<()> {
        let clock = RelativeClock::new();
        assert!(clock.start()?);
        assert!(clock.is_started());

        let first = clock.now()?;
        std::thread::sleep(Duration::from_millis(5));
        let second = clock.now()?;
        assert!(second >= first + Duration::from_millis(5));
        assert!(first < Duration::from_secs(1), "origin too old: {:?}", first);
        Ok(())
    }

    #[test]
    fn test_second_start_keeps_origin() -> Result<()> {
        let clock = RelativeClock::new();
        clock.start()?;
        let origin = clock.start_time();
        std::thread::sleep(Duration::from_millis(2));
        assert!(!clock.start()?);
        assert_eq!(clock.start_time(), origin);
        Ok(())
    }

    #[test]
    fn test_absolute_ns_adds_origin() -> Result<()> {
        let clock = RelativeClock::new();
        clock.start()?;
        let origin = clock.start_time().map(|d| d.as_nanos() as u64);
        assert_eq!(
            Some(clock.absolute_ns(Duration::from_micros(250))?),
            origin.map(|ns| ns + 250_000)
        );
        assert!(clock.absolute_ns(clock.now()?)? >= origin.unwrap_or(0));
        Ok(())
    }

    #[test]
    fn test_period_from_hz() -> Result<()> {
        assert_eq!(period_from_hz(200.0)?, Duration::from_millis(5));
        assert_eq!(period_from_hz(1.0)?, Duration::from_secs(1));
        assert!(matches!(period_from_hz(0.0), Err(Error::InvalidConfig(_))));
        assert!(matches!(period_from_hz(f64::NAN), Err(Error::InvalidConfig(_))));
        Ok(())
    }
}
