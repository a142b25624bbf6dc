// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Global `log` backend.
//!
//! Installed once per process; the first [`init_logger`] call wins.

use super::output::{LogLevel, Output};
use std::io;
use std::sync::{Arc, OnceLock};

static LOGGER: OnceLock<GlobalLogger> = OnceLock::new();

/// Routes `log` records to one [`Output`].
struct GlobalLogger {
    output: Arc<dyn Output>,
    level_filter: LogLevel,
}

impl log::Log for GlobalLogger {
    fn enabled(&self, metadata: &log::Metadata<'_>) -> bool {
        LogLevel::from(metadata.level()) >= self.level_filter
    }

    fn log(&self, record: &log::Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        // Nowhere to report a failing log sink.
        let _ = self
            .output
            .write(record.level().into(), &record.args().to_string());
    }

    fn flush(&self) {
        let _ = self.output.flush();
    }
}

/// Install `output` as the process-wide `log` backend.
///
/// Returns false if a logger (this one or another `log` backend) was
/// already installed; the earlier one stays active.
///
/// # Example
/// ```rust
/// use std::sync::Arc;
/// use strand::logging::{init_logger, ConsoleOutput, LogLevel};
///
/// init_logger(Arc::new(ConsoleOutput::new(LogLevel::Debug)), LogLevel::Info);
/// log::info!("[app] started");
/// ```
pub fn init_logger(output: Arc<dyn Output>, level: LogLevel) -> bool {
    let mut created = false;
    let logger = LOGGER.get_or_init(|| {
        created = true;
        GlobalLogger {
            output,
            level_filter: level,
        }
    });
    if !created {
        return false;
    }
    match log::set_logger(logger) {
        Ok(()) => {
            log::set_max_level(level.to_filter());
            true
        }
        Err(_) => false,
    }
}

/// Flush the installed output. No-op before [`init_logger`].
pub fn flush_logger() -> io::Result<()> {
    match LOGGER.get() {
        Some(logger) => logger.output.flush(),
        None => Ok(()),
    }
}
