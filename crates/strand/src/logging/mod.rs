// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Installable logging backend.
//!
//! strand logs through the `log` facade with `[component]` prefixes:
//! `[bus]`, `[runtime]`, `[worker]`, `[sched]`, `[pool]`, `[config]`.
//! Applications that already install a `log` backend need nothing from this
//! module; others can install a console or file sink:
//!
//! ```rust
//! use strand::logging::{init_logger, flush_logger, ConsoleOutput, LogLevel};
//! use std::sync::Arc;
//!
//! init_logger(Arc::new(ConsoleOutput::new(LogLevel::Debug)), LogLevel::Debug);
//! log::debug!("[app] pipeline configured");
//! flush_logger()?;
//! # Ok::<(), std::io::Error>(())
//! ```

mod logger;
mod output;

pub use logger::{flush_logger, init_logger};
pub use output::{ConsoleOutput, FileOutput, LogLevel, Output};
