// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Sensor pipeline demo
//!
//! An IMU plugin publishes samples on a topic, a filter plugin reacts to them
//! synchronously, and a camera hands frames to a renderer through a slot
//! pool registered as a shared service. The filter also mirrors its output
//! on a networked topic backed by the loopback transport.
//!
//! ```text
//! cargo run -p strand --example sensor_pipeline
//! STRAND_RUN_DURATION=2 STRAND_LOG_LEVEL=debug cargo run -p strand --example sensor_pipeline
//! ```

#![allow(clippy::uninlined_format_args)]
#![allow(clippy::cast_precision_loss)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use strand::clock::period_from_hz;
use strand::logging::{flush_logger, init_logger, ConsoleOutput};
use strand::{
    FactoryTable, LoopbackBackend, NetworkBackend, Plugin, PluginContext, PluginKind,
    PollingPlugin, Runtime, RuntimeConfig, SkipOption, SlotPool, TopicConfig, Writer,
};

#[derive(Debug, Clone, Copy)]
struct ImuSample {
    stamp: u64,
    accel_z: f64,
}

struct Frame {
    id: u64,
    pixels: Vec<u8>,
}

/// 200 Hz IMU.
struct Imu {
    writer: Writer<ImuSample>,
    period: Duration,
    next_due: Instant,
    stamp: u64,
}

impl PollingPlugin for Imu {
    fn should_skip(&mut self) -> SkipOption {
        if Instant::now() >= self.next_due {
            SkipOption::Run
        } else {
            SkipOption::SkipAndYield
        }
    }

    fn one_iteration(&mut self) -> strand::Result<()> {
        self.next_due += self.period;
        self.stamp += 1;
        let wobble = (self.stamp as f64 * 0.1).sin() * 0.05;
        self.writer.put(ImuSample {
            stamp: self.stamp,
            accel_z: 9.81 + wobble,
        })?;
        Ok(())
    }
}

/// Low-pass filter running inside the IMU's publish.
struct Filter {
    ctx: PluginContext,
    backend: Arc<dyn NetworkBackend>,
}

impl Plugin for Filter {
    fn start(&mut self) -> strand::Result<()> {
        let out = self.ctx.bus().network_writer::<String>(
            "imu/filtered",
            Arc::clone(&self.backend),
            TopicConfig::default(),
        )?;
        let state = parking_lot::Mutex::new(9.81_f64);
        self.ctx
            .bus()
            .schedule(self.ctx.id(), "imu", move |sample: &Arc<ImuSample>, _| {
                let mut filtered = state.lock();
                *filtered = 0.9 * *filtered + 0.1 * sample.accel_z;
                if sample.stamp % 50 == 0 {
                    let line = format!("t={} az={:.4}", sample.stamp, *filtered);
                    if let Err(e) = out.put(line) {
                        log::warn!("[filter] {}", e);
                    }
                }
            })?;
        Ok(())
    }
}

/// 30 Hz camera filling pool slots.
struct Camera {
    pool: Arc<SlotPool<Frame>>,
    next_due: Instant,
    frame_id: u64,
}

impl PollingPlugin for Camera {
    fn should_skip(&mut self) -> SkipOption {
        if Instant::now() >= self.next_due {
            SkipOption::Run
        } else {
            SkipOption::SkipAndYield
        }
    }

    fn one_iteration(&mut self) -> strand::Result<()> {
        self.next_due += Duration::from_millis(33);
        self.frame_id += 1;
        let slot = self.pool.src_acquire()?;
        self.pool.src_release(
            slot,
            Frame {
                id: self.frame_id,
                pixels: vec![(self.frame_id % 256) as u8; 64 * 48],
            },
        )?;
        Ok(())
    }
}

/// Consumes the newest camera frame whenever one shows up.
struct Renderer {
    pool: Arc<SlotPool<Frame>>,
    last_seen: Option<usize>,
    rendered: Arc<AtomicU64>,
}

impl PollingPlugin for Renderer {
    fn one_iteration(&mut self) -> strand::Result<()> {
        match self.pool.consumer_acquire(self.last_seen) {
            Some((slot, frame)) => {
                let brightness: u64 = frame.pixels.iter().map(|p| u64::from(*p)).sum();
                log::debug!("[renderer] frame {} brightness {}", frame.id, brightness);
                self.rendered.fetch_add(1, Ordering::Relaxed);
                self.pool.consumer_release(slot)?;
                self.last_seen = Some(slot);
            }
            None => std::thread::sleep(Duration::from_millis(2)),
        }
        Ok(())
    }
}

fn main() -> strand::Result<()> {
    let config = RuntimeConfig::from_env()?;
    init_logger(Arc::new(ConsoleOutput::new(config.log_level)), config.log_level);
    let run_for = config.run_duration.unwrap_or(Duration::from_secs(1));

    let backend: Arc<dyn NetworkBackend> = Arc::new(LoopbackBackend::new());
    let rendered = Arc::new(AtomicU64::new(0));

    let mut plugins = FactoryTable::new();
    plugins
        .register("imu", |ctx| {
            Ok(PluginKind::polling(Imu {
                writer: ctx.bus().writer("imu")?,
                period: period_from_hz(200.0)?,
                next_due: Instant::now(),
                stamp: 0,
            }))
        })?
        .register("filter", {
            let backend = Arc::clone(&backend);
            move |ctx: &PluginContext| -> strand::Result<PluginKind> {
                Ok(PluginKind::reactive(Filter {
                    ctx: ctx.clone(),
                    backend: Arc::clone(&backend),
                }))
            }
        })?
        .register("camera", |ctx| {
            Ok(PluginKind::polling(Camera {
                pool: ctx.lookup::<SlotPool<Frame>>()?,
                next_due: Instant::now(),
                frame_id: 0,
            }))
        })?
        .register("renderer", {
            let rendered = Arc::clone(&rendered);
            move |ctx: &PluginContext| -> strand::Result<PluginKind> {
                Ok(PluginKind::polling(Renderer {
                    pool: ctx.lookup::<SlotPool<Frame>>()?,
                    last_seen: None,
                    rendered: Arc::clone(&rendered),
                }))
            }
        })?;

    let runtime = Runtime::new(config, plugins)?;
    runtime
        .services()
        .register(Arc::new(SlotPool::<Frame>::new(3)))?;
    let mut samples = runtime.bus().buffered_reader::<ImuSample>("imu")?;

    runtime.load(&["filter", "renderer", "imu", "camera"])?;
    runtime.run_for(run_for)?;

    let mut received = 0;
    while samples.dequeue().is_some() {
        received += 1;
    }
    let mut mirrored = Vec::new();
    while let Some(message) = backend.topic_dequeue("imu/filtered") {
        mirrored.push(String::from_utf8_lossy(&message).into_owned());
    }

    println!("imu samples:     {}", received);
    println!("frames rendered: {}", rendered.load(Ordering::Relaxed));
    println!("network mirror:  {} messages", mirrored.len());
    if let Some(last) = mirrored.last() {
        println!("last filtered:   {}", last);
    }
    for name in runtime.plugin_names() {
        println!("{:<10} {:?}", name, runtime.plugin_state(&name));
    }

    flush_logger()?;
    Ok(())
}
