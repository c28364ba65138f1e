//! Console demo for the shmframe image channel.
//!
//! Modes:
//! - `produce [name]` — render a moving gradient and publish frames.
//! - `consume [name]` — receive frames and report an FPS estimate.
//! - `pair [name]`    — run both roles on two threads in one process.
//!
//! Sizing comes from `demo.toml` (see `config.rs`); the name argument
//! overrides the configured one.

use std::env;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use log::{info, warn};
use shmframe::{ImageSetting, Role, SharedImage};

use crate::config::DemoConfig;

mod config;
mod logger;
mod pattern;

fn main() -> Result<()> {
    // Keep the logger alive for the duration of the process.
    let _logger = logger::init_logger().context("initializing logger")?;
    let cfg = config::load()?;

    let mut args = env::args().skip(1);
    let mode = args.next().unwrap_or_else(|| "pair".into());
    let name = args.next().unwrap_or_else(|| cfg.name.clone());

    match mode.as_str() {
        "produce" => run_producer(&name, &cfg, None),
        "consume" => run_consumer(&name, &cfg),
        "pair" => run_pair(&name, &cfg),
        other => bail!("unknown mode `{other}`; expected produce, consume or pair"),
    }
}

/// Renders and publishes frames. With `frame_limit` set, stops after that
/// many frames; otherwise runs until killed.
fn run_producer(name: &str, cfg: &DemoConfig, frame_limit: Option<u32>) -> Result<()> {
    let mut image = SharedImage::create_with(name, cfg.num_pixels(), cfg.pages, Role::Producer)
        .with_context(|| format!("creating image channel `{name}`"))?;
    info!(
        "producer on `{name}`: {}x{} @ {} fps, {} pages",
        cfg.width, cfg.height, cfg.fps, cfg.pages
    );

    let interval = Duration::from_secs_f64(1.0 / f64::from(cfg.fps));
    let setting = ImageSetting {
        width: cfg.width,
        height: cfg.height,
        bytes_per_line: cfg.width * 4,
    };
    let mut scratch = vec![0u32; cfg.num_pixels() as usize];
    let started = Instant::now();
    let mut sent = 0u32;

    loop {
        if frame_limit.is_some_and(|limit| sent >= limit) {
            info!("producer done after {sent} frames");
            return Ok(());
        }
        let tick = Instant::now();
        match image.out_buffer() {
            Some(out) => {
                if (out.pixels as usize) < scratch.len() {
                    bail!("channel holds {} pixels per page, need {}", out.pixels, scratch.len());
                }
                let phase = (started.elapsed().as_millis() % 1000) as f64 / 1000.0;
                pattern::render_gradient(&mut scratch, cfg.width, cfg.height, phase);
                // SAFETY: the buffer holds at least `scratch.len()` pixels.
                unsafe {
                    std::ptr::copy_nonoverlapping(
                        scratch.as_ptr() as *const u8,
                        out.data.as_ptr(),
                        scratch.len() * 4,
                    );
                }
                image.send(&setting).context("sending frame")?;
                sent += 1;
            }
            None => {
                // All pages sit with the consumer; wait for one to return.
                image.wait_notify(200);
                continue;
            }
        }
        if let Some(rest) = interval.checked_sub(tick.elapsed()) {
            thread::sleep(rest);
        }
    }
}

/// Receives frames and logs a rate estimate once a second. Runs until
/// killed.
fn run_consumer(name: &str, cfg: &DemoConfig) -> Result<()> {
    let mut image = SharedImage::create_with(name, cfg.num_pixels(), cfg.pages, Role::Consumer)
        .with_context(|| format!("attaching to image channel `{name}`"))?;
    info!("consumer on `{name}`");

    let mut meter = RateMeter::new();
    loop {
        match image.receive() {
            Some(frame) => {
                if frame.setting.width != cfg.width || frame.setting.height != cfg.height {
                    warn!(
                        "frame geometry {}x{} differs from configured {}x{}",
                        frame.setting.width, frame.setting.height, cfg.width, cfg.height
                    );
                }
                if let Some(fps) = meter.tick() {
                    info!("{fps:.1} fps ({}x{})", frame.setting.width, frame.setting.height);
                }
            }
            None => {
                image.wait_notify(500);
            }
        }
    }
}

/// Both roles on two threads in one process, a bounded run: the producer
/// publishes a fixed number of frames, the consumer drains until the
/// producer is done and the channel goes quiet.
fn run_pair(name: &str, cfg: &DemoConfig) -> Result<()> {
    info!("running producer and consumer in-process over `{name}`");
    let frames = cfg.fps.min(60);

    let producer_name = name.to_string();
    let producer_cfg = cfg.clone();
    let producer = thread::Builder::new()
        .name("producer".into())
        .spawn(move || run_producer(&producer_name, &producer_cfg, Some(frames)))
        .context("spawning producer thread")?;

    let mut image = SharedImage::create_with(name, cfg.num_pixels(), cfg.pages, Role::Consumer)
        .with_context(|| format!("attaching to image channel `{name}`"))?;
    let mut received = 0u32;
    let mut quiet_rounds = 0u32;
    while quiet_rounds < 10 {
        match image.receive() {
            Some(_frame) => {
                received += 1;
                quiet_rounds = 0;
            }
            None => {
                if producer.is_finished() {
                    quiet_rounds += 1;
                }
                image.wait_notify(100);
            }
        }
    }

    match producer.join() {
        Ok(result) => result?,
        Err(_) => bail!("producer thread panicked"),
    }
    info!("pair run complete: {received} of {frames} frames arrived (drops are expected)");

    drop(image);
    SharedImage::remove(name).context("removing demo region")?;
    Ok(())
}

/// Frames-per-second estimate over one-second windows.
struct RateMeter {
    window_start: Instant,
    frames: u32,
}

impl RateMeter {
    fn new() -> Self {
        RateMeter { window_start: Instant::now(), frames: 0 }
    }

    /// Counts one frame; returns the rate when a window closes.
    fn tick(&mut self) -> Option<f64> {
        self.frames += 1;
        let elapsed = self.window_start.elapsed();
        if elapsed < Duration::from_secs(1) {
            return None;
        }
        let fps = f64::from(self.frames) / elapsed.as_secs_f64();
        self.window_start = Instant::now();
        self.frames = 0;
        Some(fps)
    }
}
