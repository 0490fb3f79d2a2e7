//! Headless demo: every stream of the configured sensor, plus the mapper
//!
//! Usage: `kinect2-stream [config.toml] [seconds]`

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use color_eyre::{eyre::eyre, Result};
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use kinect2_stream::capture::{BodyIndexStream, BodyStream, ColorStream, DepthStream, Device, IrStream};
use kinect2_stream::{Config, Mapper, CONFIG};

const TICK: Duration = Duration::from_micros(16_667);

fn init_tracing() {
    let fmt = tracing_subscriber::fmt::layer().with_timer(tracing_subscriber::fmt::time::uptime());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("kinect2_stream=info"));
    let registry = tracing_subscriber::registry().with(filter).with(fmt);

    #[cfg(feature = "profiling")]
    registry.with(tracing_tracy::TracyLayer::default()).init();
    #[cfg(not(feature = "profiling"))]
    registry.init();
}

fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();

    info!("kinect2-stream launching...");

    let mut args = std::env::args().skip(1);
    let config_path = args.next().map(PathBuf::from);
    let run_for = match args.next() {
        Some(secs) => Duration::from_secs_f64(secs.parse()?),
        None => Duration::from_secs(5),
    };

    let config = Config::load(config_path.as_deref())?;
    CONFIG.store(Arc::new(config));

    let mut device = Device::new();
    device.setup()?;

    let mut color = ColorStream::new();
    let mut depth = DepthStream::new();
    let mut ir = IrStream::new();
    let mut body_index = BodyIndexStream::new();
    let mut body = BodyStream::new();

    color.setup(&mut device)?;
    depth.setup(&mut device)?;
    ir.setup(&mut device)?;
    body_index.setup(&mut device)?;
    body.setup(&mut device)?;

    // A missing modality is not fatal for the demo.
    for (name, opened) in [
        ("color", color.open()),
        ("depth", depth.open()),
        ("infrared", ir.open()),
        ("body_index", body_index.open()),
        ("body", body.open()),
    ] {
        if let Err(e) = opened {
            warn!("Skipping {} stream: {}", name, e);
        }
    }
    if !depth.is_open() {
        return Err(eyre!("depth stream is required for the demo"));
    }

    let mut mapper = Mapper::new();
    mapper.setup(&device)?;

    info!(
        "Color camera: exposure {} gain {:.2} gamma {:.2} interval {}",
        color.exposure_time(),
        color.gain(),
        color.gamma(),
        color.frame_interval()
    );

    let started = Instant::now();
    let mut last_report = started;
    let mut ticks = 0u64;

    while started.elapsed() < run_for {
        let tick_start = Instant::now();

        device.update();
        color.update();
        ir.update();
        body_index.update();
        body.update();

        if depth.update() {
            mapper.set_depth(&depth);
        }
        if color.is_frame_new() {
            mapper.set_color(&color);
        }

        if depth.is_frame_new() && mapper.is_ready(true, true) {
            let colored = mapper.colors_for_depth().iter().filter(|c| c.0[3] != 0).count();
            metrics::gauge!("kinect2_colorized_depth_pixels").set(colored as f64);
        }

        for tracked in body.tracked_bodies() {
            let bones = tracked.visible_bones().count();
            tracing::trace!(id = tracked.id(), bones, hand_left = ?tracked.hand_left(), "Body");
        }

        ticks += 1;
        if last_report.elapsed() >= Duration::from_secs(1) {
            last_report = Instant::now();
            let center = depth.depth_at(depth.width() / 2, depth.height() / 2);
            info!(
                "tick {}: depth {:?} color {:?} ir {:?} body_index {:?} body {:?}, center {}mm, {} bodies",
                ticks,
                depth.stats(),
                color.stats(),
                ir.stats(),
                body_index.stats(),
                body.stats(),
                center,
                body.tracked_bodies().len()
            );
        }

        if let Some(rest) = TICK.checked_sub(tick_start.elapsed()) {
            thread::sleep(rest);
        }
    }

    mapper.exit();
    device.exit();
    info!("Done after {} ticks", ticks);
    Ok(())
}
