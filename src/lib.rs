pub mod capture;
pub mod error;
pub mod mapper;
pub mod pipeline;
pub mod sensor;
pub mod utils;

use std::path::Path;

use arc_swap::ArcSwap;
use capture::frame::ColorFormat;
use serde::{Deserialize, Serialize};

pub use capture::{
    BodyIndexStream, BodyStream, ColorStream, DepthStream, Device, Frame, IrStream, Modality, PixelFormat, Stream,
    StreamState,
};
pub use error::{DecodeError, SensorError, StreamError};
pub use mapper::{DepthRect, Mapper};
pub use pipeline::DoubleBuffer;

/// Global configuration that can be atomically swapped at runtime
pub static CONFIG: once_cell::sync::Lazy<ArcSwap<Config>> =
    once_cell::sync::Lazy::new(|| ArcSwap::from_pointee(Config::default()));

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub device: DeviceConfig,
    pub acquisition: AcquisitionConfig,
    pub depth: DepthConfig,
    pub simulation: SimulationConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorBackend {
    /// Synthetic scene, see [`sensor::VirtualSensor`]
    #[default]
    Virtual,
    /// No sensor: `Device::setup` always fails
    None,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub backend: SensorBackend,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Worker sleep once spinning and yielding found nothing (microseconds)
    pub idle_sleep_us: u64,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self { idle_sleep_us: 500 }
    }
}

/// Depth visualization range, millimetres
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DepthConfig {
    pub near: u16,
    pub far: u16,
    pub invert: bool,
}

impl Default for DepthConfig {
    fn default() -> Self {
        Self {
            near: 50,
            far: 10000,
            invert: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub fps: u32,
    pub color_format: ColorFormat,
    pub color_width: u32,
    pub color_height: u32,
    /// Number of walking subjects, at most `BODY_COUNT`
    pub tracked_bodies: usize,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            fps: 30,
            color_format: ColorFormat::Yuy2,
            color_width: 960,
            color_height: 540,
            tracked_bodies: 2,
        }
    }
}

impl Config {
    /// Defaults, overlaid with an optional TOML file, overlaid with
    /// `KINECT2_<SECTION>__<KEY>` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder().add_source(config::Config::try_from(&Config::default())?);
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }

        builder
            .add_source(
                config::Environment::with_prefix("KINECT2")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}
