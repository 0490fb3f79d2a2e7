use std::sync::Arc;

use tracing::info;

use crate::sensor::{Sensor, VirtualSensor};
use crate::{Config, SensorBackend};

/// Sensor selected by the configured backend, unopened.
pub fn default_sensor(config: &Config) -> Option<Arc<dyn Sensor>> {
    match config.device.backend {
        SensorBackend::Virtual => {
            let simulation = &config.simulation;
            info!(
                "Using virtual sensor: {} fps, {}x{} {:?} color, {} bodies",
                simulation.fps,
                simulation.color_width,
                simulation.color_height,
                simulation.color_format,
                simulation.tracked_bodies
            );
            Some(Arc::new(VirtualSensor::new(simulation)))
        }
        SensorBackend::None => None,
    }
}
