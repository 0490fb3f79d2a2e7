use std::sync::{Arc, Weak};

use tracing::{debug, info, instrument, warn};

use super::stream::StreamControl;
use crate::error::SensorError;
use crate::sensor::Sensor;
use crate::{utils, CONFIG};

/// Owns the sensor handle and ticks every stream that registered with it.
///
/// The registry holds weak references only: a dropped stream simply falls
/// out of it on the next [`Device::update`].
#[derive(Default)]
pub struct Device {
    sensor: Option<Arc<dyn Sensor>>,
    streams: Vec<Weak<dyn StreamControl>>,
}

impl Device {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the sensor selected by the active config and open it.
    pub fn setup(&mut self) -> Result<(), SensorError> {
        let config = CONFIG.load();
        self.setup_with(|| utils::default_sensor(&config))
    }

    /// Acquire a sensor from `acquire` and open it. Does not retry.
    #[instrument(skip_all)]
    pub fn setup_with<F>(&mut self, acquire: F) -> Result<(), SensorError>
    where
        F: FnOnce() -> Option<Arc<dyn Sensor>>,
    {
        if self.is_open() {
            debug!("Device already open");
            return Ok(());
        }

        let Some(sensor) = acquire() else {
            warn!("Failed to find sensor.");
            return Err(SensorError::NotFound);
        };

        if let Err(e) = sensor.open() {
            warn!("Failed to open sensor {}: {}", sensor.name(), e);
            return Err(e);
        }

        info!("Sensor {} opened", sensor.name());
        self.sensor = Some(sensor);
        Ok(())
    }

    /// Refresh the novelty flag of every registered stream. One call per
    /// consumer tick; never blocks on a worker for longer than an atomic op.
    pub fn update(&mut self) {
        if !self.is_open() {
            return;
        }

        self.streams.retain(|stream| match stream.upgrade() {
            Some(stream) => {
                stream.refresh_novelty();
                true
            }
            None => false,
        });
    }

    /// Close every registered stream, then close and release the sensor.
    pub fn exit(&mut self) {
        for stream in self.streams.drain(..) {
            if let Some(stream) = stream.upgrade() {
                stream.close();
            }
        }

        if let Some(sensor) = self.sensor.take() {
            sensor.close();
            info!("Sensor {} closed", sensor.name());
        }
    }

    pub fn is_open(&self) -> bool {
        self.sensor.as_ref().is_some_and(|sensor| sensor.is_open())
    }

    pub fn sensor(&self) -> Option<&Arc<dyn Sensor>> {
        self.sensor.as_ref()
    }

    /// Number of live streams in the registry
    pub fn stream_count(&self) -> usize {
        self.streams.iter().filter(|stream| stream.strong_count() > 0).count()
    }

    pub(crate) fn register(&mut self, stream: Weak<dyn StreamControl>) {
        if let Some(control) = stream.upgrade() {
            debug!(modality = %control.modality(), "Stream registered");
        }
        self.streams.push(stream);
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        self.exit();
    }
}
