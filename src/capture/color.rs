use std::sync::Arc;

use glam::{Vec2, Vec4};
use image::Rgba;
use tracing::debug;

use super::decoder::decode_frame;
use super::frame::{ColorFormat, ColorPixels, Modality, PixelFormat};
use super::stream::{Stream, StreamKind};
use crate::error::{DecodeError, SensorError};
use crate::pipeline::{Allocate, DoubleBuffer};
use crate::sensor::{ColorCameraSettings, FramePayload, RawFrame, Sensor};

const TRANSPARENT: Rgba<u8> = Rgba([0, 0, 0, 0]);

/// Color at a (sub)pixel position, `None` outside the image.
#[inline]
pub fn sample(pixels: &ColorPixels, point: Vec2) -> Option<Rgba<u8>> {
    if !(point.x >= 0.0 && point.y >= 0.0) {
        return None;
    }
    pixels.get_pixel_checked(point.x as u32, point.y as u32).copied()
}

#[inline]
pub fn to_float_color(color: Rgba<u8>) -> Vec4 {
    let [r, g, b, a] = color.0;
    Vec4::new(r as f32, g as f32, b as f32, a as f32) / 255.0
}

/// Color decoding state: the conversion scratch buffer and the camera
/// settings handle grabbed at open.
#[derive(Default)]
pub struct ColorDecoder {
    scratch: Vec<u8>,
    settings: Option<Arc<dyn ColorCameraSettings>>,
}

impl StreamKind for ColorDecoder {
    const MODALITY: Modality = Modality::Color;
    type Pixels = ColorPixels;

    fn prepare(&mut self, sensor: &dyn Sensor, pixels: &mut DoubleBuffer<ColorPixels>) -> Result<(), SensorError> {
        if let Some(description) = sensor.frame_description(Modality::Color) {
            pixels.allocate(description.width, description.height);
            self.scratch.reserve(description.pixel_count() * 4);
        }
        self.settings = sensor.color_camera_settings();
        if self.settings.is_none() {
            debug!("Color camera settings unavailable");
        }
        Ok(())
    }

    fn decode(&mut self, frame: &RawFrame, back: &mut ColorPixels) -> Result<PixelFormat, DecodeError> {
        let FramePayload::Color { format, data } = &frame.payload else {
            return Err(DecodeError::WrongModality {
                expected: Modality::Color,
                found: frame.modality(),
            });
        };

        let (width, height) = (frame.description.width, frame.description.height);
        let size = frame.description.pixel_count() * 4;

        if *format == ColorFormat::Rgba {
            // Native layout goes straight into the back buffer.
            if data.len() < size {
                return Err(DecodeError::BufferSize {
                    expected: size,
                    actual: data.len(),
                });
            }
            back.allocate(width, height);
            back.copy_from_slice(&data[..size]);
        } else {
            decode_frame(data, *format, width, height, &mut self.scratch)?;
            back.allocate(width, height);
            back.copy_from_slice(&self.scratch[..size]);
        }

        Ok(PixelFormat::Rgba8)
    }

    fn release(&mut self) {
        self.settings = None;
    }
}

/// RGBA color frames
pub type ColorStream = Stream<ColorDecoder>;

impl Stream<ColorDecoder> {
    /// Front buffer color, transparent black outside the frame
    pub fn color_at(&self, x: u32, y: u32) -> Rgba<u8> {
        self.pixels().get_pixel_checked(x, y).copied().unwrap_or(TRANSPARENT)
    }

    pub fn color_at_point(&self, point: Vec2) -> Rgba<u8> {
        sample(&self.pixels(), point).unwrap_or(TRANSPARENT)
    }

    /// [`Self::color_at`] with channels normalized to 0..1
    pub fn float_color_at(&self, x: u32, y: u32) -> Vec4 {
        to_float_color(self.color_at(x, y))
    }

    /// Exposure time in 100ns ticks, 0 when unavailable
    pub fn exposure_time(&self) -> i64 {
        self.camera_setting(|settings| settings.exposure_time()).unwrap_or(0)
    }

    /// Frame interval in 100ns ticks, 0 when unavailable
    pub fn frame_interval(&self) -> i64 {
        self.camera_setting(|settings| settings.frame_interval()).unwrap_or(0)
    }

    pub fn gain(&self) -> f32 {
        self.camera_setting(|settings| settings.gain()).unwrap_or(0.0)
    }

    pub fn gamma(&self) -> f32 {
        self.camera_setting(|settings| settings.gamma()).unwrap_or(0.0)
    }

    fn camera_setting<T>(&self, query: impl FnOnce(&dyn ColorCameraSettings) -> Option<T>) -> Option<T> {
        let settings = self.kind().settings.clone()?;
        query(&*settings)
    }
}
