use std::fmt;

use image::{ImageBuffer, Luma, RgbaImage};
use serde::{Deserialize, Serialize};

/// 16-bit single channel buffer (depth in millimetres, or infrared intensity)
pub type ShortPixels = ImageBuffer<Luma<u16>, Vec<u16>>;

/// 8-bit RGBA buffer (color frames, body-index visualization, colorized depth)
pub type ColorPixels = RgbaImage;

/// Sensor data types a device can stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Modality {
    Color,
    Depth,
    Infrared,
    BodyIndex,
    Body,
}

impl Modality {
    pub const ALL: [Modality; 5] = [
        Modality::Color,
        Modality::Depth,
        Modality::Infrared,
        Modality::BodyIndex,
        Modality::Body,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Modality::Color => "color",
            Modality::Depth => "depth",
            Modality::Infrared => "infrared",
            Modality::BodyIndex => "body_index",
            Modality::Body => "body",
        }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw color layouts a color reader may deliver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColorFormat {
    Rgba,
    Bgra,
    Yuy2,
    Mjpeg,
}

/// Pixel layout of the decoded stream buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PixelFormat {
    #[default]
    None,
    Rgba8,
    Gray16,
    Index8,
    Skeleton,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            PixelFormat::Rgba8 => 4,
            PixelFormat::Gray16 => 2,
            PixelFormat::Index8 => 1,
            PixelFormat::None | PixelFormat::Skeleton => 0,
        }
    }
}

/// Resolution + pixel format of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Mode {
    pub pixel_format: PixelFormat,
    pub resolution_x: u32,
    pub resolution_y: u32,
}

/// Field of view in degrees, as reported by the frame description
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FieldOfView {
    pub horizontal: f32,
    pub vertical: f32,
    pub diagonal: f32,
}

/// Metadata of the most recently decoded frame.
///
/// The pixel data itself never lives here: it is copied into the stream's
/// back buffer before the reader's frame is released.
#[derive(Debug, Clone, Default)]
pub struct Frame {
    pub modality: Option<Modality>,
    /// Device-relative timestamp in 100ns ticks
    pub timestamp: u64,
    pub frame_index: u64,
    pub width: u32,
    pub height: u32,
    pub field_of_view: FieldOfView,
    pub mode: Mode,
    pub stride: u32,
    pub data_size: usize,
}

impl Frame {
    pub fn new(modality: Modality) -> Self {
        Self {
            modality: Some(modality),
            ..Default::default()
        }
    }

    /// Reset the per-frame fields. Dimensions and mode are kept.
    pub fn clear(&mut self) {
        *self = Self {
            modality: self.modality,
            width: self.width,
            height: self.height,
            mode: self.mode,
            ..Default::default()
        };
    }
}
