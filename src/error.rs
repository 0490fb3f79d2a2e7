use thiserror::Error;

use crate::capture::frame::{ColorFormat, Modality};

/// Failures reported by a sensor backend.
#[derive(Debug, Error)]
pub enum SensorError {
    #[error("No sensor found")]
    NotFound,

    #[error("Sensor is not open")]
    NotOpen,

    #[error("No {0} frame source on this sensor")]
    SourceUnavailable(Modality),

    #[error("Coordinate mapper unavailable")]
    MapperUnavailable,

    #[error("Backend error: {0}")]
    Backend(String),
}

/// Stream lifecycle failures. None of these are fatal; the stream stays usable
/// through a fresh `setup`.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("Device is not open")]
    DeviceNotOpen,

    #[error("Device was dropped")]
    DeviceGone,

    #[error("Stream must be set up before opening")]
    NotConfigured,

    #[error("Stream is already open")]
    AlreadyOpen,

    #[error("Can't open {modality} reader: {source}")]
    ReaderOpen {
        modality: Modality,
        #[source]
        source: SensorError,
    },

    #[error("Failed to spawn acquisition worker: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Errors raised while turning a raw frame into stream pixels.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Expected a {expected} frame, got {found}")]
    WrongModality { expected: Modality, found: Modality },

    #[error("Frame buffer holds {actual} samples, {expected} required")]
    BufferSize { expected: usize, actual: usize },

    #[error("Frame is {actual:?}, {expected:?} declared")]
    Dimensions { expected: (u32, u32), actual: (u32, u32) },

    #[error("YUY2 needs an even width, got {0}")]
    OddWidth(u32),

    #[error("Unsupported color format: {0:?}")]
    UnsupportedFormat(ColorFormat),

    #[error("JPEG decode failed: {0}")]
    Jpeg(#[from] jpeg_decoder::Error),
}
