//! Vendor boundary: sensor handle, per-modality frame readers, coordinate
//! mapping and color camera settings.
//!
//! Everything the capture layer knows about the hardware goes through the
//! traits in this module. Two backends ship with the crate:
//!
//! - [`VirtualSensor`]: clocked synthetic scene (depth, infrared, color,
//!   body index and walking skeletons)
//! - [`ScriptedSensor`]: frames pushed by the caller, for replay and tests

pub mod pinhole;
pub mod scripted;
pub mod virtual_sensor;

use std::sync::Arc;

use bytes::Bytes;
use glam::{Vec2, Vec3};

use crate::capture::body::RawBody;
use crate::capture::frame::{ColorFormat, FieldOfView, Modality};
use crate::error::SensorError;

pub use pinhole::{CameraIntrinsics, PinholeMapper};
pub use scripted::ScriptedSensor;
pub use virtual_sensor::VirtualSensor;

/// 2D point in depth image pixels
pub type DepthSpacePoint = Vec2;
/// 2D point in color image pixels
pub type ColorSpacePoint = Vec2;
/// 3D point in meters, relative to the sensor
pub type CameraSpacePoint = Vec3;

/// Coordinate value reported for points that cannot be mapped.
pub const UNMAPPED: f32 = f32::NEG_INFINITY;

/// Size and optics of a frame as reported by its source
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FrameDescription {
    pub width: u32,
    pub height: u32,
    pub field_of_view: FieldOfView,
    pub bytes_per_pixel: u32,
}

impl FrameDescription {
    pub fn new(width: u32, height: u32, bytes_per_pixel: u32) -> Self {
        Self {
            width,
            height,
            field_of_view: FieldOfView::default(),
            bytes_per_pixel,
        }
    }

    pub fn with_field_of_view(mut self, field_of_view: FieldOfView) -> Self {
        self.field_of_view = field_of_view;
        self
    }

    #[inline]
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// Modality-specific frame contents, owned by the frame
#[derive(Debug, Clone)]
pub enum FramePayload {
    Color {
        format: ColorFormat,
        data: Bytes,
    },
    Depth {
        samples: Arc<[u16]>,
        min_reliable_distance: u16,
        max_reliable_distance: u16,
    },
    Infrared {
        samples: Arc<[u16]>,
    },
    BodyIndex {
        data: Bytes,
    },
    Body {
        bodies: Vec<Option<RawBody>>,
    },
}

impl FramePayload {
    pub fn modality(&self) -> Modality {
        match self {
            FramePayload::Color { .. } => Modality::Color,
            FramePayload::Depth { .. } => Modality::Depth,
            FramePayload::Infrared { .. } => Modality::Infrared,
            FramePayload::BodyIndex { .. } => Modality::BodyIndex,
            FramePayload::Body { .. } => Modality::Body,
        }
    }
}

/// One frame handed out by a reader. Released when dropped.
#[derive(Debug, Clone)]
pub struct RawFrame {
    /// Device-relative time in 100ns ticks
    pub relative_time: u64,
    pub description: FrameDescription,
    pub payload: FramePayload,
}

impl RawFrame {
    pub fn color(relative_time: u64, width: u32, height: u32, format: ColorFormat, data: impl Into<Bytes>) -> Self {
        let bytes_per_pixel = match format {
            ColorFormat::Rgba | ColorFormat::Bgra => 4,
            ColorFormat::Yuy2 => 2,
            ColorFormat::Mjpeg => 0,
        };
        Self {
            relative_time,
            description: FrameDescription::new(width, height, bytes_per_pixel),
            payload: FramePayload::Color {
                format,
                data: data.into(),
            },
        }
    }

    pub fn depth(relative_time: u64, width: u32, height: u32, samples: impl Into<Arc<[u16]>>) -> Self {
        Self {
            relative_time,
            description: FrameDescription::new(width, height, 2),
            payload: FramePayload::Depth {
                samples: samples.into(),
                min_reliable_distance: 500,
                max_reliable_distance: 4500,
            },
        }
    }

    pub fn infrared(relative_time: u64, width: u32, height: u32, samples: impl Into<Arc<[u16]>>) -> Self {
        Self {
            relative_time,
            description: FrameDescription::new(width, height, 2),
            payload: FramePayload::Infrared {
                samples: samples.into(),
            },
        }
    }

    pub fn body_index(relative_time: u64, width: u32, height: u32, data: impl Into<Bytes>) -> Self {
        Self {
            relative_time,
            description: FrameDescription::new(width, height, 1),
            payload: FramePayload::BodyIndex { data: data.into() },
        }
    }

    pub fn bodies(relative_time: u64, bodies: Vec<Option<RawBody>>) -> Self {
        Self {
            relative_time,
            description: FrameDescription::default(),
            payload: FramePayload::Body { bodies },
        }
    }

    #[inline]
    pub fn modality(&self) -> Modality {
        self.payload.modality()
    }
}

/// Source of the latest frame for one modality.
pub trait FrameReader: Send {
    /// Latest frame not handed out before, or `None` right away when nothing
    /// new has arrived. Never blocks.
    fn acquire_latest(&mut self) -> Option<RawFrame>;
}

/// Open reader, tagged with the modality it serves.
pub enum ReaderHandle {
    Color(Box<dyn FrameReader>),
    Depth(Box<dyn FrameReader>),
    Infrared(Box<dyn FrameReader>),
    BodyIndex(Box<dyn FrameReader>),
    Body(Box<dyn FrameReader>),
}

impl ReaderHandle {
    pub fn new(modality: Modality, reader: Box<dyn FrameReader>) -> Self {
        match modality {
            Modality::Color => ReaderHandle::Color(reader),
            Modality::Depth => ReaderHandle::Depth(reader),
            Modality::Infrared => ReaderHandle::Infrared(reader),
            Modality::BodyIndex => ReaderHandle::BodyIndex(reader),
            Modality::Body => ReaderHandle::Body(reader),
        }
    }

    pub fn modality(&self) -> Modality {
        match self {
            ReaderHandle::Color(_) => Modality::Color,
            ReaderHandle::Depth(_) => Modality::Depth,
            ReaderHandle::Infrared(_) => Modality::Infrared,
            ReaderHandle::BodyIndex(_) => Modality::BodyIndex,
            ReaderHandle::Body(_) => Modality::Body,
        }
    }

    pub fn acquire_latest(&mut self) -> Option<RawFrame> {
        match self {
            ReaderHandle::Color(reader)
            | ReaderHandle::Depth(reader)
            | ReaderHandle::Infrared(reader)
            | ReaderHandle::BodyIndex(reader)
            | ReaderHandle::Body(reader) => reader.acquire_latest(),
        }
    }
}

impl std::fmt::Debug for ReaderHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ReaderHandle").field(&self.modality()).finish()
    }
}

/// Color camera settings. Each query is `None` when the device refuses it.
pub trait ColorCameraSettings: Send + Sync {
    /// Exposure time in 100ns ticks
    fn exposure_time(&self) -> Option<i64>;
    /// Frame interval in 100ns ticks
    fn frame_interval(&self) -> Option<i64>;
    fn gain(&self) -> Option<f32>;
    fn gamma(&self) -> Option<f32>;
}

/// Settings snapshot with fixed values
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedCameraSettings {
    pub exposure_time: Option<i64>,
    pub frame_interval: Option<i64>,
    pub gain: Option<f32>,
    pub gamma: Option<f32>,
}

impl ColorCameraSettings for FixedCameraSettings {
    fn exposure_time(&self) -> Option<i64> {
        self.exposure_time
    }

    fn frame_interval(&self) -> Option<i64> {
        self.frame_interval
    }

    fn gain(&self) -> Option<f32> {
        self.gain
    }

    fn gamma(&self) -> Option<f32> {
        self.gamma
    }
}

/// Point transforms between depth, color and camera space.
///
/// Points that cannot be mapped come back with [`UNMAPPED`] coordinates. The
/// batch methods have per-point defaults. The whole-frame methods take the
/// row width of the depth frame they are given, which may differ from
/// [`Self::depth_frame_size`]. The color-frame methods splat the depth frame
/// into color space, keeping the nearest sample per color pixel.
pub trait CoordinateMapper: Send + Sync {
    fn depth_frame_size(&self) -> (u32, u32);
    fn color_frame_size(&self) -> (u32, u32);

    fn depth_point_to_camera(&self, point: DepthSpacePoint, depth: u16) -> CameraSpacePoint;
    fn depth_point_to_color(&self, point: DepthSpacePoint, depth: u16) -> ColorSpacePoint;
    fn camera_point_to_depth(&self, point: CameraSpacePoint) -> DepthSpacePoint;
    fn camera_point_to_color(&self, point: CameraSpacePoint) -> ColorSpacePoint;

    fn depth_points_to_camera(&self, points: &[DepthSpacePoint], depths: &[u16], out: &mut [CameraSpacePoint]) {
        for ((point, depth), out) in points.iter().zip(depths).zip(out.iter_mut()) {
            *out = self.depth_point_to_camera(*point, *depth);
        }
    }

    fn depth_points_to_color(&self, points: &[DepthSpacePoint], depths: &[u16], out: &mut [ColorSpacePoint]) {
        for ((point, depth), out) in points.iter().zip(depths).zip(out.iter_mut()) {
            *out = self.depth_point_to_color(*point, *depth);
        }
    }

    fn camera_points_to_depth(&self, points: &[CameraSpacePoint], out: &mut [DepthSpacePoint]) {
        for (point, out) in points.iter().zip(out.iter_mut()) {
            *out = self.camera_point_to_depth(*point);
        }
    }

    fn camera_points_to_color(&self, points: &[CameraSpacePoint], out: &mut [ColorSpacePoint]) {
        for (point, out) in points.iter().zip(out.iter_mut()) {
            *out = self.camera_point_to_color(*point);
        }
    }

    fn depth_frame_to_camera(&self, depth: &[u16], width: u32, out: &mut [CameraSpacePoint]) {
        for (i, (value, out)) in depth.iter().zip(out.iter_mut()).enumerate() {
            *out = self.depth_point_to_camera(pixel_point(i, width), *value);
        }
    }

    fn depth_frame_to_color(&self, depth: &[u16], width: u32, out: &mut [ColorSpacePoint]) {
        for (i, (value, out)) in depth.iter().zip(out.iter_mut()).enumerate() {
            *out = self.depth_point_to_color(pixel_point(i, width), *value);
        }
    }

    fn color_frame_to_depth(&self, depth: &[u16], depth_width: u32, out: &mut [DepthSpacePoint]) {
        out.fill(Vec2::splat(UNMAPPED));
        splat_depth_into_color(self, depth, depth_width, |color_index, depth_index| {
            if let Some(slot) = out.get_mut(color_index) {
                *slot = pixel_point(depth_index, depth_width);
            }
        });
    }

    fn color_frame_to_camera(&self, depth: &[u16], depth_width: u32, out: &mut [CameraSpacePoint]) {
        out.fill(Vec3::splat(UNMAPPED));
        splat_depth_into_color(self, depth, depth_width, |color_index, depth_index| {
            if let Some(slot) = out.get_mut(color_index) {
                *slot = self.depth_point_to_camera(pixel_point(depth_index, depth_width), depth[depth_index]);
            }
        });
    }
}

/// Sensor handle. Dropping the last reference releases it.
pub trait Sensor: Send + Sync {
    fn name(&self) -> &str;

    fn open(&self) -> Result<(), SensorError>;
    fn close(&self);
    fn is_open(&self) -> bool;

    fn open_reader(&self, modality: Modality) -> Result<ReaderHandle, SensorError>;

    /// Native frame layout of a modality, if the sensor can report it up front.
    fn frame_description(&self, modality: Modality) -> Option<FrameDescription>;

    fn coordinate_mapper(&self) -> Result<Arc<dyn CoordinateMapper>, SensorError>;

    fn color_camera_settings(&self) -> Option<Arc<dyn ColorCameraSettings>> {
        None
    }
}

#[inline]
pub(crate) fn pixel_point(index: usize, width: u32) -> Vec2 {
    let width = width.max(1) as usize;
    Vec2::new((index % width) as f32, (index / width) as f32)
}

/// Forward-project every valid depth sample into the color grid, keeping the
/// nearest sample per color pixel. Each sample covers a square footprint sized
/// to the color/depth resolution ratio so the color grid has no holes.
fn splat_depth_into_color<M, F>(mapper: &M, depth: &[u16], depth_width: u32, mut write: F)
where
    M: CoordinateMapper + ?Sized,
    F: FnMut(usize, usize),
{
    let (color_width, color_height) = mapper.color_frame_size();
    let radius = ((color_width as f32 / depth_width.max(1) as f32) / 2.0).ceil() as i64;
    let mut nearest = vec![u16::MAX; color_width as usize * color_height as usize];

    for (depth_index, &value) in depth.iter().enumerate() {
        if value == 0 {
            continue;
        }
        let color = mapper.depth_point_to_color(pixel_point(depth_index, depth_width), value);
        if !color.is_finite() {
            continue;
        }
        let (cx, cy) = (color.x as i64, color.y as i64);
        for y in (cy - radius)..=(cy + radius) {
            if y < 0 || y >= color_height as i64 {
                continue;
            }
            for x in (cx - radius)..=(cx + radius) {
                if x < 0 || x >= color_width as i64 {
                    continue;
                }
                let color_index = (y * color_width as i64 + x) as usize;
                if value < nearest[color_index] {
                    nearest[color_index] = value;
                    write(color_index, depth_index);
                }
            }
        }
    }
}
