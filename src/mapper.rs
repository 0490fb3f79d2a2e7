//! Coordinate transforms between depth, color and camera space, evaluated
//! against depth/color snapshots taken from the streams.
//!
//! Every operation checks its preconditions first (see [`Mapper::is_ready`]).
//! When they are not met it returns an empty slice or a zero point, never an
//! error. Batch results are written into scratch buffers owned by the mapper
//! and handed out as borrowed slices. Those buffers only grow, so a slice is
//! valid until the next call.

use std::sync::Arc;

use glam::{Vec2, Vec3, Vec4};
use image::{Luma, Rgba};
use tracing::{info, warn};

use crate::capture::color::{sample, to_float_color};
use crate::capture::frame::{ColorPixels, ShortPixels};
use crate::capture::{ColorStream, DepthStream, Device};
use crate::error::SensorError;
use crate::sensor::{CameraSpacePoint, ColorSpacePoint, CoordinateMapper, DepthSpacePoint};

const TRANSPARENT: Rgba<u8> = Rgba([0, 0, 0, 0]);

/// Axis-aligned region of the depth frame, in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DepthRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl DepthRect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Intersection with a `width`x`height` frame
    fn clip(&self, width: u32, height: u32) -> Self {
        let x = self.x.min(width);
        let y = self.y.min(height);
        Self {
            x,
            y,
            width: self.x.saturating_add(self.width).min(width) - x,
            height: self.y.saturating_add(self.height).min(height) - y,
        }
    }
}

/// Depth at a depth-space point, 0 outside the frame
fn depth_at(depth: &ShortPixels, point: DepthSpacePoint) -> u16 {
    if !(point.x >= 0.0 && point.y >= 0.0) {
        return 0;
    }
    depth
        .get_pixel_checked(point.x as u32, point.y as u32)
        .map_or(0, |&Luma([value])| value)
}

/// Grow `buffer` to at least `len` and hand out its first `len` entries.
fn scratch<T: Clone + Default>(buffer: &mut Vec<T>, len: usize) -> &mut [T] {
    scratch_with(buffer, len, T::default())
}

/// [`scratch`] for element types without a `Default`, new entries set to `fill`.
fn scratch_with<T: Clone>(buffer: &mut Vec<T>, len: usize, fill: T) -> &mut [T] {
    if buffer.len() < len {
        buffer.resize(len, fill);
    }
    &mut buffer[..len]
}

#[derive(Default)]
struct Scratch {
    depth_points: Vec<DepthSpacePoint>,
    depth_values: Vec<u16>,
    depth_to_camera: Vec<CameraSpacePoint>,
    depth_to_color: Vec<ColorSpacePoint>,
    camera_to_depth: Vec<DepthSpacePoint>,
    camera_to_color: Vec<ColorSpacePoint>,
    color_to_depth: Vec<DepthSpacePoint>,
    color_to_camera: Vec<CameraSpacePoint>,
    float_colors: Vec<Vec4>,
    colors: Vec<Rgba<u8>>,
    colorized: ColorPixels,
}

#[derive(Default)]
pub struct Mapper {
    mapper: Option<Arc<dyn CoordinateMapper>>,
    depth: ShortPixels,
    color: ColorPixels,
    scratch: Scratch,
}

impl Mapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind to the coordinate mapper of an open device.
    pub fn setup(&mut self, device: &Device) -> Result<(), SensorError> {
        let Some(sensor) = device.sensor().filter(|_| device.is_open()) else {
            warn!("Cannot get Coordinate Mapper: device not open.");
            return Err(SensorError::NotOpen);
        };

        match sensor.coordinate_mapper() {
            Ok(mapper) => {
                let (dw, dh) = mapper.depth_frame_size();
                let (cw, ch) = mapper.color_frame_size();
                info!("Coordinate mapper ready: depth {}x{}, color {}x{}", dw, dh, cw, ch);
                self.mapper = Some(mapper);
                Ok(())
            }
            Err(e) => {
                warn!("Cannot get Coordinate Mapper: {}", e);
                Err(e)
            }
        }
    }

    /// Use an explicit coordinate mapper.
    pub fn setup_with(&mut self, mapper: Arc<dyn CoordinateMapper>) {
        self.mapper = Some(mapper);
    }

    /// Drop the mapper handle, the snapshots and every scratch buffer.
    pub fn exit(&mut self) {
        *self = Self::default();
    }

    /// Snapshot the depth stream's front buffer.
    pub fn set_depth(&mut self, stream: &DepthStream) {
        self.depth.clone_from(&stream.pixels());
    }

    pub fn set_depth_pixels(&mut self, pixels: &ShortPixels) {
        self.depth.clone_from(pixels);
    }

    /// Snapshot the color stream's front buffer.
    pub fn set_color(&mut self, stream: &ColorStream) {
        self.color.clone_from(&stream.pixels());
    }

    pub fn set_color_pixels(&mut self, pixels: &ColorPixels) {
        self.color.clone_from(pixels);
    }

    pub fn coordinate_mapper(&self) -> Option<&Arc<dyn CoordinateMapper>> {
        self.mapper.as_ref()
    }

    /// Mapper bound, plus non-empty snapshots for whichever of depth/color is
    /// requested.
    pub fn is_ready(&self, depth: bool, color: bool) -> bool {
        self.mapper.is_some() && (!depth || !self.depth.is_empty()) && (!color || !self.color.is_empty())
    }

    fn ready_mapper(&self, depth: bool, color: bool) -> Option<Arc<dyn CoordinateMapper>> {
        if self.is_ready(depth, color) {
            self.mapper.clone()
        } else {
            None
        }
    }

    /// Gather the points of `points` and their snapshot depths into scratch.
    fn gather_points(&mut self, points: &[DepthSpacePoint]) {
        scratch(&mut self.scratch.depth_points, points.len()).copy_from_slice(points);
        let values = scratch(&mut self.scratch.depth_values, points.len());
        for (value, point) in values.iter_mut().zip(points) {
            *value = depth_at(&self.depth, *point);
        }
    }

    /// Gather the clipped pixels of `rect` and their depths into scratch.
    fn gather_rect(&mut self, rect: DepthRect) -> usize {
        let rect = rect.clip(self.depth.width(), self.depth.height());
        let len = rect.width as usize * rect.height as usize;

        let points = scratch(&mut self.scratch.depth_points, len);
        let values = scratch(&mut self.scratch.depth_values, len);
        let coords = (rect.y..rect.y + rect.height).flat_map(|y| (rect.x..rect.x + rect.width).map(move |x| (x, y)));
        for ((point, value), (x, y)) in points.iter_mut().zip(values.iter_mut()).zip(coords) {
            *point = Vec2::new(x as f32, y as f32);
            *value = self.depth.get_pixel(x, y).0[0];
        }
        len
    }

    // depth -> camera

    pub fn depth_to_camera(&self, x: u32, y: u32) -> CameraSpacePoint {
        self.depth_point_to_camera(Vec2::new(x as f32, y as f32))
    }

    pub fn depth_point_to_camera(&self, point: DepthSpacePoint) -> CameraSpacePoint {
        match self.ready_mapper(true, false) {
            Some(mapper) => mapper.depth_point_to_camera(point, depth_at(&self.depth, point)),
            None => Vec3::ZERO,
        }
    }

    pub fn depth_frame_to_camera(&mut self) -> &[CameraSpacePoint] {
        let Some(mapper) = self.ready_mapper(true, false) else {
            return &[];
        };
        let out = scratch(&mut self.scratch.depth_to_camera, self.depth.len());
        mapper.depth_frame_to_camera(&self.depth, self.depth.width(), out);
        out
    }

    pub fn depth_points_to_camera(&mut self, points: &[DepthSpacePoint]) -> &[CameraSpacePoint] {
        let Some(mapper) = self.ready_mapper(true, false) else {
            return &[];
        };
        self.gather_points(points);
        let len = points.len();
        let out = scratch(&mut self.scratch.depth_to_camera, len);
        mapper.depth_points_to_camera(&self.scratch.depth_points[..len], &self.scratch.depth_values[..len], out);
        out
    }

    pub fn depth_rect_to_camera(&mut self, rect: DepthRect) -> &[CameraSpacePoint] {
        let Some(mapper) = self.ready_mapper(true, false) else {
            return &[];
        };
        let len = self.gather_rect(rect);
        let out = scratch(&mut self.scratch.depth_to_camera, len);
        mapper.depth_points_to_camera(&self.scratch.depth_points[..len], &self.scratch.depth_values[..len], out);
        out
    }

    // depth -> color

    pub fn depth_to_color(&self, x: u32, y: u32) -> ColorSpacePoint {
        self.depth_point_to_color(Vec2::new(x as f32, y as f32))
    }

    pub fn depth_point_to_color(&self, point: DepthSpacePoint) -> ColorSpacePoint {
        match self.ready_mapper(true, false) {
            Some(mapper) => mapper.depth_point_to_color(point, depth_at(&self.depth, point)),
            None => Vec2::ZERO,
        }
    }

    pub fn depth_frame_to_color(&mut self) -> &[ColorSpacePoint] {
        let Some(mapper) = self.ready_mapper(true, false) else {
            return &[];
        };
        let out = scratch(&mut self.scratch.depth_to_color, self.depth.len());
        mapper.depth_frame_to_color(&self.depth, self.depth.width(), out);
        out
    }

    pub fn depth_points_to_color(&mut self, points: &[DepthSpacePoint]) -> &[ColorSpacePoint] {
        let Some(mapper) = self.ready_mapper(true, false) else {
            return &[];
        };
        self.gather_points(points);
        let len = points.len();
        let out = scratch(&mut self.scratch.depth_to_color, len);
        mapper.depth_points_to_color(&self.scratch.depth_points[..len], &self.scratch.depth_values[..len], out);
        out
    }

    pub fn depth_rect_to_color(&mut self, rect: DepthRect) -> &[ColorSpacePoint] {
        let Some(mapper) = self.ready_mapper(true, false) else {
            return &[];
        };
        let len = self.gather_rect(rect);
        let out = scratch(&mut self.scratch.depth_to_color, len);
        mapper.depth_points_to_color(&self.scratch.depth_points[..len], &self.scratch.depth_values[..len], out);
        out
    }

    // color frame -> depth / camera

    pub fn color_frame_to_camera(&mut self) -> &[CameraSpacePoint] {
        let Some(mapper) = self.ready_mapper(true, false) else {
            return &[];
        };
        let (width, height) = mapper.color_frame_size();
        let out = scratch(&mut self.scratch.color_to_camera, width as usize * height as usize);
        mapper.color_frame_to_camera(&self.depth, self.depth.width(), out);
        out
    }

    pub fn color_frame_to_depth(&mut self) -> &[DepthSpacePoint] {
        let Some(mapper) = self.ready_mapper(true, false) else {
            return &[];
        };
        let (width, height) = mapper.color_frame_size();
        let out = scratch(&mut self.scratch.color_to_depth, width as usize * height as usize);
        mapper.color_frame_to_depth(&self.depth, self.depth.width(), out);
        out
    }

    // camera -> depth / color

    pub fn camera_to_depth(&self, point: CameraSpacePoint) -> DepthSpacePoint {
        match self.ready_mapper(true, false) {
            Some(mapper) => mapper.camera_point_to_depth(point),
            None => Vec2::ZERO,
        }
    }

    pub fn camera_points_to_depth(&mut self, points: &[CameraSpacePoint]) -> &[DepthSpacePoint] {
        let Some(mapper) = self.ready_mapper(true, false) else {
            return &[];
        };
        let out = scratch(&mut self.scratch.camera_to_depth, points.len());
        mapper.camera_points_to_depth(points, out);
        out
    }

    /// Needs only the coordinate mapper, no snapshot.
    pub fn camera_to_color(&self, point: CameraSpacePoint) -> ColorSpacePoint {
        match self.ready_mapper(false, false) {
            Some(mapper) => mapper.camera_point_to_color(point),
            None => Vec2::ZERO,
        }
    }

    pub fn camera_points_to_color(&mut self, points: &[CameraSpacePoint]) -> &[ColorSpacePoint] {
        let Some(mapper) = self.ready_mapper(true, false) else {
            return &[];
        };
        let out = scratch(&mut self.scratch.camera_to_color, points.len());
        mapper.camera_points_to_color(points, out);
        out
    }

    // colorized depth

    /// Map the depth snapshot into color space. Returns the mapped point count.
    fn map_depth_frame_to_color(&mut self) -> Option<usize> {
        let mapper = self.ready_mapper(true, true)?;
        let len = self.depth.len();
        let width = self.depth.width();
        mapper.depth_frame_to_color(&self.depth, width, scratch(&mut self.scratch.depth_to_color, len));
        Some(len)
    }

    /// Color behind every depth pixel, channels in 0..1. Depth pixels that
    /// map outside the color frame get transparent black.
    pub fn float_colors_for_depth(&mut self) -> &[Vec4] {
        let Some(len) = self.map_depth_frame_to_color() else {
            return &[];
        };
        let out = scratch(&mut self.scratch.float_colors, len);
        for (color, point) in out.iter_mut().zip(&self.scratch.depth_to_color[..len]) {
            *color = sample(&self.color, *point).map_or(Vec4::ZERO, to_float_color);
        }
        out
    }

    /// [`Self::float_colors_for_depth`] as 8-bit RGBA
    pub fn colors_for_depth(&mut self) -> &[Rgba<u8>] {
        let Some(len) = self.map_depth_frame_to_color() else {
            return &[];
        };
        let out = scratch_with(&mut self.scratch.colors, len, TRANSPARENT);
        for (color, point) in out.iter_mut().zip(&self.scratch.depth_to_color[..len]) {
            *color = sample(&self.color, *point).unwrap_or(TRANSPARENT);
        }
        out
    }

    /// Depth-sized RGBA image of the color behind every depth pixel
    pub fn color_frame_for_depth(&mut self) -> Option<&ColorPixels> {
        let len = self.map_depth_frame_to_color()?;
        let (width, height) = self.depth.dimensions();

        // Reuse the previous image's storage. Truncating keeps its capacity.
        let mut raw = std::mem::take(&mut self.scratch.colorized).into_raw();
        let pixels = scratch(&mut raw, len * 4);
        for (color, point) in pixels.chunks_exact_mut(4).zip(&self.scratch.depth_to_color[..len]) {
            color.copy_from_slice(&sample(&self.color, *point).unwrap_or(TRANSPARENT).0);
        }
        raw.truncate(len * 4);

        self.scratch.colorized = ColorPixels::from_raw(width, height, raw)?;
        Some(&self.scratch.colorized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::{PinholeMapper, UNMAPPED};

    const W: u32 = 512;
    const H: u32 = 424;

    fn ready_mapper() -> Mapper {
        let mut mapper = Mapper::new();
        mapper.setup_with(Arc::new(PinholeMapper::with_color_resolution(192, 108)));
        let mut depth = ShortPixels::from_pixel(W, H, Luma([2000]));
        depth.put_pixel(0, 0, Luma([0]));
        mapper.set_depth_pixels(&depth);
        mapper
    }

    #[test]
    fn test_not_ready_returns_empty() {
        let mut mapper = Mapper::new();
        mapper.setup_with(Arc::new(PinholeMapper::kinect_v2()));

        assert!(!mapper.is_ready(true, false));
        assert_eq!(mapper.depth_to_camera(10, 10), Vec3::ZERO);
        assert_eq!(mapper.depth_to_color(10, 10), Vec2::ZERO);
        assert_eq!(mapper.camera_to_depth(Vec3::new(0.0, 0.0, 1.0)), Vec2::ZERO);
        assert!(mapper.depth_frame_to_camera().is_empty());
        assert!(mapper.depth_frame_to_color().is_empty());
        assert!(mapper.depth_points_to_camera(&[Vec2::ONE]).is_empty());
        assert!(mapper.depth_rect_to_color(DepthRect::new(0, 0, 4, 4)).is_empty());
        assert!(mapper.color_frame_to_depth().is_empty());
        assert!(mapper.color_frame_to_camera().is_empty());
        assert!(mapper.camera_points_to_depth(&[Vec3::Z]).is_empty());
        assert!(mapper.camera_points_to_color(&[Vec3::Z]).is_empty());
        assert!(mapper.colors_for_depth().is_empty());
        assert!(mapper.float_colors_for_depth().is_empty());
        assert!(mapper.color_frame_for_depth().is_none());

        // Single camera -> color needs no snapshot.
        assert_ne!(mapper.camera_to_color(Vec3::new(0.0, 0.0, 2.0)), Vec2::ZERO);
    }

    #[test]
    fn test_without_coordinate_mapper_nothing_is_ready() {
        let mut mapper = Mapper::new();
        mapper.set_depth_pixels(&ShortPixels::from_pixel(2, 2, Luma([1000])));
        assert!(!mapper.is_ready(true, false));
        assert_eq!(mapper.camera_to_color(Vec3::Z), Vec2::ZERO);
    }

    #[test]
    fn test_depth_frame_to_camera() {
        let mut mapper = ready_mapper();
        let points = mapper.depth_frame_to_camera();

        assert_eq!(points.len(), (W * H) as usize);
        assert_eq!(points[0].z, UNMAPPED);
        assert!((points[1].z - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_rect_honours_origin_and_clips() {
        let mut mapper = ready_mapper();

        let points = mapper.depth_rect_to_camera(DepthRect::new(W - 2, 10, 5, 2)).to_vec();
        assert_eq!(points.len(), 4);
        let expected = mapper.depth_to_camera(W - 2, 10);
        assert!((points[0] - expected).length() < 1e-6);

        assert!(mapper.depth_rect_to_color(DepthRect::new(W + 1, 0, 3, 3)).is_empty());
    }

    #[test]
    fn test_point_list_outside_frame_uses_zero_depth() {
        let mut mapper = ready_mapper();
        let points = mapper.depth_points_to_camera(&[Vec2::new(5.0, 5.0), Vec2::new(-1.0, 3.0), Vec2::new(9999.0, 0.0)]);

        assert_eq!(points.len(), 3);
        assert!(points[0].is_finite());
        assert_eq!(points[1].z, UNMAPPED);
        assert_eq!(points[2].z, UNMAPPED);
    }

    #[test]
    fn test_scratch_grows_but_results_are_sized_per_call() {
        let mut mapper = ready_mapper();
        assert_eq!(mapper.depth_frame_to_color().len(), (W * H) as usize);
        assert_eq!(mapper.depth_points_to_color(&[Vec2::new(1.0, 1.0)]).len(), 1);
        assert_eq!(mapper.scratch.depth_to_color.len(), (W * H) as usize);
    }

    #[test]
    fn test_camera_roundtrip_through_depth() {
        let mut mapper = ready_mapper();
        let camera = mapper.depth_to_camera(300, 200);
        let back = mapper.camera_to_depth(camera);
        assert!((back - Vec2::new(300.0, 200.0)).length() < 1e-2);

        let batch = mapper.camera_points_to_depth(&[camera, camera]);
        assert_eq!(batch.len(), 2);
    }

    #[test]
    fn test_colorize_needs_color_snapshot() {
        let mut mapper = ready_mapper();
        assert!(mapper.colors_for_depth().is_empty());

        mapper.set_color_pixels(&ColorPixels::from_pixel(192, 108, Rgba([10, 20, 30, 255])));
        let colors = mapper.colors_for_depth().to_vec();
        assert_eq!(colors.len(), (W * H) as usize);
        // Zero depth never maps into the color frame.
        assert_eq!(colors[0], TRANSPARENT);
        assert!(colors.contains(&Rgba([10, 20, 30, 255])));

        let floats = mapper.float_colors_for_depth();
        assert_eq!(floats[0], Vec4::ZERO);

        let image = mapper.color_frame_for_depth().unwrap();
        assert_eq!(image.dimensions(), (W, H));
        assert_eq!(*image.get_pixel(0, 0), TRANSPARENT);
    }

    #[test]
    fn test_whole_frame_uses_snapshot_width() {
        let mut mapper = Mapper::new();
        mapper.setup_with(Arc::new(PinholeMapper::kinect_v2()));
        mapper.set_depth_pixels(&ShortPixels::from_pixel(4, 4, Luma([2000])));

        let single = mapper.depth_to_camera(0, 1);
        let rect = mapper.depth_rect_to_camera(DepthRect::new(0, 0, 4, 4))[4];
        let frame = mapper.depth_frame_to_camera()[4];
        assert!((frame - single).length() < 1e-6);
        assert!((rect - single).length() < 1e-6);

        let single = mapper.depth_to_color(3, 2);
        let frame = mapper.depth_frame_to_color()[2 * 4 + 3];
        assert!((frame - single).length() < 1e-4);
    }

    #[test]
    fn test_colorized_storage_only_grows() {
        let mut mapper = ready_mapper();
        mapper.set_color_pixels(&ColorPixels::from_pixel(192, 108, Rgba([1, 2, 3, 255])));
        assert_eq!(mapper.colors_for_depth().len(), (W * H) as usize);
        assert_eq!(mapper.color_frame_for_depth().unwrap().dimensions(), (W, H));
        let capacity = mapper.scratch.colorized.as_raw().capacity();

        mapper.set_depth_pixels(&ShortPixels::from_pixel(8, 8, Luma([2000])));
        assert_eq!(mapper.colors_for_depth().len(), 64);
        assert_eq!(mapper.color_frame_for_depth().unwrap().dimensions(), (8, 8));
        assert!(mapper.scratch.colorized.as_raw().capacity() >= capacity);
        assert!(mapper.scratch.colors.len() >= (W * H) as usize);
    }

    #[test]
    fn test_color_frame_to_depth_sized_to_color() {
        let mut mapper = ready_mapper();
        let points = mapper.color_frame_to_depth();
        assert_eq!(points.len(), 192 * 108);
        assert!(points.iter().any(|p| p.is_finite()));
    }
}
