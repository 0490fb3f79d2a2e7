//! Pinhole camera model used by the bundled backends.
//!
//! Reference values are the factory presets commonly reported for Kinect v2:
//! a 512x424 depth/IR camera and a 1920x1080 color camera mounted 5.2cm to
//! its side. Camera space is right-handed with +Y up and +Z pointing away
//! from the sensor.

use glam::{Vec2, Vec3};

use super::{CameraSpacePoint, ColorSpacePoint, CoordinateMapper, DepthSpacePoint, UNMAPPED};
use crate::capture::frame::FieldOfView;

/// Intrinsic parameters of one camera
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraIntrinsics {
    pub width: u32,
    pub height: u32,
    /// Focal length x (pixel)
    pub fx: f32,
    /// Focal length y (pixel)
    pub fy: f32,
    /// Principal point x (pixel)
    pub cx: f32,
    /// Principal point y (pixel)
    pub cy: f32,
}

impl CameraIntrinsics {
    pub const KINECT_V2_DEPTH: Self = Self {
        width: 512,
        height: 424,
        fx: 365.456,
        fy: 365.456,
        cx: 254.878,
        cy: 205.395,
    };

    pub const KINECT_V2_COLOR: Self = Self {
        width: 1920,
        height: 1080,
        fx: 1081.372,
        fy: 1081.372,
        cx: 959.5,
        cy: 539.5,
    };

    /// Same optics at a different resolution.
    pub fn scaled(&self, width: u32, height: u32) -> Self {
        let sx = width as f32 / self.width as f32;
        let sy = height as f32 / self.height as f32;
        Self {
            width,
            height,
            fx: self.fx * sx,
            fy: self.fy * sy,
            cx: self.cx * sx,
            cy: self.cy * sy,
        }
    }

    pub fn field_of_view(&self) -> FieldOfView {
        let w = self.width as f32;
        let h = self.height as f32;
        let diagonal_focal = (self.fx * self.fx + self.fy * self.fy).sqrt() / std::f32::consts::SQRT_2;
        FieldOfView {
            horizontal: 2.0 * (w / (2.0 * self.fx)).atan().to_degrees(),
            vertical: 2.0 * (h / (2.0 * self.fy)).atan().to_degrees(),
            diagonal: 2.0 * ((w * w + h * h).sqrt() / (2.0 * diagonal_focal)).atan().to_degrees(),
        }
    }

    /// Pixel + depth in meters -> camera space.
    #[inline]
    pub fn unproject(&self, pixel: Vec2, z: f32) -> Vec3 {
        Vec3::new(
            (pixel.x - self.cx) * z / self.fx,
            (self.cy - pixel.y) * z / self.fy,
            z,
        )
    }

    /// Camera space -> pixel. Points at or behind the image plane are unmapped.
    #[inline]
    pub fn project(&self, point: Vec3) -> Vec2 {
        if point.z <= f32::EPSILON || !point.is_finite() {
            return Vec2::splat(UNMAPPED);
        }
        Vec2::new(
            point.x * self.fx / point.z + self.cx,
            self.cy - point.y * self.fy / point.z,
        )
    }
}

/// Depth/color mapping through two pinhole cameras and a fixed baseline.
#[derive(Debug, Clone, Copy)]
pub struct PinholeMapper {
    pub depth: CameraIntrinsics,
    pub color: CameraIntrinsics,
    /// Position of the color camera in camera space
    pub color_offset: Vec3,
}

impl PinholeMapper {
    pub fn new(depth: CameraIntrinsics, color: CameraIntrinsics) -> Self {
        Self {
            depth,
            color,
            color_offset: Vec3::new(0.052, 0.0, 0.0),
        }
    }

    pub fn kinect_v2() -> Self {
        Self::new(CameraIntrinsics::KINECT_V2_DEPTH, CameraIntrinsics::KINECT_V2_COLOR)
    }

    /// Kinect v2 depth optics with the color camera scaled to `width`x`height`.
    pub fn with_color_resolution(width: u32, height: u32) -> Self {
        Self::new(
            CameraIntrinsics::KINECT_V2_DEPTH,
            CameraIntrinsics::KINECT_V2_COLOR.scaled(width, height),
        )
    }
}

impl CoordinateMapper for PinholeMapper {
    fn depth_frame_size(&self) -> (u32, u32) {
        (self.depth.width, self.depth.height)
    }

    fn color_frame_size(&self) -> (u32, u32) {
        (self.color.width, self.color.height)
    }

    fn depth_point_to_camera(&self, point: DepthSpacePoint, depth: u16) -> CameraSpacePoint {
        if depth == 0 {
            return Vec3::splat(UNMAPPED);
        }
        self.depth.unproject(point, depth as f32 / 1000.0)
    }

    fn depth_point_to_color(&self, point: DepthSpacePoint, depth: u16) -> ColorSpacePoint {
        if depth == 0 {
            return Vec2::splat(UNMAPPED);
        }
        self.camera_point_to_color(self.depth.unproject(point, depth as f32 / 1000.0))
    }

    fn camera_point_to_depth(&self, point: CameraSpacePoint) -> DepthSpacePoint {
        self.depth.project(point)
    }

    fn camera_point_to_color(&self, point: CameraSpacePoint) -> ColorSpacePoint {
        self.color.project(point - self.color_offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unproject_project_principal_point() {
        let depth = CameraIntrinsics::KINECT_V2_DEPTH;
        let center = Vec2::new(depth.cx, depth.cy);

        let point = depth.unproject(center, 2.0);
        assert!(point.x.abs() < 1e-5 && point.y.abs() < 1e-5);
        assert_eq!(point.z, 2.0);

        let back = depth.project(point);
        assert!((back - center).length() < 1e-3);
    }

    #[test]
    fn test_zero_depth_is_unmapped() {
        let mapper = PinholeMapper::kinect_v2();
        let camera = mapper.depth_point_to_camera(Vec2::new(10.0, 10.0), 0);
        assert_eq!(camera.z, UNMAPPED);
        let color = mapper.depth_point_to_color(Vec2::new(10.0, 10.0), 0);
        assert_eq!(color.x, UNMAPPED);
    }

    #[test]
    fn test_point_behind_sensor_is_unmapped() {
        let mapper = PinholeMapper::kinect_v2();
        let depth = mapper.camera_point_to_depth(Vec3::new(0.1, 0.1, -1.0));
        assert_eq!(depth, Vec2::splat(UNMAPPED));
    }

    #[test]
    fn test_scaled_intrinsics_keep_field_of_view() {
        let full = CameraIntrinsics::KINECT_V2_COLOR;
        let small = full.scaled(192, 108);
        let a = full.field_of_view();
        let b = small.field_of_view();
        assert!((a.horizontal - b.horizontal).abs() < 0.01);
        assert!((a.vertical - b.vertical).abs() < 0.01);
        assert!((a.horizontal - 83.2).abs() < 0.5);
    }

    #[test]
    fn test_color_frame_to_depth_covers_subject() {
        let mapper = PinholeMapper::with_color_resolution(192, 108);
        let depth = vec![2000u16; 512 * 424];
        let mut out = vec![Vec2::ZERO; 192 * 108];

        mapper.color_frame_to_depth(&depth, 512, &mut out);

        // Center of the color image sees the flat wall.
        let center = out[54 * 192 + 96];
        assert!(center.is_finite());
        assert!(center.x >= 0.0 && center.x < 512.0);
        assert!(center.y >= 0.0 && center.y < 424.0);
    }
}
