//! Clocked synthetic sensor.
//!
//! Renders a flat wall 4m away with one elliptical subject per simulated
//! body, each swaying left and right. Depth, infrared and body index come
//! from the same depth render, color from a gradient with the subjects
//! painted on top, and every subject carries a waving skeleton.
//!
//! Frames are produced lazily: a reader renders the current tick when asked
//! and reports nothing until the clock advances.

use std::f32::consts::TAU;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use glam::{Vec2, Vec3};
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use tracing::{debug, warn};

use super::{
    ColorCameraSettings, CoordinateMapper, FixedCameraSettings, FrameDescription, FrameReader, PinholeMapper,
    RawFrame, ReaderHandle, Sensor,
};
use crate::capture::body::{HandState, Joint, JointType, RawBody, TrackingState, BODY_COUNT, JOINT_COUNT};
use crate::capture::decoder::rgb_to_yuv;
use crate::capture::frame::{ColorFormat, Modality};
use crate::error::SensorError;
use crate::SimulationConfig;

const WALL_DEPTH_MM: u16 = 4000;
/// Left depth columns report no measurement, like the real sensor's edge.
const INVALID_COLUMNS: u32 = 8;
const SUBJECT_RADII: Vec2 = Vec2::new(0.25, 0.9);
const TRACKING_ID_BASE: u64 = 72_057_594_037_927_000;

const SUBJECT_COLORS: [[u8; 3]; BODY_COUNT] = [
    [224, 172, 105],
    [141, 85, 36],
    [255, 219, 172],
    [198, 134, 66],
    [241, 194, 125],
    [92, 58, 33],
];

/// Joint offsets from the subject center, in meters, in `JointType` order.
const SKELETON: [[f32; 3]; JOINT_COUNT] = [
    [0.0, -0.1, 0.0],     // SpineBase
    [0.0, 0.2, 0.0],      // SpineMid
    [0.0, 0.5, 0.0],      // Neck
    [0.0, 0.65, 0.0],     // Head
    [-0.18, 0.42, 0.0],   // ShoulderLeft
    [-0.3, 0.2, 0.0],     // ElbowLeft
    [-0.35, 0.0, 0.0],    // WristLeft
    [-0.37, -0.07, 0.0],  // HandLeft
    [0.18, 0.42, 0.0],    // ShoulderRight
    [0.3, 0.2, 0.0],      // ElbowRight
    [0.35, 0.0, 0.0],     // WristRight
    [0.37, -0.07, 0.0],   // HandRight
    [-0.1, -0.15, 0.0],   // HipLeft
    [-0.12, -0.55, 0.0],  // KneeLeft
    [-0.12, -0.9, 0.0],   // AnkleLeft
    [-0.12, -0.95, -0.08], // FootLeft
    [0.1, -0.15, 0.0],    // HipRight
    [0.12, -0.55, 0.0],   // KneeRight
    [0.12, -0.9, 0.0],    // AnkleRight
    [0.12, -0.95, -0.08], // FootRight
    [0.0, 0.42, 0.0],     // SpineShoulder
    [-0.38, -0.15, 0.0],  // HandTipLeft
    [-0.33, -0.08, -0.03], // ThumbLeft
    [0.38, -0.15, 0.0],   // HandTipRight
    [0.33, -0.08, -0.03], // ThumbRight
];

/// Joints that follow the waving right forearm
const WAVING: [JointType; 5] = [
    JointType::WristRight,
    JointType::HandRight,
    JointType::HandTipRight,
    JointType::ThumbRight,
    JointType::ElbowRight,
];

const HAND_CYCLE: [HandState; 3] = [HandState::Open, HandState::Closed, HandState::Lasso];

/// Animated scene shared by every reader of one sensor
#[derive(Debug, Clone)]
struct Scene {
    mapper: PinholeMapper,
    subjects: usize,
    color_format: ColorFormat,
}

impl Scene {
    /// Camera-space center of subject `i` at `t` seconds
    fn subject_center(&self, i: usize, t: f32) -> Vec3 {
        let phase = i as f32 * TAU / BODY_COUNT as f32;
        let x = (t * 0.5 + phase).sin() * 0.8 + (i as f32 - (self.subjects as f32 - 1.0) / 2.0) * 0.6;
        Vec3::new(x, 0.0, 2.0 + 0.35 * i as f32)
    }

    /// Depth in millimetres plus body index per depth pixel.
    fn render_depth(&self, t: f32) -> (Vec<u16>, Vec<u8>) {
        let intrinsics = self.mapper.depth;
        let count = intrinsics.width as usize * intrinsics.height as usize;
        let mut depth = vec![WALL_DEPTH_MM; count];
        let mut index = vec![u8::MAX; count];

        // Farthest first so nearer subjects overwrite.
        for i in (0..self.subjects).rev() {
            let center = self.subject_center(i, t);
            let pixel = intrinsics.project(center);
            let radii = Vec2::new(intrinsics.fx, intrinsics.fy) * SUBJECT_RADII / center.z;
            let z = (center.z * 1000.0) as u16;
            fill_ellipse(intrinsics.width, intrinsics.height, pixel, radii, |p| {
                depth[p] = z;
                index[p] = i as u8;
            });
        }

        for (p, (d, body)) in depth.iter_mut().zip(index.iter_mut()).enumerate() {
            if (p as u32 % intrinsics.width) < INVALID_COLUMNS {
                *d = 0;
                *body = u8::MAX;
            }
        }
        (depth, index)
    }

    fn render_infrared(&self, t: f32) -> Vec<u16> {
        let (depth, _) = self.render_depth(t);
        depth
            .into_iter()
            .map(|d| match d {
                0 => 0,
                d => (1.0e11 / (d as f32 * d as f32)).min(u16::MAX as f32) as u16,
            })
            .collect()
    }

    fn render_rgb(&self, t: f32) -> Vec<u8> {
        let intrinsics = self.mapper.color;
        let (width, height) = (intrinsics.width, intrinsics.height);
        let blue = (128.0 + 64.0 * t.sin()) as u8;
        let mut rgb = Vec::with_capacity(width as usize * height as usize * 3);
        for y in 0..height {
            for x in 0..width {
                rgb.extend_from_slice(&[(x * 255 / width.max(1)) as u8, (y * 255 / height.max(1)) as u8, blue]);
            }
        }

        for i in (0..self.subjects).rev() {
            let center = self.subject_center(i, t) - self.mapper.color_offset;
            let pixel = intrinsics.project(center);
            let radii = Vec2::new(intrinsics.fx, intrinsics.fy) * SUBJECT_RADII / center.z;
            let color = SUBJECT_COLORS[i % BODY_COUNT];
            fill_ellipse(width, height, pixel, radii, |p| {
                rgb[p * 3..p * 3 + 3].copy_from_slice(&color);
            });
        }
        rgb
    }

    fn render_color(&self, t: f32) -> Option<Bytes> {
        let rgb = self.render_rgb(t);
        let (width, height) = (self.mapper.color.width, self.mapper.color.height);

        let data: Vec<u8> = match self.color_format {
            ColorFormat::Rgba => rgb.chunks_exact(3).flat_map(|p| [p[0], p[1], p[2], 255]).collect(),
            ColorFormat::Bgra => rgb.chunks_exact(3).flat_map(|p| [p[2], p[1], p[0], 255]).collect(),
            ColorFormat::Yuy2 => rgb
                .chunks_exact(6)
                .flat_map(|p| {
                    let (y0, u, v) = rgb_to_yuv(p[0], p[1], p[2]);
                    let (y1, _, _) = rgb_to_yuv(p[3], p[4], p[5]);
                    [y0, u, y1, v]
                })
                .collect(),
            ColorFormat::Mjpeg => {
                let mut jpeg = Vec::new();
                if let Err(e) =
                    JpegEncoder::new_with_quality(&mut jpeg, 80).encode(&rgb, width, height, ExtendedColorType::Rgb8)
                {
                    warn!("Synthetic color encode failed: {}", e);
                    return None;
                }
                jpeg
            }
        };
        Some(Bytes::from(data))
    }

    fn render_bodies(&self, t: f32) -> Vec<Option<RawBody>> {
        (0..BODY_COUNT)
            .map(|i| {
                if i >= self.subjects {
                    return Some(RawBody::untracked());
                }
                let center = self.subject_center(i, t);
                let wave = Vec3::new(0.0, 0.15 * (t * 3.0 + i as f32).sin() + 0.25, -0.05);

                let joints = JointType::ALL.map(|joint_type| {
                    let [x, y, z] = SKELETON[joint_type.index()];
                    let mut position = center + Vec3::new(x, y, z);
                    if WAVING.contains(&joint_type) {
                        let reach = if joint_type == JointType::ElbowRight { 0.4 } else { 1.0 };
                        position += wave * reach;
                    }
                    let state = match joint_type {
                        JointType::FootLeft | JointType::FootRight => TrackingState::Inferred,
                        _ => TrackingState::Tracked,
                    };
                    Joint::new(joint_type, position, state)
                });

                let cycle = t as usize + i;
                Some(RawBody {
                    hand_left: HAND_CYCLE[cycle % HAND_CYCLE.len()],
                    hand_right: HAND_CYCLE[(cycle + 1) % HAND_CYCLE.len()],
                    lean: Vec2::new((t * 0.5 + i as f32).sin() * 0.3, 0.0),
                    lean_state: TrackingState::Tracked,
                    ..RawBody::tracked(TRACKING_ID_BASE + i as u64, joints)
                })
            })
            .collect()
    }

    fn render(&self, modality: Modality, t: f32, relative_time: u64) -> Option<RawFrame> {
        let depth = self.mapper.depth;
        let frame = match modality {
            Modality::Depth => RawFrame::depth(relative_time, depth.width, depth.height, self.render_depth(t).0),
            Modality::Infrared => RawFrame::infrared(relative_time, depth.width, depth.height, self.render_infrared(t)),
            Modality::BodyIndex => {
                RawFrame::body_index(relative_time, depth.width, depth.height, self.render_depth(t).1)
            }
            Modality::Color => {
                let color = self.mapper.color;
                RawFrame::color(relative_time, color.width, color.height, self.color_format, self.render_color(t)?)
            }
            Modality::Body => RawFrame::bodies(relative_time, self.render_bodies(t)),
        };
        Some(frame)
    }
}

fn fill_ellipse(width: u32, height: u32, center: Vec2, radii: Vec2, mut fill: impl FnMut(usize)) {
    if !center.is_finite() || radii.x <= 0.0 || radii.y <= 0.0 {
        return;
    }
    let x0 = (center.x - radii.x).floor().max(0.0) as u32;
    let x1 = ((center.x + radii.x).ceil().max(0.0) as u32).min(width);
    let y0 = (center.y - radii.y).floor().max(0.0) as u32;
    let y1 = ((center.y + radii.y).ceil().max(0.0) as u32).min(height);

    for y in y0..y1 {
        for x in x0..x1 {
            let d = (Vec2::new(x as f32, y as f32) - center) / radii;
            if d.length_squared() <= 1.0 {
                fill((y * width + x) as usize);
            }
        }
    }
}

/// Upper bound on the simulated frame rate
pub const MAX_FPS: u32 = 1000;

/// Synthetic sensor driven by the wall clock.
pub struct VirtualSensor {
    open: Arc<AtomicBool>,
    scene: Arc<Scene>,
    period: Duration,
    started: Instant,
    settings: Arc<FixedCameraSettings>,
}

impl VirtualSensor {
    pub fn new(config: &SimulationConfig) -> Self {
        let fps = config.fps.clamp(1, MAX_FPS);
        let period = Duration::from_secs(1) / fps;
        let period_ticks = period.as_nanos() as i64 / 100;
        // YUY2 packs pixel pairs.
        let color_width = match config.color_format {
            ColorFormat::Yuy2 => (config.color_width & !1).max(2),
            _ => config.color_width,
        };

        Self {
            open: Arc::new(AtomicBool::new(false)),
            scene: Arc::new(Scene {
                mapper: PinholeMapper::with_color_resolution(color_width, config.color_height),
                subjects: config.tracked_bodies.min(BODY_COUNT),
                color_format: config.color_format,
            }),
            period,
            started: Instant::now(),
            settings: Arc::new(FixedCameraSettings {
                exposure_time: Some(period_ticks / 2),
                frame_interval: Some(period_ticks),
                gain: Some(1.0),
                gamma: Some(2.2),
            }),
        }
    }
}

impl Sensor for VirtualSensor {
    fn name(&self) -> &str {
        "virtual"
    }

    fn open(&self) -> Result<(), SensorError> {
        self.open.store(true, Ordering::Release);
        Ok(())
    }

    fn close(&self) {
        self.open.store(false, Ordering::Release);
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn open_reader(&self, modality: Modality) -> Result<ReaderHandle, SensorError> {
        if !self.is_open() {
            return Err(SensorError::NotOpen);
        }
        debug!(%modality, "Virtual reader opened");
        let reader = VirtualReader {
            modality,
            open: Arc::clone(&self.open),
            scene: Arc::clone(&self.scene),
            started: self.started,
            period: self.period,
            last_tick: None,
        };
        Ok(ReaderHandle::new(modality, Box::new(reader)))
    }

    fn frame_description(&self, modality: Modality) -> Option<FrameDescription> {
        let depth = self.scene.mapper.depth;
        let color = self.scene.mapper.color;
        let description = match modality {
            Modality::Depth | Modality::Infrared => {
                FrameDescription::new(depth.width, depth.height, 2).with_field_of_view(depth.field_of_view())
            }
            Modality::BodyIndex => {
                FrameDescription::new(depth.width, depth.height, 1).with_field_of_view(depth.field_of_view())
            }
            Modality::Color => {
                let bytes_per_pixel = match self.scene.color_format {
                    ColorFormat::Yuy2 => 2,
                    _ => 4,
                };
                FrameDescription::new(color.width, color.height, bytes_per_pixel)
                    .with_field_of_view(color.field_of_view())
            }
            Modality::Body => return None,
        };
        Some(description)
    }

    fn coordinate_mapper(&self) -> Result<Arc<dyn CoordinateMapper>, SensorError> {
        Ok(Arc::new(self.scene.mapper))
    }

    fn color_camera_settings(&self) -> Option<Arc<dyn ColorCameraSettings>> {
        let settings: Arc<dyn ColorCameraSettings> = self.settings.clone();
        Some(settings)
    }
}

struct VirtualReader {
    modality: Modality,
    open: Arc<AtomicBool>,
    scene: Arc<Scene>,
    started: Instant,
    period: Duration,
    last_tick: Option<u64>,
}

impl FrameReader for VirtualReader {
    fn acquire_latest(&mut self) -> Option<RawFrame> {
        if !self.open.load(Ordering::Acquire) {
            return None;
        }

        let tick = (self.started.elapsed().as_nanos() / self.period.as_nanos()) as u64;
        if self.last_tick.is_some_and(|last| last >= tick) {
            return None;
        }
        self.last_tick = Some(tick);

        let t = (tick as f64 * self.period.as_secs_f64()) as f32;
        let relative_time = (tick + 1) * (self.period.as_nanos() as u64 / 100);
        self.scene.render(self.modality, t, relative_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SimulationConfig {
        SimulationConfig {
            fps: 30,
            color_format: ColorFormat::Rgba,
            color_width: 192,
            color_height: 108,
            tracked_bodies: 2,
        }
    }

    fn scene(config: &SimulationConfig) -> Scene {
        Scene {
            mapper: PinholeMapper::with_color_resolution(config.color_width, config.color_height),
            subjects: config.tracked_bodies,
            color_format: config.color_format,
        }
    }

    #[test]
    fn test_depth_has_wall_subject_and_invalid_edge() {
        let scene = scene(&config());
        let (depth, index) = scene.render_depth(0.0);

        assert_eq!(depth.len(), 512 * 424);
        assert_eq!(depth[0], 0);
        assert!(depth.contains(&WALL_DEPTH_MM));
        assert!(depth.iter().any(|&d| d > 0 && d < WALL_DEPTH_MM));
        assert!(index.contains(&0) && index.contains(&1));
        for (d, i) in depth.iter().zip(&index) {
            assert_eq!(*i == u8::MAX, *d == 0 || *d == WALL_DEPTH_MM);
        }
    }

    #[test]
    fn test_color_formats_have_expected_sizes() {
        for (format, size) in [
            (ColorFormat::Rgba, 192 * 108 * 4),
            (ColorFormat::Bgra, 192 * 108 * 4),
            (ColorFormat::Yuy2, 192 * 108 * 2),
        ] {
            let scene = scene(&SimulationConfig {
                color_format: format,
                ..config()
            });
            assert_eq!(scene.render_color(0.0).unwrap().len(), size);
        }
    }

    #[test]
    fn test_skeletons_track_subjects() {
        let scene = scene(&config());
        let bodies = scene.render_bodies(1.0);

        assert_eq!(bodies.len(), BODY_COUNT);
        let tracked: Vec<_> = bodies.iter().flatten().filter(|b| b.is_tracked).collect();
        assert_eq!(tracked.len(), 2);
        assert_ne!(tracked[0].tracking_id, tracked[1].tracking_id);
        assert_eq!(
            tracked[0].joints[JointType::FootLeft.index()].tracking_state,
            TrackingState::Inferred
        );
    }

    #[test]
    fn test_reader_waits_for_next_tick() {
        let sensor = VirtualSensor::new(&SimulationConfig { fps: 1, ..config() });
        assert!(sensor.open_reader(Modality::Depth).is_err());

        sensor.open().unwrap();
        let mut reader = sensor.open_reader(Modality::Depth).unwrap();
        let first = reader.acquire_latest().unwrap();
        assert_eq!(first.relative_time, 10_000_000);
        assert!(reader.acquire_latest().is_none());
    }

    #[test]
    fn test_frame_rate_is_clamped() {
        let sensor = VirtualSensor::new(&SimulationConfig { fps: u32::MAX, ..config() });
        assert_eq!(sensor.period, Duration::from_millis(1));
        let settings = sensor.color_camera_settings().unwrap();
        assert_eq!(settings.frame_interval(), Some(10_000));

        sensor.open().unwrap();
        let mut reader = sensor.open_reader(Modality::Depth).unwrap();
        assert!(reader.acquire_latest().is_some());

        let sensor = VirtualSensor::new(&SimulationConfig { fps: 0, ..config() });
        assert_eq!(sensor.period, Duration::from_secs(1));
    }

    #[test]
    fn test_yuy2_width_rounded_to_even() {
        let sensor = VirtualSensor::new(&SimulationConfig {
            color_format: ColorFormat::Yuy2,
            color_width: 191,
            ..config()
        });
        let description = sensor.frame_description(Modality::Color).unwrap();
        assert_eq!(description.width, 190);
        assert_eq!(sensor.scene.render_color(0.0).unwrap().len(), 190 * 108 * 2);
    }

    #[test]
    fn test_camera_settings_follow_fps() {
        let sensor = VirtualSensor::new(&config());
        let settings = sensor.color_camera_settings().unwrap();
        assert_eq!(settings.frame_interval(), Some(333_333));
    }
}
