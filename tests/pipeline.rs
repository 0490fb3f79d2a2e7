use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use glam::{Vec2, Vec3};
use kinect2_stream::capture::body::{Joint, JointType, RawBody, TrackingState, JOINT_COUNT};
use kinect2_stream::capture::body_index::NO_BODY;
use kinect2_stream::capture::{
    BodyIndexStream, BodyStream, BoneStyle, ColorFormat, ColorStream, DepthStream, Device, IrStream, Modality,
    StreamState,
};
use kinect2_stream::sensor::{FixedCameraSettings, RawFrame, ScriptedSensor, Sensor, VirtualSensor};
use kinect2_stream::{Mapper, SimulationConfig, StreamError};

fn wait_for<F: Fn() -> bool>(condition: F) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out");
        thread::sleep(Duration::from_millis(1));
    }
}

fn device_with(sensor: Arc<dyn Sensor>) -> Device {
    let mut device = Device::new();
    device.setup_with(|| Some(sensor)).unwrap();
    device
}

fn skeleton(id: u64, state: impl Fn(JointType) -> TrackingState) -> RawBody {
    let joints: [Joint; JOINT_COUNT] = JointType::ALL.map(|joint_type| {
        let offset = joint_type.index() as f32 * 0.01;
        Joint::new(joint_type, Vec3::new(offset, offset, 2.0), state(joint_type))
    });
    RawBody::tracked(id, joints)
}

#[test]
fn test_color_stream_with_camera_settings() {
    let settings = FixedCameraSettings {
        exposure_time: Some(1000),
        frame_interval: Some(333_333),
        gain: Some(1.5),
        gamma: None,
    };
    let sensor = Arc::new(ScriptedSensor::new().with_camera_settings(Arc::new(settings)));
    let mut device = device_with(sensor.clone());

    let mut color = ColorStream::new();
    color.setup(&mut device).unwrap();
    color.open().unwrap();

    assert_eq!(color.exposure_time(), 1000);
    assert_eq!(color.frame_interval(), 333_333);
    assert_eq!(color.gain(), 1.5);
    assert_eq!(color.gamma(), 0.0);

    sensor.push(RawFrame::color(
        7,
        2,
        1,
        ColorFormat::Bgra,
        vec![30u8, 20, 10, 255, 0, 0, 0, 255],
    ));
    wait_for(|| color.texture_needs_update());
    assert!(color.update());

    assert_eq!(color.color_at(0, 0).0, [10, 20, 30, 255]);
    assert_eq!(color.color_at(5, 5).0, [0, 0, 0, 0]);
    assert_eq!(color.float_color_at(1, 0).w, 1.0);

    color.close();
    assert_eq!(color.exposure_time(), 0);
}

#[test]
fn test_depth_range_and_reliable_distance() {
    let sensor = Arc::new(ScriptedSensor::new());
    let mut device = device_with(sensor.clone());

    let mut depth = DepthStream::new();
    depth.setup(&mut device).unwrap();
    depth.open().unwrap();
    assert_eq!((depth.near(), depth.far(), depth.is_invert()), (50, 10000, false));
    assert_eq!(depth.reliable_distance(), None);
    assert!(!depth.apply_reliable_distance());

    sensor.push(RawFrame::depth(1, 3, 1, vec![0u16, 5000, 10000]));
    wait_for(|| depth.texture_needs_update());
    depth.update();

    assert_eq!(depth.depth_at(1, 0), 5000);
    assert_eq!(depth.depth_at_point(Vec2::new(-1.0, 0.0)), 0);
    assert_eq!(depth.reliable_distance(), Some((500, 4500)));
    // Only applied on request.
    assert_eq!(depth.far(), 10000);

    let view = depth.pixels_in_range(0, 10000, true);
    assert_eq!(view.as_raw(), &vec![65535, 32767, 0]);

    assert!(depth.apply_reliable_distance());
    assert_eq!((depth.near(), depth.far()), (500, 4500));
    let remapped = depth.remapped_pixels();
    assert_eq!(remapped.as_raw()[0], 0);
    assert_eq!(remapped.as_raw()[2], 65535);
}

#[test]
fn test_body_index_and_infrared() {
    let sensor = Arc::new(ScriptedSensor::new());
    let mut device = device_with(sensor.clone());

    let mut body_index = BodyIndexStream::new();
    let mut ir = IrStream::new();
    body_index.setup(&mut device).unwrap();
    ir.setup(&mut device).unwrap();
    body_index.open().unwrap();
    ir.open().unwrap();

    sensor.push(RawFrame::body_index(1, 2, 1, vec![2u8, NO_BODY]));
    sensor.push(RawFrame::infrared(1, 2, 1, vec![100u16, 200]));
    wait_for(|| body_index.texture_needs_update() && ir.texture_needs_update());
    body_index.update();
    ir.update();

    assert_eq!(body_index.index_at(0, 0), 2);
    assert_eq!(body_index.index_at(1, 0), NO_BODY);
    assert_eq!(body_index.pixels().colors.get_pixel(1, 0).0[3], 0);
    assert_eq!(ir.ir_at(1, 0), 200);

    // Closing the body index stream releases its own reader only.
    body_index.close();
    assert!(!body_index.is_open());
    assert!(ir.is_open());
}

#[test]
fn test_body_stream_bones_and_lookup() {
    let sensor = Arc::new(ScriptedSensor::new());
    let mut device = device_with(sensor.clone());

    let mut body = BodyStream::new();
    body.setup(&mut device).unwrap();
    body.open().unwrap();
    assert_eq!(body.num_bodies(), 6);

    let partial = skeleton(42, |joint| match joint {
        JointType::Head => TrackingState::Inferred,
        JointType::FootLeft | JointType::FootRight => TrackingState::NotTracked,
        _ => TrackingState::Tracked,
    });
    sensor.push(RawFrame::bodies(1, vec![None, Some(partial), None]));
    wait_for(|| body.texture_needs_update());
    body.update();

    assert_eq!(body.tracked_bodies().len(), 1);
    assert!(body.body_by_id(7).is_none());
    let tracked = body.body_by_id(42).unwrap();

    let bones: Vec<_> = tracked.visible_bones().collect();
    assert_eq!(bones.len(), 22);
    let head = bones.iter().find(|bone| bone.from == JointType::Head).unwrap();
    assert_eq!(head.style, BoneStyle::Inferred);
    assert!(bones.iter().all(|bone| bone.to != JointType::FootLeft));

    // Projected through the sensor's coordinate mapper.
    assert!(tracked.joint_point(JointType::SpineBase).x > 0.0);
}

#[test]
fn test_device_exit_closes_streams() {
    let sensor = Arc::new(ScriptedSensor::new());
    let mut device = device_with(sensor.clone());

    let mut depth = DepthStream::new();
    depth.setup(&mut device).unwrap();
    depth.open().unwrap();

    device.exit();

    assert_eq!(depth.state(), StreamState::Closed);
    assert!(!sensor.is_open());
    assert!(matches!(depth.open(), Err(StreamError::NotConfigured)));
    assert!(matches!(depth.setup(&mut device), Err(StreamError::DeviceNotOpen)));
}

#[test]
fn test_virtual_sensor_end_to_end() {
    let config = SimulationConfig {
        fps: 60,
        color_format: ColorFormat::Mjpeg,
        color_width: 192,
        color_height: 108,
        tracked_bodies: 1,
    };
    let mut device = device_with(Arc::new(VirtualSensor::new(&config)));

    let mut depth = DepthStream::new();
    let mut color = ColorStream::new();
    let mut body = BodyStream::new();
    depth.setup(&mut device).unwrap();
    color.setup(&mut device).unwrap();
    body.setup(&mut device).unwrap();
    depth.open().unwrap();
    color.open().unwrap();
    body.open().unwrap();
    assert_eq!(device.stream_count(), 3);
    assert!(color.frame_interval() > 0);

    let mut mapper = Mapper::new();
    mapper.setup(&device).unwrap();
    assert!(!mapper.is_ready(true, true));

    wait_for(|| depth.texture_needs_update() && color.texture_needs_update() && body.texture_needs_update());
    device.update();
    assert!(depth.is_frame_new());
    depth.update();
    color.update();
    body.update();

    assert_eq!((depth.width(), depth.height()), (512, 424));
    assert_eq!(color.frame().mode.resolution_x, 192);
    assert_eq!(body.tracked_bodies().len(), 1);

    mapper.set_depth(&depth);
    mapper.set_color(&color);
    assert!(mapper.is_ready(true, true));

    let colors = mapper.colors_for_depth();
    assert_eq!(colors.len(), 512 * 424);
    assert!(colors.iter().any(|c| c.0[3] == 255));

    let camera = mapper.depth_to_camera(256, 212);
    assert!(camera.z > 1.0 && camera.z < 4.5);

    device.exit();
    assert!(!depth.is_open() && !color.is_open() && !body.is_open());
    assert_eq!(depth.modality(), Modality::Depth);
}
