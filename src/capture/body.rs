//! Skeletal body tracking: joints, hand and lean state, bone topology

use glam::{Vec2, Vec3};
use serde::{Deserialize, Serialize};

use crate::sensor::CoordinateMapper;

/// Simultaneously tracked bodies per frame
pub const BODY_COUNT: usize = 6;

/// Joints per body
pub const JOINT_COUNT: usize = 25;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum JointType {
    SpineBase = 0,
    SpineMid,
    Neck,
    Head,
    ShoulderLeft,
    ElbowLeft,
    WristLeft,
    HandLeft,
    ShoulderRight,
    ElbowRight,
    WristRight,
    HandRight,
    HipLeft,
    KneeLeft,
    AnkleLeft,
    FootLeft,
    HipRight,
    KneeRight,
    AnkleRight,
    FootRight,
    SpineShoulder,
    HandTipLeft,
    ThumbLeft,
    HandTipRight,
    ThumbRight,
}

impl JointType {
    pub const ALL: [JointType; JOINT_COUNT] = [
        JointType::SpineBase,
        JointType::SpineMid,
        JointType::Neck,
        JointType::Head,
        JointType::ShoulderLeft,
        JointType::ElbowLeft,
        JointType::WristLeft,
        JointType::HandLeft,
        JointType::ShoulderRight,
        JointType::ElbowRight,
        JointType::WristRight,
        JointType::HandRight,
        JointType::HipLeft,
        JointType::KneeLeft,
        JointType::AnkleLeft,
        JointType::FootLeft,
        JointType::HipRight,
        JointType::KneeRight,
        JointType::AnkleRight,
        JointType::FootRight,
        JointType::SpineShoulder,
        JointType::HandTipLeft,
        JointType::ThumbLeft,
        JointType::HandTipRight,
        JointType::ThumbRight,
    ];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }
}

/// Per-joint tracking confidence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TrackingState {
    #[default]
    NotTracked,
    Inferred,
    Tracked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum HandState {
    #[default]
    Unknown,
    NotTracked,
    Open,
    Closed,
    Lasso,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Joint {
    pub joint_type: JointType,
    /// Camera space position in meters
    pub position: Vec3,
    pub tracking_state: TrackingState,
}

impl Joint {
    pub fn new(joint_type: JointType, position: Vec3, tracking_state: TrackingState) -> Self {
        Self {
            joint_type,
            position,
            tracking_state,
        }
    }
}

fn untracked_joints() -> [Joint; JOINT_COUNT] {
    JointType::ALL.map(|joint_type| Joint::new(joint_type, Vec3::ZERO, TrackingState::NotTracked))
}

/// Body slot as delivered by a body frame reader
#[derive(Debug, Clone, PartialEq)]
pub struct RawBody {
    pub tracking_id: u64,
    pub is_tracked: bool,
    pub joints: [Joint; JOINT_COUNT],
    pub hand_left: HandState,
    pub hand_right: HandState,
    pub lean: Vec2,
    pub lean_state: TrackingState,
}

impl RawBody {
    pub fn untracked() -> Self {
        Self {
            tracking_id: 0,
            is_tracked: false,
            joints: untracked_joints(),
            hand_left: HandState::Unknown,
            hand_right: HandState::Unknown,
            lean: Vec2::ZERO,
            lean_state: TrackingState::NotTracked,
        }
    }

    pub fn tracked(tracking_id: u64, joints: [Joint; JOINT_COUNT]) -> Self {
        Self {
            tracking_id,
            is_tracked: true,
            joints,
            ..Self::untracked()
        }
    }
}

/// Skeleton connectivity: torso, two arms (with thumbs), two legs.
pub const BONES: [(JointType, JointType); 24] = [
    (JointType::Head, JointType::Neck),
    (JointType::Neck, JointType::SpineShoulder),
    (JointType::SpineShoulder, JointType::SpineMid),
    (JointType::SpineMid, JointType::SpineBase),
    (JointType::SpineShoulder, JointType::ShoulderLeft),
    (JointType::SpineShoulder, JointType::ShoulderRight),
    (JointType::SpineBase, JointType::HipLeft),
    (JointType::SpineBase, JointType::HipRight),
    (JointType::ShoulderLeft, JointType::ElbowLeft),
    (JointType::ElbowLeft, JointType::WristLeft),
    (JointType::WristLeft, JointType::HandLeft),
    (JointType::HandLeft, JointType::HandTipLeft),
    (JointType::WristLeft, JointType::ThumbLeft),
    (JointType::ShoulderRight, JointType::ElbowRight),
    (JointType::ElbowRight, JointType::WristRight),
    (JointType::WristRight, JointType::HandRight),
    (JointType::HandRight, JointType::HandTipRight),
    (JointType::WristRight, JointType::ThumbRight),
    (JointType::HipLeft, JointType::KneeLeft),
    (JointType::KneeLeft, JointType::AnkleLeft),
    (JointType::AnkleLeft, JointType::FootLeft),
    (JointType::HipRight, JointType::KneeRight),
    (JointType::KneeRight, JointType::AnkleRight),
    (JointType::AnkleRight, JointType::FootRight),
];

/// How a visible bone should be rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoneStyle {
    /// Both ends tracked
    Tracked,
    /// One end tracked, the other inferred
    Inferred,
}

/// Visibility rule for a bone: hidden if either end is not tracked, or if
/// both ends are only inferred.
pub fn bone_style(a: TrackingState, b: TrackingState) -> Option<BoneStyle> {
    use TrackingState::*;
    match (a, b) {
        (NotTracked, _) | (_, NotTracked) => None,
        (Inferred, Inferred) => None,
        (Tracked, Tracked) => Some(BoneStyle::Tracked),
        _ => Some(BoneStyle::Inferred),
    }
}

/// A bone ready to draw, with both ends in color space
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bone {
    pub from: JointType,
    pub to: JointType,
    pub style: BoneStyle,
    pub start: Vec2,
    pub end: Vec2,
}

/// One tracked skeleton slot. Slots are reused by index every frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Body {
    id: u64,
    is_tracked: bool,
    joints: [Joint; JOINT_COUNT],
    joint_points: [Vec2; JOINT_COUNT],
    hand_left: HandState,
    hand_right: HandState,
    lean: Vec2,
    lean_state: TrackingState,
}

impl Default for Body {
    fn default() -> Self {
        Self {
            id: 0,
            is_tracked: false,
            joints: untracked_joints(),
            joint_points: [Vec2::ZERO; JOINT_COUNT],
            hand_left: HandState::Unknown,
            hand_right: HandState::Unknown,
            lean: Vec2::ZERO,
            lean_state: TrackingState::NotTracked,
        }
    }
}

impl Body {
    /// Refresh the slot from a reader body. Joint data is only copied for
    /// tracked bodies; an untracked slot keeps its last skeleton.
    pub fn update(&mut self, raw: &RawBody, mapper: Option<&dyn CoordinateMapper>) {
        self.id = raw.tracking_id;
        self.is_tracked = raw.is_tracked;
        if !raw.is_tracked {
            return;
        }

        self.joints = raw.joints;
        self.hand_left = raw.hand_left;
        self.hand_right = raw.hand_right;
        self.lean = raw.lean;
        self.lean_state = raw.lean_state;

        for (point, joint) in self.joint_points.iter_mut().zip(&self.joints) {
            // Color-space coordinates are used directly as screen coordinates.
            *point = match mapper {
                Some(mapper) => mapper.camera_point_to_color(joint.position),
                None => Vec2::ZERO,
            };
        }
    }

    pub fn mark_untracked(&mut self) {
        self.is_tracked = false;
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn is_tracked(&self) -> bool {
        self.is_tracked
    }

    pub fn joints(&self) -> &[Joint; JOINT_COUNT] {
        &self.joints
    }

    pub fn joint(&self, joint_type: JointType) -> &Joint {
        &self.joints[joint_type.index()]
    }

    /// Color-space projection of a joint
    pub fn joint_point(&self, joint_type: JointType) -> Vec2 {
        self.joint_points[joint_type.index()]
    }

    pub fn joint_points(&self) -> &[Vec2; JOINT_COUNT] {
        &self.joint_points
    }

    pub fn hand_left(&self) -> HandState {
        self.hand_left
    }

    pub fn hand_right(&self) -> HandState {
        self.hand_right
    }

    /// Lean direction, -1..1 on each axis
    pub fn lean(&self) -> Vec2 {
        self.lean
    }

    pub fn lean_state(&self) -> TrackingState {
        self.lean_state
    }

    /// Bones that pass the visibility rule. Empty for untracked bodies.
    pub fn visible_bones(&self) -> impl Iterator<Item = Bone> + '_ {
        BONES
            .iter()
            .filter(move |_| self.is_tracked)
            .filter_map(move |&(from, to)| {
                let style = bone_style(self.joint(from).tracking_state, self.joint(to).tracking_state)?;
                Some(Bone {
                    from,
                    to,
                    style,
                    start: self.joint_point(from),
                    end: self.joint_point(to),
                })
            })
    }

    /// Joints with full tracking confidence
    pub fn tracked_joints(&self) -> impl Iterator<Item = &Joint> + '_ {
        self.joints
            .iter()
            .filter(move |joint| self.is_tracked && joint.tracking_state == TrackingState::Tracked)
    }
}
