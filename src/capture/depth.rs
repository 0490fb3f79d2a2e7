use glam::Vec2;
use image::Luma;

use super::frame::{Modality, PixelFormat, ShortPixels};
use super::stream::{Stream, StreamKind};
use crate::error::DecodeError;
use crate::pipeline::Allocate;
use crate::sensor::{FramePayload, RawFrame};
use crate::CONFIG;

/// Linearly map `src` from `[near, far]` onto `[0, 65535]`, clamping values
/// outside the range. `invert` swaps near and far before mapping.
pub fn remap_to_range(src: &ShortPixels, dst: &mut ShortPixels, near: u16, far: u16, invert: bool) {
    dst.allocate(src.width(), src.height());

    let (near, far) = if invert { (far, near) } else { (near, far) };
    let (near, far) = (near as f32, far as f32);
    let span = far - near;

    for (out, &value) in dst.iter_mut().zip(src.iter()) {
        *out = if span.abs() < f32::EPSILON {
            0
        } else {
            let t = ((value as f32 - near) / span).clamp(0.0, 1.0);
            (t * u16::MAX as f32) as u16
        };
    }
}

/// Depth decoding state. Near/far/invert only drive the visualization views;
/// the decoded buffer always holds raw millimetres.
#[derive(Debug, Clone)]
pub struct DepthDecoder {
    near: u16,
    far: u16,
    invert: bool,
    reliable: Option<(u16, u16)>,
}

impl Default for DepthDecoder {
    fn default() -> Self {
        let config = CONFIG.load();
        Self {
            near: config.depth.near,
            far: config.depth.far,
            invert: config.depth.invert,
            reliable: None,
        }
    }
}

impl StreamKind for DepthDecoder {
    const MODALITY: Modality = Modality::Depth;
    type Pixels = ShortPixels;

    fn decode(&mut self, frame: &RawFrame, back: &mut ShortPixels) -> Result<PixelFormat, DecodeError> {
        let FramePayload::Depth {
            samples,
            min_reliable_distance,
            max_reliable_distance,
        } = &frame.payload
        else {
            return Err(DecodeError::WrongModality {
                expected: Modality::Depth,
                found: frame.modality(),
            });
        };

        copy_samples(samples, frame, back)?;
        self.reliable = Some((*min_reliable_distance, *max_reliable_distance));
        Ok(PixelFormat::Gray16)
    }

    fn release(&mut self) {
        self.reliable = None;
    }
}

/// Validate and copy a 16-bit sample buffer into `back`.
pub(crate) fn copy_samples(samples: &[u16], frame: &RawFrame, back: &mut ShortPixels) -> Result<(), DecodeError> {
    let description = frame.description;
    let expected = description.pixel_count();
    if samples.len() < expected {
        return Err(DecodeError::BufferSize {
            expected,
            actual: samples.len(),
        });
    }

    back.allocate(description.width, description.height);
    back.copy_from_slice(&samples[..expected]);
    Ok(())
}

/// Raw depth in millimetres
pub type DepthStream = Stream<DepthDecoder>;

impl Stream<DepthDecoder> {
    pub fn near(&self) -> u16 {
        self.kind().near
    }

    pub fn set_near(&self, near: u16) {
        self.kind().near = near;
    }

    pub fn far(&self) -> u16 {
        self.kind().far
    }

    pub fn set_far(&self, far: u16) {
        self.kind().far = far;
    }

    pub fn is_invert(&self) -> bool {
        self.kind().invert
    }

    pub fn set_invert(&self, invert: bool) {
        self.kind().invert = invert;
    }

    /// Reliable range reported with the last decoded frame, in millimetres
    pub fn reliable_distance(&self) -> Option<(u16, u16)> {
        self.kind().reliable
    }

    /// Use the reported reliable range as near/far. Returns `false` when no
    /// frame has reported one yet.
    pub fn apply_reliable_distance(&self) -> bool {
        let mut kind = self.kind();
        match kind.reliable {
            Some((near, far)) => {
                kind.near = near;
                kind.far = far;
                true
            }
            None => false,
        }
    }

    /// Depth at a front buffer pixel, 0 outside the frame
    pub fn depth_at(&self, x: u32, y: u32) -> u16 {
        let pixels = self.pixels();
        pixels.get_pixel_checked(x, y).map_or(0, |&Luma([depth])| depth)
    }

    pub fn depth_at_point(&self, point: Vec2) -> u16 {
        if point.x < 0.0 || point.y < 0.0 || !point.is_finite() {
            return 0;
        }
        self.depth_at(point.x as u32, point.y as u32)
    }

    /// Front buffer remapped to the current near/far/invert settings,
    /// computed on every call
    pub fn remapped_pixels(&self) -> ShortPixels {
        let (near, far, invert) = {
            let kind = self.kind();
            (kind.near, kind.far, kind.invert)
        };
        self.pixels_in_range(near, far, invert)
    }

    pub fn pixels_in_range(&self, near: u16, far: u16, invert: bool) -> ShortPixels {
        let mut out = ShortPixels::default();
        remap_to_range(&self.pixels(), &mut out, near, far, invert);
        out
    }
}
