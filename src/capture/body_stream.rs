use std::sync::Arc;

use tracing::warn;

use super::body::{Body, BODY_COUNT};
use super::frame::{Modality, PixelFormat};
use super::stream::{Stream, StreamKind};
use crate::error::{DecodeError, SensorError};
use crate::pipeline::DoubleBuffer;
use crate::sensor::{CoordinateMapper, FramePayload, RawFrame, Sensor};

/// Body decoding state: the coordinate mapper used to project joints.
#[derive(Default)]
pub struct BodyDecoder {
    mapper: Option<Arc<dyn CoordinateMapper>>,
}

impl StreamKind for BodyDecoder {
    const MODALITY: Modality = Modality::Body;
    type Pixels = Vec<Body>;

    fn prepare(&mut self, sensor: &dyn Sensor, pixels: &mut DoubleBuffer<Vec<Body>>) -> Result<(), SensorError> {
        pixels.front_mut().resize_with(BODY_COUNT, Body::default);
        pixels.back_mut().resize_with(BODY_COUNT, Body::default);

        self.mapper = match sensor.coordinate_mapper() {
            Ok(mapper) => Some(mapper),
            Err(e) => {
                warn!("Joints will not be projected: {}", e);
                None
            }
        };
        Ok(())
    }

    fn decode(&mut self, frame: &RawFrame, back: &mut Vec<Body>) -> Result<PixelFormat, DecodeError> {
        let FramePayload::Body { bodies } = &frame.payload else {
            return Err(DecodeError::WrongModality {
                expected: Modality::Body,
                found: frame.modality(),
            });
        };

        if back.len() != BODY_COUNT {
            back.resize_with(BODY_COUNT, Body::default);
        }

        let mapper = self.mapper.as_deref();
        for (i, slot) in back.iter_mut().enumerate() {
            match bodies.get(i).and_then(Option::as_ref) {
                Some(raw) => slot.update(raw, mapper),
                None => slot.mark_untracked(),
            }
        }
        Ok(PixelFormat::Skeleton)
    }

    fn release(&mut self) {
        self.mapper = None;
    }
}

/// Skeleton tracking, one slot per trackable body
pub type BodyStream = Stream<BodyDecoder>;

impl Stream<BodyDecoder> {
    /// Snapshot of every body slot in the front buffer
    pub fn bodies(&self) -> Vec<Body> {
        self.pixels().clone()
    }

    pub fn tracked_bodies(&self) -> Vec<Body> {
        self.pixels().iter().filter(|body| body.is_tracked()).cloned().collect()
    }

    /// Tracked body with the given tracking id
    pub fn body_by_id(&self, tracking_id: u64) -> Option<Body> {
        self.pixels()
            .iter()
            .find(|body| body.is_tracked() && body.id() == tracking_id)
            .cloned()
    }

    pub fn num_bodies(&self) -> usize {
        self.pixels().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::body::RawBody;

    #[test]
    fn test_missing_slots_become_untracked() {
        let mut decoder = BodyDecoder::default();
        let mut back = vec![Body::default(); BODY_COUNT];
        let tracked = RawBody {
            tracking_id: 7,
            is_tracked: true,
            ..RawBody::untracked()
        };

        decoder
            .decode(&RawFrame::bodies(1, vec![None, Some(tracked)]), &mut back)
            .unwrap();
        assert!(back[1].is_tracked());
        assert_eq!(back[1].id(), 7);

        let format = decoder.decode(&RawFrame::bodies(2, vec![]), &mut back).unwrap();
        assert_eq!(format, PixelFormat::Skeleton);
        assert_eq!(back.len(), BODY_COUNT);
        assert!(back.iter().all(|body| !body.is_tracked()));
    }
}
