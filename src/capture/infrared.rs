use image::Luma;

use super::depth::copy_samples;
use super::frame::{Modality, PixelFormat, ShortPixels};
use super::stream::{Stream, StreamKind};
use crate::error::DecodeError;
use crate::sensor::{FramePayload, RawFrame};

#[derive(Debug, Clone, Copy, Default)]
pub struct InfraredDecoder;

impl StreamKind for InfraredDecoder {
    const MODALITY: Modality = Modality::Infrared;
    type Pixels = ShortPixels;

    fn decode(&mut self, frame: &RawFrame, back: &mut ShortPixels) -> Result<PixelFormat, DecodeError> {
        let FramePayload::Infrared { samples } = &frame.payload else {
            return Err(DecodeError::WrongModality {
                expected: Modality::Infrared,
                found: frame.modality(),
            });
        };

        copy_samples(samples, frame, back)?;
        Ok(PixelFormat::Gray16)
    }
}

/// 16-bit active infrared intensity
pub type IrStream = Stream<InfraredDecoder>;

impl Stream<InfraredDecoder> {
    /// Intensity at a front buffer pixel, 0 outside the frame
    pub fn ir_at(&self, x: u32, y: u32) -> u16 {
        self.pixels().get_pixel_checked(x, y).map_or(0, |&Luma([value])| value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_copies_samples() {
        let mut back = ShortPixels::default();
        let frame = RawFrame::infrared(1, 2, 2, vec![1u16, 2, 3, 4]);
        let format = InfraredDecoder.decode(&frame, &mut back).unwrap();
        assert_eq!(format, PixelFormat::Gray16);
        assert_eq!(back.dimensions(), (2, 2));
        assert_eq!(back.get_pixel(1, 1).0, [4]);
    }

    #[test]
    fn test_short_frame_is_rejected() {
        let mut back = ShortPixels::from_raw(1, 1, vec![42]).unwrap();
        let frame = RawFrame::infrared(1, 2, 2, vec![1u16]);
        assert!(InfraredDecoder.decode(&frame, &mut back).is_err());
        assert_eq!(back.as_raw(), &vec![42]);
    }
}
