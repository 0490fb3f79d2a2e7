use image::{GrayImage, Luma, Rgba};

use super::body::BODY_COUNT;
use super::frame::{ColorPixels, Modality, PixelFormat};
use super::stream::{Stream, StreamKind};
use crate::error::DecodeError;
use crate::pipeline::Allocate;
use crate::sensor::{FramePayload, RawFrame};

/// Index value for pixels that belong to no body
pub const NO_BODY: u8 = 255;

/// One opaque color per body slot
pub const PALETTE: [Rgba<u8>; BODY_COUNT] = [
    Rgba([255, 0, 0, 255]),
    Rgba([0, 255, 0, 255]),
    Rgba([0, 0, 255, 255]),
    Rgba([0, 255, 255, 255]),
    Rgba([255, 0, 255, 255]),
    Rgba([255, 255, 0, 255]),
];

/// Visualization color of a body index. Anything outside the palette,
/// [`NO_BODY`] included, is transparent black.
#[inline]
pub fn index_color(index: u8) -> Rgba<u8> {
    PALETTE.get(index as usize).copied().unwrap_or(Rgba([0, 0, 0, 0]))
}

/// Raw body indices plus their palette visualization
#[derive(Debug, Clone, Default)]
pub struct BodyIndexPixels {
    pub indices: GrayImage,
    pub colors: ColorPixels,
}

impl Allocate for BodyIndexPixels {
    fn allocate(&mut self, width: u32, height: u32) {
        self.indices.allocate(width, height);
        self.colors.allocate(width, height);
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BodyIndexDecoder;

impl StreamKind for BodyIndexDecoder {
    const MODALITY: Modality = Modality::BodyIndex;
    type Pixels = BodyIndexPixels;

    fn decode(&mut self, frame: &RawFrame, back: &mut BodyIndexPixels) -> Result<PixelFormat, DecodeError> {
        let FramePayload::BodyIndex { data } = &frame.payload else {
            return Err(DecodeError::WrongModality {
                expected: Modality::BodyIndex,
                found: frame.modality(),
            });
        };

        let description = frame.description;
        let expected = description.pixel_count();
        if data.len() < expected {
            return Err(DecodeError::BufferSize {
                expected,
                actual: data.len(),
            });
        }

        back.allocate(description.width, description.height);
        back.indices.copy_from_slice(&data[..expected]);
        for (color, &index) in back.colors.pixels_mut().zip(data.iter()) {
            *color = index_color(index);
        }
        Ok(PixelFormat::Index8)
    }
}

/// Per-pixel body membership
pub type BodyIndexStream = Stream<BodyIndexDecoder>;

impl Stream<BodyIndexDecoder> {
    /// Body index at a front buffer pixel, [`NO_BODY`] outside the frame
    pub fn index_at(&self, x: u32, y: u32) -> u8 {
        self.pixels()
            .indices
            .get_pixel_checked(x, y)
            .map_or(NO_BODY, |&Luma([index])| index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_body_is_transparent() {
        assert_eq!(index_color(NO_BODY).0[3], 0);
        assert_eq!(index_color(6).0[3], 0);
    }

    #[test]
    fn test_palette_is_distinct_and_opaque() {
        for (i, a) in (0..BODY_COUNT as u8).map(index_color).enumerate() {
            assert_eq!(a.0[3], 255);
            for b in (0..BODY_COUNT as u8).skip(i + 1).map(index_color) {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_decode_fills_both_views() {
        let mut back = BodyIndexPixels::default();
        let frame = RawFrame::body_index(1, 2, 1, vec![1u8, NO_BODY]);

        let format = BodyIndexDecoder.decode(&frame, &mut back).unwrap();

        assert_eq!(format, PixelFormat::Index8);
        assert_eq!(back.indices.as_raw(), &vec![1, NO_BODY]);
        assert_eq!(*back.colors.get_pixel(0, 0), PALETTE[1]);
        assert_eq!(back.colors.get_pixel(1, 0).0, [0, 0, 0, 0]);
    }
}
