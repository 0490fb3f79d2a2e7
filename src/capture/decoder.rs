use jpeg_decoder::{Decoder, PixelFormat as JpegPixelFormat};

use super::frame::ColorFormat;
use crate::error::DecodeError;

/// Bytes per pixel of the raw layouts with a fixed size
fn raw_bytes_per_pixel(format: ColorFormat) -> Option<usize> {
    match format {
        ColorFormat::Rgba | ColorFormat::Bgra => Some(4),
        ColorFormat::Yuy2 => Some(2),
        ColorFormat::Mjpeg => None,
    }
}

/// Convert a raw color frame into tightly packed RGBA.
///
/// `out` is resized to `width * height * 4`. Input sizes are validated before
/// `out` is touched, so a rejected frame leaves the previous contents intact.
pub fn decode_frame(
    data: &[u8],
    format: ColorFormat,
    width: u32,
    height: u32,
    out: &mut Vec<u8>,
) -> Result<(), DecodeError> {
    let pixels = width as usize * height as usize;

    if let Some(bpp) = raw_bytes_per_pixel(format) {
        if data.len() < pixels * bpp {
            return Err(DecodeError::BufferSize {
                expected: pixels * bpp,
                actual: data.len(),
            });
        }
    }
    if format == ColorFormat::Yuy2 && width % 2 != 0 {
        return Err(DecodeError::OddWidth(width));
    }

    match format {
        ColorFormat::Rgba => {
            out.clear();
            out.extend_from_slice(&data[..pixels * 4]);
        }
        ColorFormat::Bgra => {
            out.resize(pixels * 4, 0);
            for (dst, src) in out.chunks_exact_mut(4).zip(data.chunks_exact(4)) {
                dst.copy_from_slice(&[src[2], src[1], src[0], src[3]]);
            }
        }
        ColorFormat::Yuy2 => {
            out.resize(pixels * 4, 0);
            // Each 4-byte group (Y0 U Y1 V) carries two pixels.
            for (dst, src) in out.chunks_exact_mut(8).zip(data.chunks_exact(4)) {
                let (u, v) = (src[1], src[3]);
                dst[..4].copy_from_slice(&yuv_to_rgba(src[0], u, v));
                dst[4..].copy_from_slice(&yuv_to_rgba(src[2], u, v));
            }
        }
        ColorFormat::Mjpeg => {
            let mut decoder = Decoder::new(data);
            let decoded = decoder.decode()?;
            let info = decoder
                .info()
                .ok_or(DecodeError::UnsupportedFormat(ColorFormat::Mjpeg))?;
            let channels = match info.pixel_format {
                JpegPixelFormat::RGB24 => 3,
                JpegPixelFormat::L8 => 1,
                _ => return Err(DecodeError::UnsupportedFormat(ColorFormat::Mjpeg)),
            };
            let actual = (info.width as u32, info.height as u32);
            if actual != (width, height) {
                return Err(DecodeError::Dimensions {
                    expected: (width, height),
                    actual,
                });
            }
            if decoded.len() < pixels * channels {
                return Err(DecodeError::BufferSize {
                    expected: pixels * channels,
                    actual: decoded.len(),
                });
            }

            out.resize(pixels * 4, 0);
            for (dst, src) in out.chunks_exact_mut(4).zip(decoded.chunks_exact(channels)) {
                match *src {
                    [r, g, b] => dst.copy_from_slice(&[r, g, b, 255]),
                    [l] => dst.copy_from_slice(&[l, l, l, 255]),
                    _ => unreachable!(),
                }
            }
        }
    }

    Ok(())
}

/// BT.601 studio-swing YUV to opaque RGBA
#[inline]
pub fn yuv_to_rgba(y: u8, u: u8, v: u8) -> [u8; 4] {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    let clamp = |x: i32| x.clamp(0, 255) as u8;
    [
        clamp((298 * c + 409 * e + 128) >> 8),
        clamp((298 * c - 100 * d - 208 * e + 128) >> 8),
        clamp((298 * c + 516 * d + 128) >> 8),
        255,
    ]
}

/// Inverse of [`yuv_to_rgba`], used to produce YUY2 test and synthetic frames
#[inline]
pub fn rgb_to_yuv(r: u8, g: u8, b: u8) -> (u8, u8, u8) {
    let (r, g, b) = (r as i32, g as i32, b as i32);
    let y = ((66 * r + 129 * g + 25 * b + 128) >> 8) + 16;
    let u = ((-38 * r - 74 * g + 112 * b + 128) >> 8) + 128;
    let v = ((112 * r - 94 * g - 18 * b + 128) >> 8) + 128;
    (y.clamp(0, 255) as u8, u.clamp(0, 255) as u8, v.clamp(0, 255) as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bgra_swizzle() {
        let data = [1u8, 2, 3, 4, 5, 6, 7, 8];
        let mut out = Vec::new();
        decode_frame(&data, ColorFormat::Bgra, 2, 1, &mut out).unwrap();
        assert_eq!(out, vec![3, 2, 1, 4, 7, 6, 5, 8]);
    }

    #[test]
    fn test_yuy2_gray_levels() {
        // Y=235 is white and Y=16 black with neutral chroma.
        let data = [235u8, 128, 16, 128];
        let mut out = Vec::new();
        decode_frame(&data, ColorFormat::Yuy2, 2, 1, &mut out).unwrap();
        assert_eq!(&out[..4], &[255, 255, 255, 255]);
        assert_eq!(&out[4..], &[0, 0, 0, 255]);
    }

    #[test]
    fn test_yuv_roundtrip_is_close() {
        for &(r, g, b) in &[(200u8, 30u8, 40u8), (10, 220, 90), (128, 128, 128)] {
            let (y, u, v) = rgb_to_yuv(r, g, b);
            let rgba = yuv_to_rgba(y, u, v);
            assert!((rgba[0] as i32 - r as i32).abs() <= 3);
            assert!((rgba[1] as i32 - g as i32).abs() <= 3);
            assert!((rgba[2] as i32 - b as i32).abs() <= 3);
        }
    }

    #[test]
    fn test_short_buffer_leaves_output_untouched() {
        let mut out = vec![9u8; 8];
        let err = decode_frame(&[0u8; 4], ColorFormat::Rgba, 2, 1, &mut out).unwrap_err();
        assert!(matches!(err, DecodeError::BufferSize { expected: 8, actual: 4 }));
        assert_eq!(out, vec![9u8; 8]);
    }

    fn jpeg(width: u32, height: u32, value: u8) -> Vec<u8> {
        let rgb = vec![value; (width * height * 3) as usize];
        let mut jpeg = Vec::new();
        image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg, 95)
            .encode(&rgb, width, height, image::ExtendedColorType::Rgb8)
            .unwrap();
        jpeg
    }

    #[test]
    fn test_yuy2_odd_width_rejected() {
        let mut out = vec![9u8; 4];
        let err = decode_frame(&[235u8, 128, 16, 128, 0, 0], ColorFormat::Yuy2, 3, 1, &mut out).unwrap_err();
        assert!(matches!(err, DecodeError::OddWidth(3)));
        assert_eq!(out, vec![9u8; 4]);
    }

    #[test]
    fn test_mjpeg_dimension_mismatch_rejected() {
        let data = jpeg(8, 2, 100);
        let mut out = vec![9u8; 4];

        let err = decode_frame(&data, ColorFormat::Mjpeg, 4, 4, &mut out).unwrap_err();
        assert!(matches!(err, DecodeError::Dimensions { expected: (4, 4), actual: (8, 2) }));
        let err = decode_frame(&data, ColorFormat::Mjpeg, 2, 2, &mut out).unwrap_err();
        assert!(matches!(err, DecodeError::Dimensions { actual: (8, 2), .. }));
        assert_eq!(out, vec![9u8; 4]);
    }

    #[test]
    fn test_mjpeg_decodes_to_rgba() {
        let jpeg = jpeg(8, 8, 200);

        let mut out = Vec::new();
        decode_frame(&jpeg, ColorFormat::Mjpeg, 8, 8, &mut out).unwrap();

        assert_eq!(out.len(), 8 * 8 * 4);
        assert!(out.chunks_exact(4).all(|px| (px[0] as i32 - 200).abs() <= 4 && px[3] == 255));
    }
}
