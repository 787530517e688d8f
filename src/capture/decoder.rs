use zune_jpeg::JpegDecoder;

use super::frame::PixelFormat;

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("jpeg decode failed: {0}")]
    Jpeg(String),
    #[error("decoded image is {actual_width}x{actual_height}, expected {width}x{height}")]
    Dimensions {
        width: u32,
        height: u32,
        actual_width: usize,
        actual_height: usize,
    },
    #[error("buffer holds {actual} bytes, expected {expected}")]
    Length { expected: usize, actual: usize },
}

/// Decode a captured buffer into packed RGB24.
pub fn decode_frame(
    data: &[u8],
    format: PixelFormat,
    width: u32,
    height: u32,
) -> Result<Vec<u8>, DecodeError> {
    match format {
        PixelFormat::Mjpeg => {
            let mut decoder = JpegDecoder::new(data);
            let pixels = decoder
                .decode()
                .map_err(|e| DecodeError::Jpeg(format!("{:?}", e)))?;
            if let Some((w, h)) = decoder.dimensions() {
                if w != width as usize || h != height as usize {
                    return Err(DecodeError::Dimensions {
                        width,
                        height,
                        actual_width: w,
                        actual_height: h,
                    });
                }
            }
            check_len(&pixels, width, height, 3)?;
            Ok(pixels)
        }
        PixelFormat::Rgb24 => {
            // Already in RGB format
            check_len(data, width, height, 3)?;
            Ok(data.to_vec())
        }
        PixelFormat::Yuyv4 => {
            check_len(data, width, height, 2)?;
            Ok(yuyv_to_rgb(data))
        }
    }
}

fn check_len(data: &[u8], width: u32, height: u32, bpp: usize) -> Result<(), DecodeError> {
    let expected = width as usize * height as usize * bpp;
    if data.len() != expected {
        return Err(DecodeError::Length {
            expected,
            actual: data.len(),
        });
    }
    Ok(())
}

/// BT.601 limited-range YUYV (YUY2) to RGB24, integer arithmetic.
fn yuyv_to_rgb(data: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(data.len() / 2 * 3);
    for chunk in data.chunks_exact(4) {
        let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
        push_rgb(&mut rgb, y0, u, v);
        push_rgb(&mut rgb, y1, u, v);
    }
    rgb
}

#[inline]
fn push_rgb(out: &mut Vec<u8>, y: u8, u: u8, v: u8) {
    let c = (y as i32 - 16).max(0) * 298;
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    let clamp = |x: i32| ((x + 128) >> 8).clamp(0, 255) as u8;
    out.push(clamp(c + 409 * e));
    out.push(clamp(c - 100 * d - 208 * e));
    out.push(clamp(c + 516 * d));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yuyv_grey_levels() {
        // Two pixels: black (Y=16) and white (Y=235), neutral chroma
        let data = [16u8, 128, 235, 128];
        let rgb = decode_frame(&data, PixelFormat::Yuyv4, 2, 1).unwrap();
        assert_eq!(rgb, vec![0, 0, 0, 255, 255, 255]);
    }

    #[test]
    fn yuyv_length_is_checked() {
        let err = decode_frame(&[0u8; 6], PixelFormat::Yuyv4, 2, 1).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::Length {
                expected: 4,
                actual: 6
            }
        ));
    }

    #[test]
    fn rgb_passthrough() {
        let data = [1u8, 2, 3, 4, 5, 6];
        assert_eq!(
            decode_frame(&data, PixelFormat::Rgb24, 2, 1).unwrap(),
            data.to_vec()
        );
    }

    #[test]
    fn garbage_jpeg_is_an_error() {
        let err = decode_frame(&[0u8; 16], PixelFormat::Mjpeg, 2, 1).unwrap_err();
        assert!(matches!(err, DecodeError::Jpeg(_)));
    }
}
