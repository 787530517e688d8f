//! Precomputed undistortion map with fixed-point bilinear sampling.

use bytes::BytesMut;
use tracing::{debug, instrument};

use super::calibration::{CalibrationError, CameraModel};
use crate::capture::frame::{CorrectedFrame, PixelFormat, RawFrame};

/// Sub-pixel precision of the map: coordinates are stored in 1/32 pixel.
const INTER_BITS: u32 = 5;
const INTER_TAB_SIZE: i32 = 1 << INTER_BITS;
const INTER_MASK: i32 = INTER_TAB_SIZE - 1;
/// Sum of the four bilinear weights.
const WEIGHT_BITS: u32 = 2 * INTER_BITS;
const WEIGHT_ROUND: u32 = 1 << (WEIGHT_BITS - 1);

/// Largest supported frame edge.
pub const MAX_DIMENSION: u32 = i16::MAX as u32;

/// Keeps wildly distorted samples well outside any frame without overflowing.
const COORD_LIMIT: f64 = (1u32 << 20) as f64;

#[derive(Debug, thiserror::Error)]
pub enum RemapError {
    #[error("frame is {width}x{height}, table was built for {expected_width}x{expected_height}")]
    Size {
        width: u32,
        height: u32,
        expected_width: u32,
        expected_height: u32,
    },
    #[error("cannot remap {0:?} frames")]
    Format(PixelFormat),
    #[error("frame holds {actual} bytes, expected {expected}")]
    Length { expected: usize, actual: usize },
}

/// Per-pixel source coordinates for one output resolution.
///
/// Built once and never mutated afterwards; share it behind an `Arc`.
#[derive(Debug, Clone, PartialEq)]
pub struct RemapTable {
    width: u32,
    height: u32,
    /// Source x for every output pixel, in 1/32 pixel.
    map_x: Vec<i32>,
    /// Source y for every output pixel, in 1/32 pixel.
    map_y: Vec<i32>,
}

impl RemapTable {
    #[instrument(skip(model))]
    pub fn build(model: &CameraModel, width: u32, height: u32) -> Result<Self, CalibrationError> {
        if width == 0 || height == 0 || width > MAX_DIMENSION || height > MAX_DIMENSION {
            return Err(CalibrationError::Resolution { width, height });
        }

        let len = width as usize * height as usize;
        let mut map_x = Vec::with_capacity(len);
        let mut map_y = Vec::with_capacity(len);

        for v in 0..height {
            for u in 0..width {
                let [sx, sy] = model.source_pixel([u as f64, v as f64]);
                map_x.push(to_fixed(sx));
                map_y.push(to_fixed(sy));
            }
        }

        debug!("Remap table built: {} entries", len);
        Ok(Self {
            width,
            height,
            map_x,
            map_y,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Source position of output pixel `(u, v)` in pixels.
    pub fn source_of(&self, u: u32, v: u32) -> Option<[f64; 2]> {
        if u >= self.width || v >= self.height {
            return None;
        }
        let i = v as usize * self.width as usize + u as usize;
        Some([
            self.map_x[i] as f64 / INTER_TAB_SIZE as f64,
            self.map_y[i] as f64 / INTER_TAB_SIZE as f64,
        ])
    }

    /// Undistort one frame. Samples falling outside the input are black.
    pub fn apply(&self, raw: &RawFrame) -> Result<CorrectedFrame, RemapError> {
        if raw.width != self.width || raw.height != self.height {
            return Err(RemapError::Size {
                width: raw.width,
                height: raw.height,
                expected_width: self.width,
                expected_height: self.height,
            });
        }
        let bpp = match raw.format {
            PixelFormat::Rgb24 => 3,
            other => return Err(RemapError::Format(other)),
        };

        let w = self.width as i32;
        let h = self.height as i32;
        let stride = self.width as usize * bpp;
        let expected = stride * self.height as usize;
        if raw.data.len() != expected {
            return Err(RemapError::Length {
                expected,
                actual: raw.data.len(),
            });
        }

        let src: &[u8] = &raw.data;
        let mut out = BytesMut::zeroed(expected);

        for (i, dst) in out.chunks_exact_mut(bpp).enumerate() {
            let (mx, my) = (self.map_x[i], self.map_y[i]);
            let (sx, sy) = (mx >> INTER_BITS, my >> INTER_BITS);
            let (fx, fy) = ((mx & INTER_MASK) as u32, (my & INTER_MASK) as u32);

            let weights = [
                (INTER_TAB_SIZE as u32 - fx) * (INTER_TAB_SIZE as u32 - fy),
                fx * (INTER_TAB_SIZE as u32 - fy),
                (INTER_TAB_SIZE as u32 - fx) * fy,
                fx * fy,
            ];

            if sx >= 0 && sy >= 0 && sx + 1 < w && sy + 1 < h {
                let p00 = sy as usize * stride + sx as usize * bpp;
                let p10 = p00 + stride;
                let taps = [p00, p00 + bpp, p10, p10 + bpp];
                for (c, d) in dst.iter_mut().enumerate() {
                    let acc: u32 = taps
                        .iter()
                        .zip(weights)
                        .map(|(&p, wt)| src[p + c] as u32 * wt)
                        .sum();
                    *d = ((acc + WEIGHT_ROUND) >> WEIGHT_BITS) as u8;
                }
            } else if sx >= -1 && sy >= -1 && sx < w && sy < h {
                // Border: taps outside the frame contribute zero
                let corners = [(sx, sy), (sx + 1, sy), (sx, sy + 1), (sx + 1, sy + 1)];
                for (c, d) in dst.iter_mut().enumerate() {
                    let mut acc = 0u32;
                    for (&(x, y), wt) in corners.iter().zip(weights) {
                        if x >= 0 && y >= 0 && x < w && y < h {
                            acc += src[y as usize * stride + x as usize * bpp + c] as u32 * wt;
                        }
                    }
                    *d = ((acc + WEIGHT_ROUND) >> WEIGHT_BITS) as u8;
                }
            }
        }

        Ok(CorrectedFrame::new(
            out.freeze(),
            self.width,
            self.height,
            raw.format,
        ))
    }
}

fn to_fixed(coord: f64) -> i32 {
    let c = if coord.is_finite() {
        coord.clamp(-COORD_LIMIT, COORD_LIMIT)
    } else {
        -COORD_LIMIT
    };
    (c * INTER_TAB_SIZE as f64).round() as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::undistort::calibration::{
        CameraIntrinsics, CameraModel, RadialTangentialDistortion,
    };
    use crate::Config;

    fn model(distortion: RadialTangentialDistortion) -> CameraModel {
        CameraModel {
            intrinsics: CameraIntrinsics {
                fx: 50.0,
                fy: 50.0,
                cx: 15.5,
                cy: 11.5,
                skew: 0.0,
            },
            distortion,
        }
    }

    fn gradient_frame(width: u32, height: u32) -> RawFrame {
        let mut data = Vec::with_capacity((width * height * 3) as usize);
        for v in 0..height {
            for u in 0..width {
                data.extend_from_slice(&[(u * 7) as u8, (v * 11) as u8, ((u + v) * 3) as u8]);
            }
        }
        RawFrame::new(data, width, height, PixelFormat::Rgb24)
    }

    #[test]
    fn zero_distortion_is_identity() {
        let table = RemapTable::build(&model(Default::default()), 32, 24).unwrap();
        let raw = gradient_frame(32, 24);
        let corrected = table.apply(&raw).unwrap();
        assert_eq!(corrected.as_bytes(), &raw.data[..]);
    }

    #[test]
    fn apply_is_deterministic() {
        let distortion = RadialTangentialDistortion {
            k1: -0.29,
            k2: 0.06,
            p1: -0.007,
            p2: 0.0016,
            k3: 0.0,
        };
        let table = RemapTable::build(&model(distortion), 32, 24).unwrap();
        let raw = gradient_frame(32, 24);
        let a = table.apply(&raw).unwrap();
        let b = table.apply(&raw).unwrap();
        assert_eq!(a.as_bytes(), b.as_bytes());
        assert_eq!(a.len(), 32 * 24 * 3);
    }

    #[test]
    fn half_pixel_shift_averages_neighbours() {
        let mut table = RemapTable::build(&model(Default::default()), 2, 1).unwrap();
        table.map_x[0] = INTER_TAB_SIZE / 2;
        let raw = RawFrame::new(vec![0u8, 0, 0, 200, 100, 50], 2, 1, PixelFormat::Rgb24);
        let out = table.apply(&raw).unwrap();
        assert_eq!(&out.as_bytes()[..3], &[100, 50, 25]);
    }

    #[test]
    fn samples_outside_the_frame_are_black() {
        let mut table = RemapTable::build(&model(Default::default()), 4, 4).unwrap();
        table.map_x[5] = -10 * INTER_TAB_SIZE;
        table.map_y[6] = 100 * INTER_TAB_SIZE;
        let raw = RawFrame::new(vec![255u8; 4 * 4 * 3], 4, 4, PixelFormat::Rgb24);
        let out = table.apply(&raw).unwrap();
        assert_eq!(&out.as_bytes()[15..21], &[0; 6]);
        assert_eq!(&out.as_bytes()[..3], &[255; 3]);
    }

    #[test]
    fn reference_table_matches_model() {
        let config = Config::default();
        let model = CameraModel::from_config(&config.calibration).unwrap();
        let table = RemapTable::build(&model, 1280, 720).unwrap();
        let exact = model.source_pixel([0.0, 0.0]);
        let stored = table.source_of(0, 0).unwrap();
        assert!((exact[0] - stored[0]).abs() <= 1.0 / 64.0);
        assert!((exact[1] - stored[1]).abs() <= 1.0 / 64.0);
        assert!(table.source_of(1280, 0).is_none());
    }

    #[test]
    fn rejects_mismatched_frames() {
        let table = RemapTable::build(&model(Default::default()), 8, 8).unwrap();
        let raw = gradient_frame(4, 4);
        assert!(matches!(table.apply(&raw), Err(RemapError::Size { .. })));

        let yuyv = RawFrame::new(vec![0u8; 8 * 8 * 2], 8, 8, PixelFormat::Yuyv4);
        assert!(matches!(
            table.apply(&yuyv),
            Err(RemapError::Format(PixelFormat::Yuyv4))
        ));

        let short = RawFrame::new(vec![0u8; 10], 8, 8, PixelFormat::Rgb24);
        assert!(matches!(table.apply(&short), Err(RemapError::Length { .. })));
    }

    #[test]
    fn rejects_empty_resolution() {
        assert!(matches!(
            RemapTable::build(&model(Default::default()), 0, 720),
            Err(CalibrationError::Resolution { .. })
        ));
    }
}
