use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Decoded frame as delivered by a frame source.
///
/// Storage is a `Bytes` handle over the decoder's output, so no copy is made
/// between decode and correction.
#[derive(Clone)]
pub struct RawFrame {
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
    /// Always a packed format; see [`PixelFormat::bytes_per_pixel`].
    pub format: PixelFormat,
    /// Capture timestamp for latency tracking
    pub captured_at: Instant,
}

impl RawFrame {
    pub fn new(data: impl Into<Bytes>, width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            data: data.into(),
            width,
            height,
            format,
            captured_at: Instant::now(),
        }
    }
}

/// Undistorted frame on its way into the sink.
///
/// Deliberately not `Clone`: pushing moves the storage into the sink.
pub struct CorrectedFrame {
    data: Bytes,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Assigned by the capture loop just before the push.
    pub sequence: u64,
}

impl CorrectedFrame {
    pub(crate) fn new(data: Bytes, width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            data,
            width,
            height,
            format,
            sequence: 0,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Give up the frame and hand its storage to the consumer.
    pub fn into_data(self) -> Bytes {
        self.data
    }
}

/// Presentation time and duration attached to every pushed frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameTimestamp {
    pub pts: Duration,
    pub duration: Duration,
}

/// Pixel formats we support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    Rgb24,
    Yuyv4,
    Mjpeg,
}

impl PixelFormat {
    /// Bytes per pixel for packed formats; compressed formats report `None`.
    pub fn bytes_per_pixel(self) -> Option<usize> {
        match self {
            PixelFormat::Rgb24 => Some(3),
            PixelFormat::Yuyv4 => Some(2),
            PixelFormat::Mjpeg => None,
        }
    }
}
