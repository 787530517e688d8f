use std::time::Duration;

use crate::capture::frame::FrameTimestamp;

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Constant-rate presentation clock.
///
/// Timestamps depend only on the sequence number, never on when the frame
/// was actually captured, so they stay evenly spaced under capture jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameClock {
    fps: u32,
    duration: Duration,
}

impl FrameClock {
    /// `None` for a zero rate.
    pub fn new(fps: u32) -> Option<Self> {
        if fps == 0 {
            return None;
        }
        Some(Self {
            fps,
            duration: Duration::from_nanos((NANOS_PER_SEC / fps as u128) as u64),
        })
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }

    /// `pts = sequence / fps`, `duration = 1 / fps`, both truncated to the nanosecond.
    pub fn timestamp(&self, sequence: u64) -> FrameTimestamp {
        let pts = sequence as u128 * NANOS_PER_SEC / self.fps as u128;
        FrameTimestamp {
            pts: Duration::from_nanos(pts as u64),
            duration: self.duration,
        }
    }
}
