pub mod decoder;
pub mod frame;
#[cfg(feature = "v4l2-capture")]
pub mod v4l2;

pub use frame::{CorrectedFrame, FrameTimestamp, PixelFormat, RawFrame};
#[cfg(feature = "v4l2-capture")]
pub use v4l2::V4l2Source;

/// Capture-side failures, classified by how the capture loop must react.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    /// The device could not be opened or configured. Fatal at startup.
    #[error("failed to open capture device {device}: {reason}")]
    Open { device: String, reason: String },

    /// A single read failed; the caller backs off and retries.
    #[error("transient read failure: {0}")]
    Transient(String),

    /// The device reported that no further frames will arrive.
    #[error("capture device reached end of stream")]
    Ended,
}

impl CaptureError {
    pub fn open(device: impl Into<String>, reason: impl ToString) -> Self {
        Self::Open {
            device: device.into(),
            reason: reason.to_string(),
        }
    }
}

/// A physical or simulated camera producing raw frames.
pub trait FrameSource: Send {
    /// Blocks until the next frame is available.
    fn read_frame(&mut self) -> Result<RawFrame, CaptureError>;

    /// Releases the device. Calling it more than once is a no-op.
    fn close(&mut self);
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn read_frame(&mut self) -> Result<RawFrame, CaptureError> {
        (**self).read_frame()
    }

    fn close(&mut self) {
        (**self).close()
    }
}
