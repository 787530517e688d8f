//! V4L2 frame source with memory-mapped buffers

use std::time::Duration;

use tracing::{info, instrument, warn};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use crate::{
    capture::{
        decoder,
        frame::{PixelFormat, RawFrame},
        CaptureError, FrameSource,
    },
    CaptureConfig,
};

/// Camera opened through V4L2, decoding every buffer to RGB24
pub struct V4l2Source {
    _device: Box<Device>,
    stream: Option<MmapStream<'static>>,
    config: CaptureConfig,
}

impl V4l2Source {
    /// Open the device, negotiate format and rate, and start streaming.
    #[instrument(skip(config), fields(device = %config.device))]
    pub fn open(config: &CaptureConfig) -> Result<Self, CaptureError> {
        let open_err = |e: std::io::Error| CaptureError::open(&config.device, e);

        let device = Device::with_path(&config.device).map_err(open_err)?;

        // Query capabilities
        let caps = device.query_caps().map_err(open_err)?;
        info!("Device: {} ({})", caps.card, caps.driver);

        if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
            return Err(CaptureError::open(
                &config.device,
                "device doesn't support video capture",
            ));
        }

        // Set format
        let mut fmt = device.format().map_err(open_err)?;
        fmt.width = config.width;
        fmt.height = config.height;
        fmt.fourcc = match config.format {
            PixelFormat::Mjpeg => FourCC::new(b"MJPG"),
            PixelFormat::Yuyv4 => FourCC::new(b"YUYV"),
            PixelFormat::Rgb24 => FourCC::new(b"RGB3"),
        };
        let fmt = device.set_format(&fmt).map_err(open_err)?;

        // The remap table is built for exactly one size
        if fmt.width != config.width || fmt.height != config.height {
            return Err(CaptureError::open(
                &config.device,
                format!(
                    "device negotiated {}x{}, configured {}x{}",
                    fmt.width, fmt.height, config.width, config.height
                ),
            ));
        }

        if let Err(e) = device.set_params(&Parameters::with_fps(config.fps)) {
            warn!("Device refused {} fps: {}", config.fps, e);
        }

        // Give the hardware time to apply the new format
        std::thread::sleep(Duration::from_millis(config.settle_ms));

        let stream = MmapStream::with_buffers(&device, Type::VideoCapture, config.buffer_count)
            .map_err(open_err)?;

        info!(
            "Capture stream started: {}x{} @ {} fps, {} buffers",
            config.width, config.height, config.fps, config.buffer_count
        );

        Ok(Self {
            _device: Box::new(device),
            stream: Some(stream),
            config: config.clone(),
        })
    }
}

impl FrameSource for V4l2Source {
    fn read_frame(&mut self) -> Result<RawFrame, CaptureError> {
        let stream = self.stream.as_mut().ok_or(CaptureError::Ended)?;

        let (buf, _meta) = stream
            .next()
            .map_err(|e| CaptureError::Transient(e.to_string()))?;

        if buf.is_empty() {
            return Err(CaptureError::Transient("empty buffer".into()));
        }

        // Decode straight out of the mmap'd buffer
        let rgb = decoder::decode_frame(buf, self.config.format, self.config.width, self.config.height)
            .map_err(|e| CaptureError::Transient(e.to_string()))?;

        Ok(RawFrame::new(
            rgb,
            self.config.width,
            self.config.height,
            PixelFormat::Rgb24,
        ))
    }

    fn close(&mut self) {
        if self.stream.take().is_some() {
            info!("Capture stream closed: {}", self.config.device);
        }
    }
}

impl Drop for V4l2Source {
    fn drop(&mut self) {
        self.close();
    }
}
