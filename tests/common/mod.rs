#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use undistort_streamer::capture::{
    CaptureError, FrameSource, FrameTimestamp, PixelFormat, RawFrame,
};
use undistort_streamer::sink::{
    event_channel, EventSender, MediaSink, PipelineEvent, PushError, RunningSink, SinkError,
};
use undistort_streamer::{Config, CorrectedFrame, StopSignal};

pub const WIDTH: u32 = 8;
pub const HEIGHT: u32 = 6;

/// Small camera with mild barrel distortion.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.capture.device = "/dev/video-test".into();
    config.capture.width = WIDTH;
    config.capture.height = HEIGHT;
    config.capture.fps = 30;
    config.calibration.camera_matrix = [[6.0, 0.0, 3.5], [0.0, 6.0, 2.5], [0.0, 0.0, 1.0]];
    config.calibration.dist_coeffs = [-0.1, 0.01, 0.0, 0.0, 0.0];
    config.pipeline.read_backoff_ms = 0;
    config.pipeline.monitor_join_timeout_ms = 2000;
    config
}

pub fn raw_frame() -> RawFrame {
    RawFrame::new(
        vec![128u8; (WIDTH * HEIGHT * 3) as usize],
        WIDTH,
        HEIGHT,
        PixelFormat::Rgb24,
    )
}

/// Ordered record of every call the orchestrator makes on the fakes.
#[derive(Debug, Default)]
pub struct CallLog {
    pub calls: Vec<&'static str>,
    pub reads: usize,
    pub pushes: Vec<(u64, FrameTimestamp)>,
}

pub type SharedLog = Arc<Mutex<CallLog>>;

pub fn shared_log() -> SharedLog {
    Arc::new(Mutex::new(CallLog::default()))
}

pub enum Step {
    Frame,
    Transient,
    /// Raise the stop signal and deliver a frame.
    FrameThenStop(StopSignal),
}

/// Replays a script, then reports end of stream.
pub struct ScriptedSource {
    steps: VecDeque<Step>,
    log: SharedLog,
}

impl ScriptedSource {
    pub fn new(steps: impl IntoIterator<Item = Step>, log: SharedLog) -> Self {
        Self {
            steps: steps.into_iter().collect(),
            log,
        }
    }

    pub fn frames(count: usize, log: SharedLog) -> Self {
        Self::new((0..count).map(|_| Step::Frame), log)
    }
}

impl FrameSource for ScriptedSource {
    fn read_frame(&mut self) -> Result<RawFrame, CaptureError> {
        self.log.lock().unwrap().reads += 1;
        match self.steps.pop_front() {
            Some(Step::Frame) => Ok(raw_frame()),
            Some(Step::Transient) => Err(CaptureError::Transient("device not ready".into())),
            Some(Step::FrameThenStop(stop)) => {
                stop.stop();
                Ok(raw_frame())
            }
            None => Err(CaptureError::Ended),
        }
    }

    fn close(&mut self) {
        self.log.lock().unwrap().calls.push("close");
    }
}

/// Accepts frames until `fail_at` (1-based push count), then refuses.
pub struct FakeSink {
    log: SharedLog,
    events: Option<EventSender>,
    fail_at: Option<usize>,
    /// Emit an Error event on every push.
    noisy: bool,
    /// Never announce end of stream and keep the event sender alive after stop.
    leak_events: bool,
}

impl FakeSink {
    pub fn start(log: SharedLog, fail_at: Option<usize>) -> RunningSink<Self> {
        Self::build(log, fail_at, false, false)
    }

    pub fn noisy(log: SharedLog) -> RunningSink<Self> {
        Self::build(log, None, true, false)
    }

    pub fn leaky(log: SharedLog) -> RunningSink<Self> {
        Self::build(log, None, false, true)
    }

    fn build(log: SharedLog, fail_at: Option<usize>, noisy: bool, leak_events: bool) -> RunningSink<Self> {
        log.lock().unwrap().calls.push("start");
        let (tx, events) = event_channel(256);
        RunningSink {
            sink: Self {
                log,
                events: Some(tx),
                fail_at,
                noisy,
                leak_events,
            },
            events,
        }
    }

    fn emit(&self, event: PipelineEvent) {
        if let Some(tx) = &self.events {
            tx.emit(event);
        }
    }
}

impl MediaSink for FakeSink {
    fn push(&mut self, frame: CorrectedFrame, timestamp: FrameTimestamp) -> Result<(), PushError> {
        let attempt = {
            let mut log = self.log.lock().unwrap();
            log.pushes.push((frame.sequence, timestamp));
            log.pushes.len()
        };
        assert_eq!(frame.len(), (WIDTH * HEIGHT * 3) as usize);

        if self.noisy {
            self.emit(PipelineEvent::Error {
                source: Some("/pipeline0/enc".into()),
                message: "encoder fell behind".into(),
                debug: None,
            });
        }
        if self.fail_at == Some(attempt) {
            return Err(PushError::Rejected {
                sequence: frame.sequence,
                reason: "flushing".into(),
            });
        }
        Ok(())
    }

    fn end_of_stream(&mut self) -> Result<(), SinkError> {
        self.log.lock().unwrap().calls.push("end_of_stream");
        if !self.leak_events {
            self.emit(PipelineEvent::EndOfStream);
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<(), SinkError> {
        self.log.lock().unwrap().calls.push("stop");
        if !self.leak_events {
            self.events = None;
        }
        Ok(())
    }
}

impl Drop for FakeSink {
    fn drop(&mut self) {
        if self.leak_events {
            // Simulate a pipeline thread that outlives the sink
            if let Some(tx) = self.events.take() {
                std::mem::forget(tx);
            }
        }
    }
}
