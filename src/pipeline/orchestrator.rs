//! Capture loop orchestration: startup, the per-frame loop, and shutdown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, histogram};
use tracing::{debug, error, info, instrument, trace, warn};

use super::clock::FrameClock;
use super::monitor::{self, MonitorReport};
use crate::capture::{CaptureError, FrameSource};
use crate::sink::{MediaSink, RunningSink, SinkConfig, SinkError};
use crate::undistort::{CalibrationError, CameraModel, RemapTable};
use crate::{CaptureConfig, Config};

/// External request to leave the capture loop, checked once per iteration.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Failures that prevent the loop from ever starting.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("invalid calibration: {0}")]
    Calibration(#[from] CalibrationError),
    #[error(transparent)]
    DeviceOpen(CaptureError),
    #[error("failed to start sink: {0}")]
    Sink(SinkError),
}

impl StartupError {
    /// Process exit status for this failure.
    pub fn exit_code(&self) -> u8 {
        match self {
            StartupError::DeviceOpen(_) => 2,
            StartupError::Sink(_) => 3,
            StartupError::Calibration(_) => 4,
        }
    }
}

/// Why the capture loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// The sink refused a frame.
    PushFailed,
    /// The capture device has no more frames.
    DeviceEnded,
    /// The stop signal was raised.
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopReport {
    pub frames_pushed: u64,
    pub push_attempts: u64,
    pub transient_errors: u64,
    pub dropped_frames: u64,
    /// Longest time from capture to handing a frame to the sink.
    pub max_push_latency: Duration,
    pub exit: LoopExit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub capture: LoopReport,
    /// `None` if the monitor task panicked or had to be aborted.
    pub monitor: Option<MonitorReport>,
}

/// The read, correct, stamp, push sequence. Synchronous and single-threaded.
struct CaptureLoop<'a> {
    table: &'a RemapTable,
    clock: FrameClock,
    backoff: Duration,
    stop: &'a StopSignal,
}

impl CaptureLoop<'_> {
    fn run<S, K>(&self, source: &mut S, sink: &mut K) -> LoopReport
    where
        S: FrameSource + ?Sized,
        K: MediaSink + ?Sized,
    {
        let mut stats = LoopReport {
            frames_pushed: 0,
            push_attempts: 0,
            transient_errors: 0,
            dropped_frames: 0,
            max_push_latency: Duration::ZERO,
            exit: LoopExit::Stopped,
        };

        loop {
            let sequence = stats.frames_pushed;
            if self.stop.is_stopped() {
                info!("Stop requested after {} frames", sequence);
                return LoopReport {
                    exit: LoopExit::Stopped,
                    ..stats
                };
            }

            let raw = match source.read_frame() {
                Ok(raw) => raw,
                Err(CaptureError::Ended) => {
                    info!("Capture device ended after {} frames", sequence);
                    return LoopReport {
                        exit: LoopExit::DeviceEnded,
                        ..stats
                    };
                }
                Err(e) => {
                    stats.transient_errors += 1;
                    counter!("capture_read_retries_total").increment(1);
                    warn!("Capture read failed, retrying: {}", e);
                    std::thread::sleep(self.backoff);
                    continue;
                }
            };

            let mut corrected = match self.table.apply(&raw) {
                Ok(corrected) => corrected,
                Err(e) => {
                    stats.dropped_frames += 1;
                    counter!("capture_frames_dropped_total").increment(1);
                    warn!("Dropping frame: {}", e);
                    continue;
                }
            };
            let captured_at = raw.captured_at;
            drop(raw);

            corrected.sequence = sequence;
            let timestamp = self.clock.timestamp(sequence);
            let latency = captured_at.elapsed();
            stats.max_push_latency = stats.max_push_latency.max(latency);
            histogram!("capture_to_push_latency_us").record(latency.as_micros() as f64);
            trace!(sequence, pts = ?timestamp.pts, ?latency, "Pushing frame");

            stats.push_attempts += 1;
            if let Err(e) = sink.push(corrected, timestamp) {
                counter!("sink_push_failures_total").increment(1);
                error!("Push failed, stopping capture: {}", e);
                return LoopReport {
                    exit: LoopExit::PushFailed,
                    ..stats
                };
            }
            stats.frames_pushed += 1;
            counter!("sink_frames_pushed_total").increment(1);

            if stats.frames_pushed % self.clock.fps() as u64 == 0 {
                debug!("Pushed {} frames", stats.frames_pushed);
            }
        }
    }
}

/// Owns startup order, the capture loop and shutdown order.
pub struct Orchestrator {
    config: Config,
    stop: StopSignal,
}

impl Orchestrator {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            stop: StopSignal::new(),
        }
    }

    /// Handle for requesting a stop from another task.
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Run until the sink refuses a frame, the device ends, or a stop is requested.
    ///
    /// Startup: remap table, sink chain validation, frame source, sink,
    /// health monitor. Shutdown always runs once the loop has started: end of
    /// stream, sink stop, source close, monitor join.
    ///
    /// The loop runs through `block_in_place`, so this must be polled on a
    /// multi-threaded runtime.
    #[instrument(skip_all)]
    pub async fn run<S, K, O, T>(&self, open_source: O, start_sink: T) -> Result<RunReport, StartupError>
    where
        S: FrameSource,
        K: MediaSink,
        O: FnOnce(&CaptureConfig) -> Result<S, CaptureError>,
        T: FnOnce(&SinkConfig, &CaptureConfig) -> Result<RunningSink<K>, SinkError>,
    {
        let capture = &self.config.capture;

        let model = CameraModel::from_config(&self.config.calibration)?;
        let table = RemapTable::build(&model, capture.width, capture.height)?;
        let clock = FrameClock::new(capture.fps).ok_or_else(|| {
            StartupError::DeviceOpen(CaptureError::open(&capture.device, "frame rate must be positive"))
        })?;
        info!("Remap table ready for {}x{}", table.width(), table.height());
        self.config.sink.validate().map_err(StartupError::Sink)?;

        let mut source = open_source(capture).map_err(StartupError::DeviceOpen)?;
        info!("Capture device open: {}", capture.device);

        let RunningSink { mut sink, events } = match start_sink(&self.config.sink, capture) {
            Ok(running) => running,
            Err(e) => {
                source.close();
                return Err(StartupError::Sink(e));
            }
        };
        info!("Sink started");

        let mut monitor_task = monitor::spawn(events);

        let capture_loop = CaptureLoop {
            table: &table,
            clock,
            backoff: Duration::from_millis(self.config.pipeline.read_backoff_ms),
            stop: &self.stop,
        };
        let report = tokio::task::block_in_place(|| capture_loop.run(&mut source, &mut sink));

        info!("Shutting down after {} frames ({:?})", report.frames_pushed, report.exit);
        if let Err(e) = sink.end_of_stream() {
            warn!("{}", e);
        }
        if let Err(e) = sink.stop() {
            warn!("{}", e);
        }
        source.close();
        drop(sink);
        drop(source);

        let join_timeout = Duration::from_millis(self.config.pipeline.monitor_join_timeout_ms);
        let monitor_report = match tokio::time::timeout(join_timeout, &mut monitor_task).await {
            Ok(Ok(report)) => Some(report),
            Ok(Err(e)) => {
                error!("Health monitor failed: {}", e);
                None
            }
            Err(_) => {
                warn!("Health monitor still running after {:?}, aborting", join_timeout);
                monitor_task.abort();
                None
            }
        };

        Ok(RunReport {
            capture: report,
            monitor: monitor_report,
        })
    }
}
