//! Downstream media pipeline: frames go in, health events come out.

pub mod config;
#[cfg(feature = "gstreamer-pipeline")]
pub mod gst_sink;

use flume::{Receiver, Sender, TrySendError};
use tracing::warn;

use crate::capture::frame::{CorrectedFrame, FrameTimestamp};

pub use config::{SinkConfig, StageConfig};
#[cfg(feature = "gstreamer-pipeline")]
pub use gst_sink::GstSink;

/// Status report from the downstream pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    Info {
        source: Option<String>,
        message: String,
    },
    Warning {
        source: Option<String>,
        message: String,
        debug: Option<String>,
    },
    Error {
        source: Option<String>,
        message: String,
        debug: Option<String>,
    },
    EndOfStream,
}

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("invalid sink configuration: {0}")]
    InvalidConfig(String),
    #[error("failed to build pipeline: {0}")]
    Launch(String),
    #[error("pipeline state change failed: {0}")]
    StateChange(String),
    #[error("failed to signal end of stream: {0}")]
    EndOfStream(String),
}

impl SinkError {
    /// Whether the failure comes from the pipeline description itself.
    pub fn is_config(&self) -> bool {
        matches!(self, SinkError::InvalidConfig(_) | SinkError::Launch(_))
    }
}

/// The sink refused a frame. The frame's storage is gone either way.
#[derive(Debug, thiserror::Error)]
pub enum PushError {
    #[error("sink rejected frame {sequence}: {reason}")]
    Rejected { sequence: u64, reason: String },
    #[error("sink is not accepting data")]
    Stopped,
}

/// Consumer of corrected frames.
///
/// `push` takes the frame by value: ownership moves into the sink whether the
/// push succeeds or not. After `end_of_stream` and `stop` no more pushes are
/// made. `stop` must tolerate repeated calls.
pub trait MediaSink: Send {
    fn push(&mut self, frame: CorrectedFrame, timestamp: FrameTimestamp) -> Result<(), PushError>;

    fn end_of_stream(&mut self) -> Result<(), SinkError>;

    fn stop(&mut self) -> Result<(), SinkError>;
}

impl<K: MediaSink + ?Sized> MediaSink for Box<K> {
    fn push(&mut self, frame: CorrectedFrame, timestamp: FrameTimestamp) -> Result<(), PushError> {
        (**self).push(frame, timestamp)
    }

    fn end_of_stream(&mut self) -> Result<(), SinkError> {
        (**self).end_of_stream()
    }

    fn stop(&mut self) -> Result<(), SinkError> {
        (**self).stop()
    }
}

/// A started sink together with the receiving end of its event channel.
pub struct RunningSink<K> {
    pub sink: K,
    pub events: Receiver<PipelineEvent>,
}

/// Producer half of the bounded event channel.
///
/// Never blocks: when the monitor falls behind, events are dropped with a
/// warning rather than stalling the pipeline thread that reports them.
#[derive(Clone)]
pub struct EventSender {
    tx: Sender<PipelineEvent>,
}

impl EventSender {
    /// Returns `false` once the receiving side is gone.
    pub fn emit(&self, event: PipelineEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                warn!("Event channel full, dropping {:?}", event);
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

pub fn event_channel(capacity: usize) -> (EventSender, Receiver<PipelineEvent>) {
    let (tx, rx) = flume::bounded(capacity.max(1));
    (EventSender { tx }, rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_channel_drops_instead_of_blocking() {
        let (tx, rx) = event_channel(1);
        assert!(tx.emit(PipelineEvent::EndOfStream));
        assert!(tx.emit(PipelineEvent::Info {
            source: None,
            message: "dropped".into(),
        }));
        assert_eq!(rx.len(), 1);
        assert_eq!(rx.try_recv().unwrap(), PipelineEvent::EndOfStream);
    }

    #[test]
    fn emit_reports_closed_receiver() {
        let (tx, rx) = event_channel(4);
        drop(rx);
        assert!(!tx.emit(PipelineEvent::EndOfStream));
    }

    #[test]
    fn config_errors_are_classified() {
        assert!(SinkError::InvalidConfig("x".into()).is_config());
        assert!(SinkError::Launch("x".into()).is_config());
        assert!(!SinkError::StateChange("x".into()).is_config());
    }
}
