//! Pipeline health monitor.
//!
//! Runs as its own task for the lifetime of the sink and only ever logs:
//! downstream warnings and errors never feed back into the capture loop.

use flume::Receiver;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::sink::PipelineEvent;

/// Why the monitor stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorExit {
    EndOfStream,
    ChannelClosed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorReport {
    pub infos: u64,
    pub warnings: u64,
    pub errors: u64,
    pub exit: MonitorExit,
}

/// Drain `events` until end of stream or until every sender is gone.
pub async fn monitor(events: Receiver<PipelineEvent>) -> MonitorReport {
    let (mut infos, mut warnings, mut errors) = (0, 0, 0);
    let report = |infos, warnings, errors, exit| MonitorReport {
        infos,
        warnings,
        errors,
        exit,
    };

    while let Ok(event) = events.recv_async().await {
        match event {
            PipelineEvent::Info { source, message } => {
                infos += 1;
                info!(source = source.as_deref().unwrap_or("-"), "Pipeline: {}", message);
            }
            PipelineEvent::Warning {
                source,
                message,
                debug: detail,
            } => {
                warnings += 1;
                warn!(
                    source = source.as_deref().unwrap_or("-"),
                    debug = detail.as_deref().unwrap_or(""),
                    "Pipeline warning: {}",
                    message
                );
            }
            PipelineEvent::Error {
                source,
                message,
                debug: detail,
            } => {
                errors += 1;
                error!(
                    source = source.as_deref().unwrap_or("-"),
                    debug = detail.as_deref().unwrap_or(""),
                    "Pipeline error: {}",
                    message
                );
            }
            PipelineEvent::EndOfStream => {
                info!("Pipeline reached end of stream");
                return report(infos, warnings, errors, MonitorExit::EndOfStream);
            }
        }
    }

    debug!("Pipeline event channel closed");
    report(infos, warnings, errors, MonitorExit::ChannelClosed)
}

/// Start the monitor on the current runtime.
pub fn spawn(events: Receiver<PipelineEvent>) -> JoinHandle<MonitorReport> {
    tokio::spawn(monitor(events))
}
