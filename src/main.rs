//! Undistorting camera streamer: V4L2 capture -> lens correction -> GStreamer

use std::path::PathBuf;
use std::process::ExitCode;

use color_eyre::Result;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use undistort_streamer::{Config, Orchestrator};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("undistort_streamer=info")),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("Undistort streamer launching...");

    // Load configuration
    let path = std::env::args_os()
        .nth(1)
        .or_else(|| std::env::var_os("UNDISTORT_CONFIG"))
        .map(PathBuf::from);
    let config = Config::load(path.as_deref())?;
    info!(
        "Capture {} at {}x{} @ {} fps ({:?})",
        config.capture.device,
        config.capture.width,
        config.capture.height,
        config.capture.fps,
        config.capture.format
    );

    let orchestrator = Orchestrator::new(config);

    // Ctrl-C leaves the loop through the regular shutdown path
    let stop = orchestrator.stop_signal();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping capture");
            stop.stop();
        }
    });

    run(&orchestrator).await
}

#[cfg(all(feature = "v4l2-capture", feature = "gstreamer-pipeline"))]
async fn run(orchestrator: &Orchestrator) -> Result<ExitCode> {
    use tracing::error;
    use undistort_streamer::capture::V4l2Source;
    use undistort_streamer::sink::GstSink;

    match orchestrator.run(V4l2Source::open, GstSink::start).await {
        Ok(report) => {
            info!(
                "Streamer stopped: {} frames pushed, {} read retries, {} dropped ({:?})",
                report.capture.frames_pushed,
                report.capture.transient_errors,
                report.capture.dropped_frames,
                report.capture.exit
            );
            if let Some(monitor) = report.monitor {
                info!(
                    "Pipeline reported {} warnings and {} errors",
                    monitor.warnings, monitor.errors
                );
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            error!("{}", e);
            Ok(ExitCode::from(e.exit_code()))
        }
    }
}

#[cfg(not(all(feature = "v4l2-capture", feature = "gstreamer-pipeline")))]
async fn run(_orchestrator: &Orchestrator) -> Result<ExitCode> {
    Err(color_eyre::eyre::eyre!(
        "built without capture or sink backend; rebuild with --features v4l2-capture,gstreamer-pipeline"
    ))
}
