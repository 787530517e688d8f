pub mod capture;
pub mod pipeline;
pub mod sink;
pub mod undistort;

use std::path::Path;

use capture::frame::PixelFormat;
use serde::{Deserialize, Serialize};
use sink::config::SinkConfig;

pub use capture::{CorrectedFrame, RawFrame};
pub use pipeline::{Orchestrator, RunReport, StartupError, StopSignal};

/// Environment prefix for configuration overrides, e.g. `UNDISTORT_CAPTURE__FPS=15`.
pub const ENV_PREFIX: &str = "UNDISTORT";

/// System configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub capture: CaptureConfig,
    pub calibration: CalibrationConfig,
    pub sink: SinkConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub format: PixelFormat,
    pub buffer_count: u32,
    pub settle_ms: u64, // Time for the device to apply format changes
}

/// Camera calibration as produced by an offline calibration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationConfig {
    /// Row-major 3x3 intrinsic matrix.
    pub camera_matrix: [[f64; 3]; 3],
    /// k1, k2, p1, p2, k3
    pub dist_coeffs: [f64; 5],
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub read_backoff_ms: u64,
    pub monitor_join_timeout_ms: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
}

impl Default for Config {
    fn default() -> Self {
        Self {
            capture: CaptureConfig {
                device: "/dev/video0".into(),
                width: 1280,
                height: 720,
                fps: 30,
                format: PixelFormat::Mjpeg,
                buffer_count: 4,
                settle_ms: 200,
            },
            calibration: CalibrationConfig {
                camera_matrix: [
                    [619.97674, 0.0, 586.32027],
                    [0.0, 625.27679, 339.90312],
                    [0.0, 0.0, 1.0],
                ],
                dist_coeffs: [-0.291149, 0.057760, -0.006811, 0.001601, 0.0],
            },
            sink: SinkConfig::default(),
            pipeline: PipelineConfig {
                read_backoff_ms: 10,
                monitor_join_timeout_ms: 2000,
            },
        }
    }
}

impl Config {
    /// Layer built-in defaults, an optional TOML file and `UNDISTORT_*` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Config::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }
}
