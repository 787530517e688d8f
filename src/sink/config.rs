//! Typed description of the downstream processing chain.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use super::SinkError;

const SPEED_PRESETS: &[&str] = &[
    "ultrafast",
    "superfast",
    "veryfast",
    "faster",
    "fast",
    "medium",
    "slow",
    "slower",
    "veryslow",
    "placebo",
];

const TUNES: &[&str] = &[
    "zerolatency",
    "fastdecode",
    "psnr",
    "ssim",
    "grain",
    "animation",
    "film",
    "stillimage",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    /// Name given to the ingestion element.
    pub source_name: String,
    /// Capacity of the bounded health-event channel.
    pub event_capacity: usize,
    pub stages: Vec<StageConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Leaky {
    No,
    Upstream,
    Downstream,
}

/// One element of the chain, named after the element it becomes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StageConfig {
    Queue {
        max_buffers: u32,
        leaky: Leaky,
    },
    VideoConvert {
        format: String,
    },
    X265Enc {
        bitrate: u32,
        speed_preset: String,
        tune: String,
        key_int_max: u32,
    },
    X264Enc {
        bitrate: u32,
        speed_preset: String,
        tune: String,
        key_int_max: u32,
    },
    H265Parse {
        config_interval: i32,
    },
    H264Parse {
        config_interval: i32,
    },
    RtspClientSink {
        location: String,
        latency_ms: u32,
    },
    FileSink {
        location: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Codec {
    H264,
    H265,
}

impl StageConfig {
    fn is_terminal(&self) -> bool {
        matches!(
            self,
            StageConfig::RtspClientSink { .. } | StageConfig::FileSink { .. }
        )
    }

    fn encodes(&self) -> Option<Codec> {
        match self {
            StageConfig::X264Enc { .. } => Some(Codec::H264),
            StageConfig::X265Enc { .. } => Some(Codec::H265),
            _ => None,
        }
    }

    fn parses(&self) -> Option<Codec> {
        match self {
            StageConfig::H264Parse { .. } => Some(Codec::H264),
            StageConfig::H265Parse { .. } => Some(Codec::H265),
            _ => None,
        }
    }

    fn check(&self) -> Result<(), String> {
        match self {
            StageConfig::Queue { max_buffers, .. } if *max_buffers == 0 => {
                Err("queue max_buffers must be positive".into())
            }
            StageConfig::VideoConvert { format }
                if format.is_empty() || !format.chars().all(|c| c.is_ascii_alphanumeric()) =>
            {
                Err(format!("videoconvert format {format:?} is not a raw video format"))
            }
            StageConfig::X264Enc {
                bitrate,
                speed_preset,
                tune,
                key_int_max,
            }
            | StageConfig::X265Enc {
                bitrate,
                speed_preset,
                tune,
                key_int_max,
            } => {
                if *bitrate == 0 || *key_int_max == 0 {
                    return Err("encoder bitrate and key_int_max must be positive".into());
                }
                if !SPEED_PRESETS.contains(&speed_preset.as_str()) {
                    return Err(format!("unknown speed preset {speed_preset:?}"));
                }
                if !TUNES.contains(&tune.as_str()) {
                    return Err(format!("unknown tune {tune:?}"));
                }
                Ok(())
            }
            StageConfig::RtspClientSink { location, .. } | StageConfig::FileSink { location }
                if location.contains('"') =>
            {
                Err(format!("location {location:?} must not contain a double quote"))
            }
            StageConfig::RtspClientSink { location, .. }
                if !(location.starts_with("rtsp://") || location.starts_with("rtsps://")) =>
            {
                Err(format!("rtsp location {location:?} needs an rtsp:// or rtsps:// scheme"))
            }
            StageConfig::FileSink { location } if location.is_empty() => {
                Err("filesink location is empty".into())
            }
            _ => Ok(()),
        }
    }

    fn render(&self, out: &mut String) {
        // Writing into a String cannot fail
        let _ = match self {
            StageConfig::Queue { max_buffers, leaky } => write!(
                out,
                "queue max-size-buffers={} max-size-time=0 max-size-bytes=0 leaky={}",
                max_buffers,
                match leaky {
                    Leaky::No => "no",
                    Leaky::Upstream => "upstream",
                    Leaky::Downstream => "downstream",
                }
            ),
            StageConfig::VideoConvert { format } => {
                write!(out, "videoconvert ! video/x-raw,format={}", format)
            }
            StageConfig::X265Enc {
                bitrate,
                speed_preset,
                tune,
                key_int_max,
            } => write!(
                out,
                "x265enc bitrate={} speed-preset={} tune={} key-int-max={}",
                bitrate, speed_preset, tune, key_int_max
            ),
            StageConfig::X264Enc {
                bitrate,
                speed_preset,
                tune,
                key_int_max,
            } => write!(
                out,
                "x264enc bitrate={} speed-preset={} tune={} key-int-max={}",
                bitrate, speed_preset, tune, key_int_max
            ),
            StageConfig::H265Parse { config_interval } => {
                write!(out, "h265parse config-interval={}", config_interval)
            }
            StageConfig::H264Parse { config_interval } => {
                write!(out, "h264parse config-interval={}", config_interval)
            }
            StageConfig::RtspClientSink {
                location,
                latency_ms,
            } => write!(
                out,
                "rtspclientsink location=\"{}\" latency={}",
                location, latency_ms
            ),
            StageConfig::FileSink { location } => {
                write!(out, "filesink location=\"{}\"", location)
            }
        };
    }
}

impl Default for SinkConfig {
    fn default() -> Self {
        let queue = |max_buffers| StageConfig::Queue {
            max_buffers,
            leaky: Leaky::Downstream,
        };
        Self {
            source_name: "mysrc".into(),
            event_capacity: 64,
            stages: vec![
                queue(5),
                StageConfig::VideoConvert {
                    format: "I420".into(),
                },
                queue(5),
                StageConfig::X265Enc {
                    bitrate: 1800,
                    speed_preset: "ultrafast".into(),
                    tune: "zerolatency".into(),
                    key_int_max: 30,
                },
                queue(5),
                StageConfig::H265Parse { config_interval: 1 },
                queue(20),
                StageConfig::RtspClientSink {
                    location: "rtsp://127.0.0.1:8554/video1".into(),
                    latency_ms: 10,
                },
            ],
        }
    }
}

impl SinkConfig {
    pub fn validate(&self) -> Result<(), SinkError> {
        let invalid = |msg: String| Err(SinkError::InvalidConfig(msg));

        if self.source_name.is_empty()
            || !self
                .source_name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return invalid(format!("source name {:?} is not a valid element name", self.source_name));
        }
        let Some(last) = self.stages.last() else {
            return invalid("stage chain is empty".into());
        };
        if !last.is_terminal() {
            return invalid("last stage must be rtspclientsink or filesink".into());
        }

        let mut encoder = None;
        let stages = self.stages.len();
        for (i, stage) in self.stages.iter().enumerate() {
            stage
                .check()
                .or_else(|msg| invalid(format!("stage {i}: {msg}")))?;

            if stage.is_terminal() && i + 1 != stages {
                return invalid(format!("stage {i}: terminal stage must be last"));
            }
            if let Some(codec) = stage.encodes() {
                if encoder.is_some() {
                    return invalid(format!("stage {i}: more than one encoder"));
                }
                encoder = Some(codec);
            }
            if let Some(codec) = stage.parses() {
                if encoder != Some(codec) {
                    return invalid(format!("stage {i}: parser without a matching upstream encoder"));
                }
            }
        }

        if matches!(last, StageConfig::RtspClientSink { .. }) && encoder.is_none() {
            return invalid("rtspclientsink needs an encoded stream".into());
        }
        Ok(())
    }

    /// Launch-syntax description starting at the ingestion element.
    ///
    /// Caps and live-source properties of the ingestion element are set on the
    /// element itself, not here.
    pub fn launch_description(&self) -> Result<String, SinkError> {
        self.validate()?;
        let mut out = format!("appsrc name={}", self.source_name);
        for stage in &self.stages {
            out.push_str(" ! ");
            stage.render(&mut out);
        }
        Ok(out)
    }
}
