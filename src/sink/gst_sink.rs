//! GStreamer sink: corrected frames enter through an appsrc

use gstreamer as gst;
use gstreamer::glib;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use tracing::{info, instrument, warn};

use super::{
    event_channel, MediaSink, PipelineEvent, PushError, RunningSink, SinkConfig, SinkError,
};
use crate::capture::frame::{CorrectedFrame, FrameTimestamp};
use crate::CaptureConfig;

/// Live pipeline fed from Rust through its appsrc
pub struct GstSink {
    pipeline: gst::Pipeline,
    appsrc: gst_app::AppSrc,
    stopped: bool,
}

impl GstSink {
    /// Build the pipeline from the stage chain, wire its bus into the event
    /// channel and set it to PLAYING.
    #[instrument(skip_all)]
    pub fn start(
        config: &SinkConfig,
        capture: &CaptureConfig,
    ) -> Result<RunningSink<Self>, SinkError> {
        gst::init().map_err(|e| SinkError::Launch(format!("Failed to initialize GStreamer: {}", e)))?;

        let description = config.launch_description()?;
        info!("Pipeline: {}", description);

        let pipeline = gst::parse::launch(&description)
            .map_err(|e| SinkError::Launch(e.to_string()))?
            .downcast::<gst::Pipeline>()
            .map_err(|_| SinkError::Launch("description did not produce a pipeline".into()))?;

        let appsrc = pipeline
            .by_name(&config.source_name)
            .ok_or_else(|| SinkError::Launch(format!("no element named {}", config.source_name)))?
            .downcast::<gst_app::AppSrc>()
            .map_err(|_| SinkError::Launch(format!("{} is not an appsrc", config.source_name)))?;

        // Raw RGB in, timestamps supplied per buffer
        let caps = gst::Caps::builder("video/x-raw")
            .field("format", "RGB")
            .field("width", capture.width as i32)
            .field("height", capture.height as i32)
            .field("framerate", gst::Fraction::new(capture.fps as i32, 1))
            .build();
        appsrc.set_caps(Some(&caps));
        appsrc.set_is_live(true);
        appsrc.set_format(gst::Format::Time);
        appsrc.set_do_timestamp(false);
        appsrc.set_block(false); // A stalled encoder must not stall capture

        let bus = pipeline
            .bus()
            .ok_or_else(|| SinkError::Launch("Pipeline has no bus".into()))?;
        let (tx, events) = event_channel(config.event_capacity);
        let weak = pipeline.downgrade();
        bus.set_sync_handler(move |_, msg| {
            if let Some(event) = translate(msg, &weak) {
                tx.emit(event);
            }
            gst::BusSyncReply::Drop
        });

        let mut sink = Self {
            pipeline,
            appsrc,
            stopped: false,
        };

        if let Err(e) = sink.pipeline.set_state(gst::State::Playing) {
            if let Err(stop_err) = sink.stop() {
                warn!("{}", stop_err);
            }
            return Err(SinkError::StateChange(format!(
                "Failed to start pipeline: {:?}",
                e
            )));
        }

        info!("Sink pipeline playing");
        Ok(RunningSink { sink, events })
    }
}

impl MediaSink for GstSink {
    fn push(&mut self, frame: CorrectedFrame, timestamp: FrameTimestamp) -> Result<(), PushError> {
        if self.stopped {
            return Err(PushError::Stopped);
        }

        let sequence = frame.sequence;
        // Wraps the frame's storage; the buffer owns it from here on
        let mut buffer = gst::Buffer::from_slice(frame.into_data());
        {
            let buffer = buffer.make_mut();
            buffer.set_pts(gst::ClockTime::from_nseconds(timestamp.pts.as_nanos() as u64));
            buffer.set_duration(gst::ClockTime::from_nseconds(
                timestamp.duration.as_nanos() as u64,
            ));
            buffer.set_offset(sequence);
        }

        self.appsrc
            .push_buffer(buffer)
            .map(|_| ())
            .map_err(|flow| PushError::Rejected {
                sequence,
                reason: format!("{:?}", flow),
            })
    }

    fn end_of_stream(&mut self) -> Result<(), SinkError> {
        self.appsrc
            .end_of_stream()
            .map(|_| ())
            .map_err(|flow| SinkError::EndOfStream(format!("{:?}", flow)))
    }

    fn stop(&mut self) -> Result<(), SinkError> {
        if self.stopped {
            return Ok(());
        }
        self.stopped = true;
        info!("Stopping sink pipeline");

        let result = self
            .pipeline
            .set_state(gst::State::Null)
            .map(|_| ())
            .map_err(|e| SinkError::StateChange(format!("Failed to stop pipeline: {:?}", e)));

        // Dropping the handler closes the event channel
        if let Some(bus) = self.pipeline.bus() {
            bus.unset_sync_handler();
        }
        result
    }
}

impl Drop for GstSink {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

fn translate(msg: &gst::Message, pipeline: &glib::WeakRef<gst::Pipeline>) -> Option<PipelineEvent> {
    use gst::MessageView;

    let source = msg.src().map(|s| s.path_string().to_string());
    match msg.view() {
        MessageView::Eos(..) => Some(PipelineEvent::EndOfStream),
        MessageView::Error(err) => Some(PipelineEvent::Error {
            source,
            message: err.error().to_string(),
            debug: err.debug().map(|d| d.to_string()),
        }),
        MessageView::Warning(warning) => Some(PipelineEvent::Warning {
            source,
            message: warning.error().to_string(),
            debug: warning.debug().map(|d| d.to_string()),
        }),
        MessageView::Info(info) => Some(PipelineEvent::Info {
            source,
            message: info.error().to_string(),
        }),
        MessageView::StateChanged(change) => {
            // Only the top-level pipeline; element transitions are noise
            let top = pipeline.upgrade()?;
            if msg.src() != Some(top.upcast_ref::<gst::Object>()) {
                return None;
            }
            Some(PipelineEvent::Info {
                source,
                message: format!(
                    "state changed: {:?} -> {:?}",
                    change.old(),
                    change.current()
                ),
            })
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::StageConfig;
    use crate::Config;

    #[test]
    fn failed_start_tears_the_pipeline_down() {
        let config = SinkConfig {
            stages: vec![
                StageConfig::VideoConvert {
                    format: "I420".into(),
                },
                StageConfig::FileSink {
                    location: "/nonexistent/undistort/out.yuv".into(),
                },
            ],
            ..SinkConfig::default()
        };

        let err = match GstSink::start(&config, &Config::default().capture) {
            Ok(_) => panic!("filesink into a missing directory must not reach PLAYING"),
            Err(e) => e,
        };
        assert!(matches!(err, SinkError::StateChange(_)));
    }
}
