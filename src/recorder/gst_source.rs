//! GStreamer-backed RTSP source and Matroska clip encoder.

use crate::error::Error;
use crate::recorder::source::{ClipEncoder, ClipWriter, FrameStream, VideoSource};
use anyhow::{anyhow, Context, Result};
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app::{AppSink, AppSrc};
use log::{debug, info, warn};
use std::path::Path;
use std::time::Duration;

const SOURCE_PIPELINE: &str = "rtspsrc name=src latency=200 protocols=tcp ! decodebin ! \
     videoconvert ! jpegenc quality=85 ! appsink name=sink sync=false max-buffers=30 drop=true";

const CLIP_PIPELINE: &str =
    "appsrc name=src format=time is-live=true ! jpegparse ! matroskamux ! filesink name=sink";

fn clock_time(duration: Duration) -> gst::ClockTime {
    gst::ClockTime::from_nseconds(duration.as_nanos() as u64)
}

/// Drain pending bus messages, turning errors and EOS into `Err`.
fn check_bus(pipeline: &gst::Pipeline) -> Result<()> {
    let Some(bus) = pipeline.bus() else {
        return Ok(());
    };
    while let Some(message) = bus.timed_pop(gst::ClockTime::ZERO) {
        use gst::MessageView;
        match message.view() {
            MessageView::Error(err) => {
                return Err(Error::Stream(format!(
                    "gstreamer error from {:?}: {}",
                    err.src().map(|s| s.path_string()),
                    err.error()
                ))
                .into());
            }
            MessageView::Eos(..) => {
                return Err(Error::Stream("stream reached end".to_string()).into());
            }
            _ => {}
        }
    }
    Ok(())
}

fn sample_to_jpeg(sample: &gst::Sample) -> Result<Vec<u8>> {
    let buffer = sample.buffer().context("sample missing buffer")?;
    let map = buffer
        .map_readable()
        .map_err(|e| anyhow!("failed to map buffer: {}", e))?;
    Ok(map.as_slice().to_vec())
}

/// Live RTSP camera decoded and re-encoded to JPEG frames
pub struct GstVideoSource {
    url: String,
    open_timeout: Duration,
}

impl GstVideoSource {
    pub fn new(url: &str, open_timeout: Duration) -> Result<Self> {
        gst::init().map_err(|e| Error::Stream(format!("Failed to initialize GStreamer: {}", e)))?;
        Ok(Self {
            url: url.to_string(),
            open_timeout,
        })
    }
}

impl VideoSource for GstVideoSource {
    fn describe(&self) -> String {
        self.url.clone()
    }

    fn open(&self) -> Result<Box<dyn FrameStream>> {
        let pipeline = gst::parse::launch(SOURCE_PIPELINE)
            .context("build RTSP pipeline")?
            .downcast::<gst::Pipeline>()
            .map_err(|_| anyhow!("RTSP pipeline is not a Pipeline"))?;

        pipeline
            .by_name("src")
            .context("rtspsrc missing from pipeline")?
            .set_property("location", self.url.as_str());

        let appsink = pipeline
            .by_name("sink")
            .context("appsink missing from pipeline")?
            .downcast::<AppSink>()
            .map_err(|_| anyhow!("appsink element has unexpected type"))?;

        // From here on the stream owns the pipeline and stops it on drop.
        let mut stream = GstFrameStream {
            pipeline,
            appsink,
            pending: None,
        };

        stream
            .pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| Error::Stream(format!("Failed to start {}: {}", self.url, e)))?;

        match stream.appsink.try_pull_sample(clock_time(self.open_timeout)) {
            Some(sample) => {
                stream.pending = Some(sample_to_jpeg(&sample)?);
            }
            None => {
                check_bus(&stream.pipeline)?;
                return Err(Error::Stream(format!(
                    "No frames from {} within {:?}",
                    self.url, self.open_timeout
                ))
                .into());
            }
        }

        info!("Connected to {}", self.url);
        Ok(Box::new(stream))
    }
}

struct GstFrameStream {
    pipeline: gst::Pipeline,
    appsink: AppSink,
    pending: Option<Vec<u8>>,
}

impl FrameStream for GstFrameStream {
    fn next_frame(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>> {
        if let Some(frame) = self.pending.take() {
            return Ok(Some(frame));
        }

        check_bus(&self.pipeline)?;

        match self.appsink.try_pull_sample(clock_time(timeout)) {
            Some(sample) => Ok(Some(sample_to_jpeg(&sample)?)),
            None if self.appsink.is_eos() => {
                Err(Error::Stream("stream reached end".to_string()).into())
            }
            None => Ok(None),
        }
    }
}

impl Drop for GstFrameStream {
    fn drop(&mut self) {
        if let Err(e) = self.pipeline.set_state(gst::State::Null) {
            warn!("Failed to stop RTSP pipeline: {}", e);
        }
    }
}

/// Muxes JPEG frames into a Matroska file
#[derive(Debug, Default, Clone, Copy)]
pub struct GstClipEncoder;

impl GstClipEncoder {
    pub fn new() -> Result<Self> {
        gst::init().map_err(|e| Error::Capture(format!("Failed to initialize GStreamer: {}", e)))?;
        Ok(Self)
    }
}

impl ClipEncoder for GstClipEncoder {
    fn create(&self, path: &Path) -> Result<Box<dyn ClipWriter>> {
        let location = path
            .to_str()
            .ok_or_else(|| Error::Capture(format!("Clip path {:?} is not UTF-8", path)))?;

        let pipeline = gst::parse::launch(CLIP_PIPELINE)
            .context("build clip pipeline")?
            .downcast::<gst::Pipeline>()
            .map_err(|_| anyhow!("clip pipeline is not a Pipeline"))?;

        pipeline
            .by_name("sink")
            .context("filesink missing from pipeline")?
            .set_property("location", location);

        let appsrc = pipeline
            .by_name("src")
            .context("appsrc missing from pipeline")?
            .downcast::<AppSrc>()
            .map_err(|_| anyhow!("appsrc element has unexpected type"))?;

        let caps = gst::Caps::builder("image/jpeg")
            .field("framerate", gst::Fraction::new(0, 1))
            .build();
        appsrc.set_caps(Some(&caps));
        appsrc.set_format(gst::Format::Time);

        let writer = GstClipWriter { pipeline, appsrc };
        writer
            .pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| Error::Capture(format!("Failed to start clip pipeline: {}", e)))?;

        debug!("Writing clip to {}", location);
        Ok(Box::new(writer))
    }
}

struct GstClipWriter {
    pipeline: gst::Pipeline,
    appsrc: AppSrc,
}

impl ClipWriter for GstClipWriter {
    fn write_frame(&mut self, jpeg: &[u8], pts: Duration) -> Result<()> {
        let mut buffer = gst::Buffer::from_mut_slice(jpeg.to_vec());
        if let Some(buffer) = buffer.get_mut() {
            buffer.set_pts(clock_time(pts));
        }

        self.appsrc
            .push_buffer(buffer)
            .map_err(|e| Error::Capture(format!("Failed to push frame: {:?}", e)))?;
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<()> {
        self.appsrc
            .end_of_stream()
            .map_err(|e| Error::Capture(format!("Failed to end clip: {:?}", e)))?;

        let bus = self
            .pipeline
            .bus()
            .ok_or_else(|| Error::Capture("clip pipeline has no bus".to_string()))?;

        let message = bus.timed_pop_filtered(
            gst::ClockTime::from_seconds(10),
            &[gst::MessageType::Eos, gst::MessageType::Error],
        );

        match message.as_ref().map(|m| m.view()) {
            Some(gst::MessageView::Eos(..)) => Ok(()),
            Some(gst::MessageView::Error(err)) => {
                Err(Error::Capture(format!("Clip muxing failed: {}", err.error())).into())
            }
            _ => Err(Error::Capture("Timed out finalizing clip".to_string()).into()),
        }
    }
}

impl Drop for GstClipWriter {
    fn drop(&mut self) {
        if let Err(e) = self.pipeline.set_state(gst::State::Null) {
            warn!("Failed to stop clip pipeline: {}", e);
        }
    }
}
