use crate::config::{ClipContainer, VideoConfig};
use crate::error::Error;
use crate::plate::NormalizedPlate;
use crate::recorder::clip_store::{ClipHandle, ClipStore};
use crate::recorder::retry::{retry_blocking, RetryExhausted, RetryPolicy};
use crate::recorder::source::{ClipEncoder, FrameStream, MjpegClipEncoder, VideoSource};
use anyhow::Result;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Result of a best-effort clip capture
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    Captured(ClipHandle),
    Unavailable(String),
}

/// Records clips and still frames from the camera and owns the clip files.
///
/// Every capture opens its own connection to the source and releases it
/// before returning, on success and failure alike.
#[derive(Clone)]
pub struct VideoCaptureManager {
    source: Option<Arc<dyn VideoSource>>,
    encoder: Arc<dyn ClipEncoder>,
    clips: ClipStore,
    extension: &'static str,
    retry: RetryPolicy,
    frame_timeout: Duration,
    max_reconnects: u32,
}

impl VideoCaptureManager {
    pub fn new(
        source: Option<Arc<dyn VideoSource>>,
        encoder: Arc<dyn ClipEncoder>,
        config: &VideoConfig,
    ) -> Self {
        Self {
            source,
            encoder,
            clips: ClipStore::new(&config.storage_path),
            extension: config.container.extension(),
            retry: RetryPolicy::from(&config.retry),
            frame_timeout: config.frame_timeout(),
            max_reconnects: config.max_reconnects,
        }
    }

    /// Build the source and encoder the configuration asks for.
    pub fn from_config(config: &VideoConfig) -> Result<Self> {
        let encoder: Arc<dyn ClipEncoder> = match config.container {
            ClipContainer::Mjpeg => Arc::new(MjpegClipEncoder),
            #[cfg(feature = "rtsp-gstreamer")]
            ClipContainer::Mkv => Arc::new(crate::recorder::gst_source::GstClipEncoder::new()?),
            #[cfg(not(feature = "rtsp-gstreamer"))]
            ClipContainer::Mkv if config.capture_enabled => {
                return Err(Error::Config(
                    "mkv clips need the rtsp-gstreamer feature; use container = \"mjpeg\""
                        .to_string(),
                )
                .into())
            }
            #[cfg(not(feature = "rtsp-gstreamer"))]
            ClipContainer::Mkv => Arc::new(MjpegClipEncoder),
        };

        let source = match config.rtsp_url.as_deref() {
            None => {
                if config.capture_enabled {
                    warn!("Video capture enabled but no rtsp_url configured");
                }
                None
            }
            Some(url) => Some(Self::open_source(url, config)?),
        };

        let manager = Self::new(source, encoder, config);
        if manager.source.is_some() {
            manager.clips.ensure_dir()?;
        }
        Ok(manager)
    }

    #[cfg(feature = "rtsp-gstreamer")]
    fn open_source(url: &str, config: &VideoConfig) -> Result<Arc<dyn VideoSource>> {
        let parsed = url::Url::parse(url)
            .map_err(|e| Error::Config(format!("Invalid rtsp_url {:?}: {}", url, e)))?;
        if !matches!(parsed.scheme(), "rtsp" | "rtsps") {
            return Err(Error::Config(format!(
                "rtsp_url must use rtsp://, got {}",
                parsed.scheme()
            ))
            .into());
        }

        let source = crate::recorder::gst_source::GstVideoSource::new(
            url,
            config.frame_timeout() + config.snapshot_delay(),
        )?;
        Ok(Arc::new(source))
    }

    #[cfg(not(feature = "rtsp-gstreamer"))]
    fn open_source(url: &str, _config: &VideoConfig) -> Result<Arc<dyn VideoSource>> {
        Err(Error::Config(format!(
            "Cannot open {}: built without the rtsp-gstreamer feature",
            url
        ))
        .into())
    }

    /// Whether a camera is configured at all
    pub fn has_source(&self) -> bool {
        self.source.is_some()
    }

    pub fn clips(&self) -> &ClipStore {
        &self.clips
    }

    /// Record `duration` of wall-clock video for `plate`.
    pub async fn capture(
        &self,
        plate: &NormalizedPlate,
        duration: Duration,
        at: DateTime<Utc>,
    ) -> CaptureOutcome {
        let this = self.clone();
        let plate = plate.clone();
        tokio::task::spawn_blocking(move || this.capture_blocking(&plate, duration, at))
            .await
            .unwrap_or_else(|e| CaptureOutcome::Unavailable(format!("capture task failed: {}", e)))
    }

    /// Grab one JPEG frame after letting the stream run for `warmup`.
    pub async fn snapshot(&self, warmup: Duration) -> Option<Vec<u8>> {
        let this = self.clone();
        match tokio::task::spawn_blocking(move || this.snapshot_blocking(warmup)).await {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Snapshot task failed: {}", e);
                None
            }
        }
    }

    /// Remove the file behind a stored reference. Missing files are fine.
    pub async fn delete_clip(&self, clip: &ClipHandle) -> Result<bool> {
        self.clips.delete(clip)
    }

    fn open_with_retry(
        &self,
        source: &dyn VideoSource,
    ) -> Result<Box<dyn FrameStream>, RetryExhausted<anyhow::Error>> {
        retry_blocking(&self.retry, |attempt| {
            debug!(
                "Opening {} (attempt {}/{})",
                source.describe(),
                attempt,
                self.retry.max_attempts
            );
            source.open()
        })
    }

    fn capture_blocking(
        &self,
        plate: &NormalizedPlate,
        duration: Duration,
        at: DateTime<Utc>,
    ) -> CaptureOutcome {
        let Some(source) = self.source.as_deref() else {
            return CaptureOutcome::Unavailable("no video source configured".to_string());
        };

        let mut stream = match self.open_with_retry(source) {
            Ok(stream) => stream,
            Err(e) => {
                warn!("[{}] Video source unavailable: {}", plate, e);
                return CaptureOutcome::Unavailable(e.to_string());
            }
        };

        if let Err(e) = self.clips.ensure_dir() {
            return CaptureOutcome::Unavailable(e.to_string());
        }

        let clip = ClipHandle::generate(plate, at, self.extension);
        let path = self.clips.path_for(&clip);
        let mut writer = match self.encoder.create(&path) {
            Ok(writer) => writer,
            Err(e) => {
                self.discard(&clip);
                return CaptureOutcome::Unavailable(format!("cannot create clip: {}", e));
            }
        };

        let started = Instant::now();
        let mut frames: u64 = 0;
        let mut reconnects = 0;

        loop {
            let elapsed = started.elapsed();
            if elapsed >= duration {
                break;
            }

            match stream.next_frame(self.frame_timeout.min(duration - elapsed)) {
                Ok(Some(frame)) => {
                    if let Err(e) = writer.write_frame(&frame, started.elapsed()) {
                        warn!("[{}] Failed to write frame: {}", plate, e);
                        break;
                    }
                    frames += 1;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("[{}] Stream read failed after {} frames: {}", plate, frames, e);
                    // release the broken connection before dialing again
                    drop(stream);

                    if reconnects >= self.max_reconnects {
                        info!("[{}] Reconnect budget spent, keeping partial clip", plate);
                        break;
                    }
                    reconnects += 1;

                    match self.open_with_retry(source) {
                        Ok(reopened) => stream = reopened,
                        Err(e) => {
                            warn!("[{}] Reconnect failed, keeping partial clip: {}", plate, e);
                            break;
                        }
                    }
                }
            }
        }

        let finished = writer.finish();

        if frames == 0 {
            self.discard(&clip);
            return CaptureOutcome::Unavailable("no frames received".to_string());
        }
        if let Err(e) = finished {
            self.discard(&clip);
            return CaptureOutcome::Unavailable(format!("cannot finalize clip: {}", e));
        }

        info!(
            "[{}] Captured {} ({} frames in {:.1}s)",
            plate,
            clip,
            frames,
            started.elapsed().as_secs_f32()
        );
        CaptureOutcome::Captured(clip)
    }

    fn snapshot_blocking(&self, warmup: Duration) -> Option<Vec<u8>> {
        let source = self.source.as_deref()?;

        let mut stream = match self.open_with_retry(source) {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Snapshot skipped: {}", e);
                return None;
            }
        };

        let started = Instant::now();
        let deadline = warmup + self.frame_timeout;
        let mut latest = None;

        loop {
            let elapsed = started.elapsed();
            if (elapsed >= warmup && latest.is_some()) || elapsed >= deadline {
                break;
            }
            match stream.next_frame(self.frame_timeout) {
                Ok(Some(frame)) => latest = Some(frame),
                Ok(None) => {}
                Err(e) => {
                    warn!("Snapshot stream failed: {}", e);
                    break;
                }
            }
        }

        latest
    }

    fn discard(&self, clip: &ClipHandle) {
        if let Err(e) = self.clips.delete(clip) {
            warn!("Failed to discard clip {}: {}", clip, e);
        }
    }
}
