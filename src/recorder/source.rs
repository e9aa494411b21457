use crate::error::Error;
use anyhow::Result;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Duration;

/// A live camera that can be opened for reading.
pub trait VideoSource: Send + Sync {
    /// Human-readable location, for logs
    fn describe(&self) -> String;

    /// Connect to the source. The returned stream owns the connection and
    /// releases it when dropped.
    fn open(&self) -> Result<Box<dyn FrameStream>>;
}

/// An open connection delivering JPEG-encoded frames.
pub trait FrameStream: Send {
    /// Wait up to `timeout` for the next frame. `Ok(None)` means no frame
    /// arrived in time but the stream is still healthy; `Err` means the
    /// stream broke and must be reopened.
    fn next_frame(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>>;
}

/// Creates clip files.
pub trait ClipEncoder: Send + Sync {
    fn create(&self, path: &Path) -> Result<Box<dyn ClipWriter>>;
}

/// An output clip being written.
pub trait ClipWriter: Send {
    /// Append one JPEG frame presented `pts` after the clip started.
    fn write_frame(&mut self, jpeg: &[u8], pts: Duration) -> Result<()>;

    /// Flush and close the file.
    fn finish(self: Box<Self>) -> Result<()>;
}

/// Writes clips as a plain Motion-JPEG stream (concatenated JPEG images).
#[derive(Debug, Default, Clone, Copy)]
pub struct MjpegClipEncoder;

impl ClipEncoder for MjpegClipEncoder {
    fn create(&self, path: &Path) -> Result<Box<dyn ClipWriter>> {
        let file = File::create(path)
            .map_err(|e| Error::Io(format!("Failed to create clip {:?}: {}", path, e)))?;
        Ok(Box::new(MjpegClipWriter {
            file: BufWriter::new(file),
        }))
    }
}

struct MjpegClipWriter {
    file: BufWriter<File>,
}

impl ClipWriter for MjpegClipWriter {
    fn write_frame(&mut self, jpeg: &[u8], _pts: Duration) -> Result<()> {
        self.file
            .write_all(jpeg)
            .map_err(|e| Error::Io(format!("Failed to write frame: {}", e)))?;
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<()> {
        let file = self
            .file
            .into_inner()
            .map_err(|e| Error::Io(format!("Failed to flush clip: {}", e.error())))?;
        file.sync_all()?;
        Ok(())
    }
}
