pub mod capture;
pub mod clip_store;
#[cfg(feature = "rtsp-gstreamer")]
pub mod gst_source;
pub mod retry;
pub mod source;

pub use capture::{CaptureOutcome, VideoCaptureManager};
pub use clip_store::{ClipHandle, ClipStore};
pub use retry::RetryPolicy;
