//! vidpress video transcoding library
//!
//! Re-encodes a source video to a constrained-bitrate H.264/AAC container,
//! correcting camera orientation, with cooperative cancellation and progress
//! reporting.
//!
//! ```no_run
//! use std::sync::Arc;
//! use vidpress::engine::{EngineSettings, ManualQueue, TranscodeRequest, Transcoder};
//! use vidpress::domain::transform::TransformPolicy;
//!
//! # fn main() -> vidpress::TranscodeResult<()> {
//! let queue = Arc::new(ManualQueue::new());
//! let transcoder = Transcoder::new(EngineSettings::default(), queue.clone())?;
//! let request = TranscodeRequest::new("in.mov", "out.mp4")
//!     .with_policy(TransformPolicy::CameraOrientationFix);
//! let handle = transcoder.start(request, |p| println!("{:.0}%", p.percent()), |outcome| {
//!     println!("{}", outcome);
//! })?;
//! handle.join();
//! queue.run_pending();
//! # Ok(())
//! # }
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod logging;
pub mod output;
pub mod ports;
pub mod probe;
pub mod utils;

// Re-export commonly used types
pub use domain::model::{EncodingConfig, Size, TrimRange};
pub use domain::transform::{AffineTransform, Orientation, TransformPolicy};
pub use engine::{JobHandle, JobOutcome, Progress, TranscodeRequest, Transcoder};
pub use error::{TranscodeError, TranscodeResult};
pub use probe::AssetInfo;

/// Initialize FFmpeg. Safe to call more than once.
pub fn init() -> TranscodeResult<()> {
    ffmpeg_next::init().map_err(|e| TranscodeError::FFmpegInitError {
        message: e.to_string(),
    })?;
    Ok(())
}
