//! Source inspection and validation module

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::domain::model::{ResolvedTrim, Size, Timebase};
use crate::domain::transform::{AffineTransform, Orientation};

pub mod inspector;
pub mod validator;

pub use inspector::AssetInspector;
pub use validator::AssetValidator;

/// Metadata needed to plan a transcode job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetInfo {
    /// File path
    pub path: PathBuf,
    /// Container format name
    pub container: String,
    /// File size in bytes
    pub file_size: u64,
    /// Duration in seconds
    pub duration: f64,
    /// Estimated bit rate (video stream, falling back to the container)
    pub bit_rate: Option<u64>,
    pub video: VideoTrackInfo,
    pub audio: AudioTrackInfo,
}

/// Video track information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoTrackInfo {
    /// Stream index
    pub index: usize,
    /// Codec name
    pub codec: String,
    /// Decoded frame size
    pub coded_size: Size,
    /// Frame size after the intrinsic transform
    pub natural_size: Size,
    /// Nominal frame rate
    pub frame_rate: f64,
    pub bit_rate: Option<u64>,
    pub time_base: Timebase,
    /// Display matrix carried by the container, identity when absent
    pub intrinsic_transform: AffineTransform,
}

/// Audio track information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioTrackInfo {
    /// Stream index
    pub index: usize,
    /// Codec name
    pub codec: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub bit_rate: Option<u64>,
    pub time_base: Timebase,
}

impl AssetInfo {
    /// Orientation classified from the intrinsic transform
    pub fn orientation(&self) -> Orientation {
        Orientation::classify(&self.video.intrinsic_transform)
    }

    /// Expected number of video frames in `trim`
    pub fn estimated_frames(&self, trim: &ResolvedTrim) -> u64 {
        trim.estimated_frames(self.video.frame_rate)
    }

    /// One frame interval in seconds
    pub fn frame_interval(&self) -> f64 {
        if self.video.frame_rate > 0.0 {
            1.0 / self.video.frame_rate
        } else {
            0.0
        }
    }
}
