//! Command-line argument definitions

use std::path::PathBuf;

use clap::{Args, ValueEnum};
use clap_num::si_number;

use crate::domain::model::{EncodingConfig, ProfileLevel, Size, TimeSpec, TrimRange};
use crate::domain::transform::{AffineTransform, TransformPolicy};
use crate::error::{TranscodeError, TranscodeResult};

/// Transform policy as named on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PolicyArg {
    /// Leave frames as decoded
    Identity,
    /// Rotate camera footage upright
    CameraFix,
    /// Apply `--transform` only
    Custom,
    /// Rotate upright, then apply `--transform`
    CameraFixCustom,
}

/// Arguments for the transcode command
#[derive(Args, Debug)]
pub struct TranscodeArgs {
    /// Input video file path
    #[arg(short, long)]
    pub input: PathBuf,

    /// Output file path (default: <stem>_transcoded.<container> next to the input)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Output width in pixels
    #[arg(long, requires = "height")]
    pub width: Option<u32>,

    /// Output height in pixels
    #[arg(long, requires = "width")]
    pub height: Option<u32>,

    /// Trim start (HH:MM:SS.ms, MM:SS.ms, or seconds)
    #[arg(short, long)]
    pub start: Option<String>,

    /// Trim duration (HH:MM:SS.ms, MM:SS.ms, or seconds)
    #[arg(short, long)]
    pub duration: Option<String>,

    /// Transform policy
    #[arg(long, value_enum, default_value_t = PolicyArg::Identity)]
    pub policy: PolicyArg,

    /// Custom transform coefficients: a,b,c,d,tx,ty
    #[arg(long, allow_hyphen_values = true)]
    pub transform: Option<AffineTransform>,

    /// Average video bitrate, e.g. 2M
    #[arg(long, value_parser = si_number::<u64>)]
    pub video_bitrate: Option<u64>,

    /// Maximum frames between key frames
    #[arg(long)]
    pub keyframe_interval: Option<u32>,

    /// H.264 profile and level, e.g. high@4.1
    #[arg(long)]
    pub profile: Option<ProfileLevel>,

    /// Output audio sample rate in Hz
    #[arg(long)]
    pub audio_sample_rate: Option<u32>,

    /// Audio bitrate, e.g. 128k
    #[arg(long, value_parser = si_number::<u64>)]
    pub audio_bitrate: Option<u64>,

    /// Emit progress and the result as JSON lines
    #[arg(long)]
    pub json: bool,

    /// Re-inspect the output after a successful transcode
    #[arg(long)]
    pub verify: bool,
}

impl TranscodeArgs {
    /// Target size when both dimensions were given
    pub fn target_size(&self) -> Option<Size> {
        match (self.width, self.height) {
            (Some(width), Some(height)) => Some(Size::new(width, height)),
            _ => None,
        }
    }

    /// Trim range from `--start` and `--duration`. Without a duration the
    /// range runs to the end of the source.
    pub fn trim(&self) -> TranscodeResult<Option<TrimRange>> {
        let start = match &self.start {
            Some(start) => TimeSpec::parse(start)?.seconds,
            None => 0.0,
        };
        let duration = match &self.duration {
            Some(duration) => Some(TimeSpec::parse(duration)?.seconds),
            None => None,
        };

        Ok(match (self.start.is_some(), duration) {
            (_, Some(duration)) => Some(TrimRange::new(start, duration)),
            (true, None) => Some(TrimRange::new(start, f64::MAX)),
            (false, None) => None,
        })
    }

    pub fn policy(&self) -> TranscodeResult<TransformPolicy> {
        let custom = || {
            self.transform.ok_or_else(|| TranscodeError::ConfigError {
                message: "--transform is required for custom policies".to_string(),
            })
        };
        Ok(match self.policy {
            PolicyArg::Identity => TransformPolicy::Identity,
            PolicyArg::CameraFix => TransformPolicy::CameraOrientationFix,
            PolicyArg::Custom => TransformPolicy::Custom(custom()?),
            PolicyArg::CameraFixCustom => TransformPolicy::CameraFixThenCustom(custom()?),
        })
    }

    /// Layer the flags over the configured encoding
    pub fn apply_encoding(&self, base: &EncodingConfig) -> EncodingConfig {
        let mut encoding = base.clone();
        if let Some(bitrate) = self.video_bitrate {
            encoding.video_bitrate = bitrate;
        }
        if let Some(interval) = self.keyframe_interval {
            encoding.max_keyframe_interval = interval;
        }
        if let Some(profile) = self.profile {
            encoding.profile_level = profile;
        }
        if let Some(rate) = self.audio_sample_rate {
            encoding.audio_sample_rate = rate;
        }
        if let Some(bitrate) = self.audio_bitrate {
            encoding.audio_bitrate = bitrate;
        }
        encoding
    }
}

/// Arguments for the inspect command
#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Input video file path
    #[arg(short, long)]
    pub input: PathBuf,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}
