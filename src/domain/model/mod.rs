// Domain models - Core types and data structures

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{TranscodeError, TranscodeResult};


/// Time specification with precision - represents time in seconds with fractional precision
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct TimeSpec {
    pub seconds: f64,
}

impl TimeSpec {
    /// Create a new TimeSpec from seconds
    pub fn from_seconds(seconds: f64) -> Self {
        Self { seconds }
    }

    /// Create a new TimeSpec from hours, minutes, seconds, milliseconds
    pub fn from_components(hours: u32, minutes: u32, seconds: u32, milliseconds: u32) -> Self {
        let total_seconds = hours as f64 * 3600.0
            + minutes as f64 * 60.0
            + seconds as f64
            + milliseconds as f64 / 1000.0;
        Self {
            seconds: total_seconds,
        }
    }

    /// Parse time string: seconds (`12.5`), `MM:SS.ms` or `HH:MM:SS.ms`
    pub fn parse(time_str: &str) -> TranscodeResult<Self> {
        let trimmed = time_str.trim();
        let invalid = || TranscodeError::InvalidTimeFormat {
            time: trimmed.to_string(),
        };

        if let Ok(seconds) = trimmed.parse::<f64>() {
            if seconds < 0.0 || !seconds.is_finite() {
                return Err(invalid());
            }
            return Ok(Self::from_seconds(seconds));
        }

        let parts: Vec<&str> = trimmed.split(':').collect();
        match parts.as_slice() {
            [minutes, seconds] => {
                let minutes = minutes.parse::<u32>().map_err(|_| invalid())?;
                let seconds = seconds.parse::<f64>().map_err(|_| invalid())?;
                if !(0.0..60.0).contains(&seconds) {
                    return Err(invalid());
                }
                Ok(Self::from_seconds(minutes as f64 * 60.0 + seconds))
            }
            [hours, minutes, seconds] => {
                let hours = hours.parse::<u32>().map_err(|_| invalid())?;
                let minutes = minutes.parse::<u32>().map_err(|_| invalid())?;
                let seconds = seconds.parse::<f64>().map_err(|_| invalid())?;
                if minutes >= 60 || !(0.0..60.0).contains(&seconds) {
                    return Err(invalid());
                }
                Ok(Self::from_seconds(
                    hours as f64 * 3600.0 + minutes as f64 * 60.0 + seconds,
                ))
            }
            _ => Err(invalid()),
        }
    }

    /// Format as HH:MM:SS.ms
    pub fn format_hms(&self) -> String {
        let total_ms = (self.seconds.max(0.0) * 1000.0).round() as u64;
        let hours = total_ms / 3_600_000;
        let minutes = (total_ms % 3_600_000) / 60_000;
        let seconds = (total_ms % 60_000) / 1000;
        let milliseconds = total_ms % 1000;

        if hours > 0 {
            format!("{:02}:{:02}:{:02}.{:03}", hours, minutes, seconds, milliseconds)
        } else {
            format!("{:02}:{:02}.{:03}", minutes, seconds, milliseconds)
        }
    }
}

impl fmt::Display for TimeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format_hms())
    }
}

/// Timebase for timestamp calculations - rational seconds per tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timebase {
    pub num: i32,
    pub den: i32,
}

impl Timebase {
    /// Create a new timebase
    pub fn new(num: i32, den: i32) -> TranscodeResult<Self> {
        if den == 0 || num == 0 {
            return Err(TranscodeError::ConfigError {
                message: format!("invalid timebase {}/{}", num, den),
            });
        }
        Ok(Self { num, den })
    }

    /// Convert to floating point seconds
    pub fn to_seconds(&self) -> f64 {
        self.num as f64 / self.den as f64
    }

    /// Rescale a tick count from this timebase into `target`, rounding to nearest
    pub fn rescale(&self, value: i64, target: &Timebase) -> i64 {
        if self == target {
            return value;
        }
        let mut numer = value as i128 * self.num as i128 * target.den as i128;
        let mut denom = self.den as i128 * target.num as i128;
        if denom < 0 {
            numer = -numer;
            denom = -denom;
        }
        let rounded = if numer >= 0 {
            (numer + denom / 2) / denom
        } else {
            -((-numer + denom / 2) / denom)
        };
        rounded as i64
    }

    /// Convert PTS to seconds
    pub fn pts_to_seconds(&self, pts: i64) -> f64 {
        pts as f64 * self.to_seconds()
    }

    /// Convert seconds to PTS
    pub fn seconds_to_pts(&self, seconds: f64) -> i64 {
        (seconds / self.to_seconds()).round() as i64
    }

    /// Microsecond timebase used by the demuxer for seeking
    pub fn av_time_base() -> Self {
        Self {
            num: 1,
            den: 1_000_000,
        }
    }
}

impl From<ffmpeg_next::Rational> for Timebase {
    fn from(rational: ffmpeg_next::Rational) -> Self {
        Self {
            num: rational.numerator(),
            den: rational.denominator(),
        }
    }
}

impl From<Timebase> for ffmpeg_next::Rational {
    fn from(timebase: Timebase) -> Self {
        ffmpeg_next::Rational::new(timebase.num, timebase.den)
    }
}

/// A presentation timestamp in its stream's timebase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timestamp {
    pub value: i64,
    pub timebase: Timebase,
}

impl Timestamp {
    pub fn new(value: i64, timebase: Timebase) -> Self {
        Self { value, timebase }
    }

    pub fn from_seconds(seconds: f64, timebase: Timebase) -> Self {
        Self {
            value: timebase.seconds_to_pts(seconds),
            timebase,
        }
    }

    pub fn seconds(&self) -> f64 {
        self.timebase.pts_to_seconds(self.value)
    }

    /// Express this timestamp in another timebase
    pub fn in_timebase(&self, target: Timebase) -> i64 {
        self.timebase.rescale(self.value, &target)
    }
}

/// Pixel dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Round both dimensions down to even values (minimum 2) for 4:2:0 encoding
    pub fn even(&self) -> Self {
        Self {
            width: (self.width & !1).max(2),
            height: (self.height & !1).max(2),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Portion of the source timeline to process, as requested by the caller
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrimRange {
    /// Start time in seconds
    pub start: f64,
    /// Duration in seconds
    pub duration: f64,
}

impl TrimRange {
    pub fn new(start: f64, duration: f64) -> Self {
        Self { start, duration }
    }

    /// Clamp the range to `[0, source_duration]`
    pub fn resolve(&self, source_duration: f64) -> TranscodeResult<ResolvedTrim> {
        let zero = || TranscodeError::ZeroDurationRange {
            start: self.start,
            duration: self.duration,
        };
        if !self.start.is_finite() || !self.duration.is_finite() || !source_duration.is_finite() {
            return Err(zero());
        }

        let limit = source_duration.max(0.0);
        let start = self.start.clamp(0.0, limit);
        let end = (self.start + self.duration).clamp(0.0, limit);
        let duration = end - start;
        if duration <= 0.0 {
            return Err(zero());
        }
        Ok(ResolvedTrim { start, duration })
    }
}

/// A trim range validated against the source duration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResolvedTrim {
    pub start: f64,
    pub duration: f64,
}

impl ResolvedTrim {
    /// The whole source timeline
    pub fn full(source_duration: f64) -> TranscodeResult<Self> {
        TrimRange::new(0.0, source_duration).resolve(source_duration)
    }

    pub fn end(&self) -> f64 {
        self.start + self.duration
    }

    /// `ceil(duration * fps)`, never less than one frame
    pub fn estimated_frames(&self, frame_rate: f64) -> u64 {
        if frame_rate <= 0.0 || !frame_rate.is_finite() {
            return 1;
        }
        ((self.duration * frame_rate).ceil() as u64).max(1)
    }
}

/// H.264 profile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum H264Profile {
    Baseline,
    Main,
    High,
}

impl H264Profile {
    pub fn as_str(&self) -> &'static str {
        match self {
            H264Profile::Baseline => "baseline",
            H264Profile::Main => "main",
            H264Profile::High => "high",
        }
    }
}

/// H.264 profile and level, written as `high@4.1` or `main@auto`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProfileLevel {
    pub profile: H264Profile,
    /// Level times ten (`41` for 4.1); `None` lets the encoder choose
    pub level: Option<u8>,
}

impl ProfileLevel {
    pub fn new(profile: H264Profile, level: Option<u8>) -> Self {
        Self { profile, level }
    }

    /// Level formatted for the encoder's `level` option
    pub fn level_string(&self) -> Option<String> {
        self.level.map(|l| format!("{}.{}", l / 10, l % 10))
    }
}

impl Default for ProfileLevel {
    fn default() -> Self {
        Self::new(H264Profile::High, None)
    }
}

impl fmt::Display for ProfileLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.level_string() {
            Some(level) => write!(f, "{}@{}", self.profile.as_str(), level),
            None => write!(f, "{}@auto", self.profile.as_str()),
        }
    }
}

impl FromStr for ProfileLevel {
    type Err = TranscodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || TranscodeError::ConfigError {
            message: format!("invalid H.264 profile level '{}'", s),
        };
        let lowered = s.trim().to_ascii_lowercase();
        let (profile, level) = lowered.split_once('@').unwrap_or((lowered.as_str(), "auto"));

        let profile = match profile {
            "baseline" => H264Profile::Baseline,
            "main" => H264Profile::Main,
            "high" => H264Profile::High,
            _ => return Err(invalid()),
        };

        let level = if level == "auto" {
            None
        } else {
            let (major, minor) = level.split_once('.').unwrap_or((level, "0"));
            let major: u8 = major.parse().map_err(|_| invalid())?;
            let minor: u8 = minor.parse().map_err(|_| invalid())?;
            if !(1..=6).contains(&major) || minor > 9 {
                return Err(invalid());
            }
            Some(major * 10 + minor)
        };

        Ok(Self::new(profile, level))
    }
}

impl TryFrom<String> for ProfileLevel {
    type Error = TranscodeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ProfileLevel> for String {
    fn from(value: ProfileLevel) -> Self {
        value.to_string()
    }
}

/// Sample rates the AAC encoder accepts
pub const AAC_SAMPLE_RATES: &[u32] = &[
    8000, 11025, 12000, 16000, 22050, 24000, 32000, 44100, 48000, 64000, 88200, 96000,
];

/// Target encode parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncodingConfig {
    /// Average video bitrate in bits per second
    pub video_bitrate: u64,
    /// Maximum distance between key frames, in frames
    pub max_keyframe_interval: u32,
    pub profile_level: ProfileLevel,
    /// Output audio sample rate in Hz
    pub audio_sample_rate: u32,
    /// Audio bitrate in bits per second
    pub audio_bitrate: u64,
}

impl Default for EncodingConfig {
    fn default() -> Self {
        Self {
            video_bitrate: 2_500_000,
            max_keyframe_interval: 60,
            profile_level: ProfileLevel::default(),
            audio_sample_rate: 44_100,
            audio_bitrate: 128_000,
        }
    }
}

impl EncodingConfig {
    pub fn validate(&self) -> TranscodeResult<()> {
        let invalid = |message: String| Err(TranscodeError::ConfigError { message });

        if self.video_bitrate == 0 {
            return invalid("video bitrate must be positive".to_string());
        }
        if self.audio_bitrate == 0 {
            return invalid("audio bitrate must be positive".to_string());
        }
        if self.max_keyframe_interval == 0 {
            return invalid("key-frame interval must be at least one frame".to_string());
        }
        if !AAC_SAMPLE_RATES.contains(&self.audio_sample_rate) {
            return invalid(format!(
                "audio sample rate {} Hz is not supported by AAC",
                self.audio_sample_rate
            ));
        }
        Ok(())
    }
}
