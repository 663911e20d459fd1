//! Error handling module for vidpress

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Kind of media track a source must provide
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Video,
    Audio,
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackKind::Video => write!(f, "video"),
            TrackKind::Audio => write!(f, "audio"),
        }
    }
}

/// Main error type for vidpress operations
#[derive(Error, Debug)]
pub enum TranscodeError {
    /// Input file not found or inaccessible
    #[error("Input file not found: {path}")]
    InputFileNotFound { path: String },

    /// Source lacks a track the pipeline requires
    #[error("Source has no {kind} track")]
    TrackMissing { kind: TrackKind },

    /// Reader, writer or track input/output construction failed
    #[error("Failed to set up transcode I/O: {message}")]
    IoSetupFailure { message: String },

    /// Resolved trim range has a non-positive duration
    #[error("Trim range resolves to a non-positive duration (start {start:.3}s, duration {duration:.3}s)")]
    ZeroDurationRange { start: f64, duration: f64 },

    /// Decode-time failure while draining the source
    #[error("Reader failed: {message}")]
    ReaderFailure { message: String },

    /// Encode or storage failure while writing the output
    #[error("Writer failed: {message}")]
    WriterFailure { message: String },

    /// Invalid time format
    #[error("Invalid time format: {time}. Expected HH:MM:SS.ms, MM:SS.ms, or seconds")]
    InvalidTimeFormat { time: String },

    /// FFmpeg initialization error
    #[error("Failed to initialize FFmpeg: {message}")]
    FFmpegInitError { message: String },

    /// Configuration could not be loaded or is invalid
    #[error("Invalid configuration: {message}")]
    ConfigError { message: String },

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// FFmpeg error
    #[error("FFmpeg error: {0}")]
    FFmpegError(#[from] ffmpeg_next::Error),
}

impl TranscodeError {
    pub(crate) fn setup(message: impl Into<String>) -> Self {
        TranscodeError::IoSetupFailure {
            message: message.into(),
        }
    }

    pub(crate) fn reader(message: impl Into<String>) -> Self {
        TranscodeError::ReaderFailure {
            message: message.into(),
        }
    }

    pub(crate) fn writer(message: impl Into<String>) -> Self {
        TranscodeError::WriterFailure {
            message: message.into(),
        }
    }

    /// Keep setup-class errors as they are, wrap anything else as `IoSetupFailure`
    pub(crate) fn into_setup(self) -> Self {
        if self.is_setup_failure() {
            self
        } else {
            TranscodeError::setup(self.to_string())
        }
    }

    /// True for errors that can only surface before draining begins
    pub fn is_setup_failure(&self) -> bool {
        matches!(
            self,
            TranscodeError::InputFileNotFound { .. }
                | TranscodeError::TrackMissing { .. }
                | TranscodeError::IoSetupFailure { .. }
                | TranscodeError::ZeroDurationRange { .. }
        )
    }
}

/// Result type alias for vidpress operations
pub type TranscodeResult<T> = std::result::Result<T, TranscodeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_missing_message_names_the_track() {
        let err = TranscodeError::TrackMissing {
            kind: TrackKind::Audio,
        };
        assert_eq!(err.to_string(), "Source has no audio track");
        assert!(err.is_setup_failure());
    }

    #[test]
    fn test_runtime_failures_are_not_setup_failures() {
        assert!(!TranscodeError::reader("corrupt packet").is_setup_failure());
        assert!(!TranscodeError::writer("disk full").is_setup_failure());
        assert!(TranscodeError::setup("no encoder").is_setup_failure());
    }
}
