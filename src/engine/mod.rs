//! Core transcode engine module

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::domain::model::{EncodingConfig, ResolvedTrim, Size, TrimRange};
use crate::domain::transform::{ResolvedTransform, TransformPolicy};
use crate::error::TranscodeError;
use crate::ports::RenderTarget;
use crate::probe::AssetInfo;

pub mod dispatch;
pub mod pipeline;
pub mod progress;
pub mod reporter;
pub mod transcoder;

pub use crate::config::EngineSettings;
pub use dispatch::{CallbackQueue, ManualQueue, TokioQueue};
pub use pipeline::FramePipeline;
pub use progress::{Progress, ProgressController};
pub use reporter::CompletionReporter;
pub use transcoder::{Canceller, JobHandle, Transcoder};

/// What the caller asks a transcoder to do
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscodeRequest {
    /// Source file
    pub source: PathBuf,
    /// Destination file, created only on success
    pub destination: PathBuf,
    /// Output frame size, defaults to the transformed frame size
    pub target_size: Option<Size>,
    /// Portion of the source to transcode, defaults to all of it
    pub trim: Option<TrimRange>,
    pub policy: TransformPolicy,
    pub encoding: EncodingConfig,
}

impl TranscodeRequest {
    pub fn new(source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            target_size: None,
            trim: None,
            policy: TransformPolicy::Identity,
            encoding: EncodingConfig::default(),
        }
    }

    pub fn with_target_size(mut self, size: Size) -> Self {
        self.target_size = Some(size);
        self
    }

    pub fn with_trim(mut self, trim: TrimRange) -> Self {
        self.trim = Some(trim);
        self
    }

    pub fn with_policy(mut self, policy: TransformPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_encoding(mut self, encoding: EncodingConfig) -> Self {
        self.encoding = encoding;
        self
    }
}

/// Everything resolved ahead of setup. Readers and writers are built from this.
#[derive(Debug, Clone)]
pub struct JobPlan {
    pub id: u64,
    pub source: PathBuf,
    pub destination: PathBuf,
    pub asset: AssetInfo,
    pub trim: ResolvedTrim,
    pub transform: ResolvedTransform,
    /// Encoded frame size, always even
    pub output_size: Size,
    pub encoding: EncodingConfig,
    pub settings: EngineSettings,
    pub estimated_frames: u64,
}

impl JobPlan {
    pub fn render_target(&self) -> RenderTarget {
        RenderTarget {
            transform: self.transform,
            output_size: self.output_size,
        }
    }
}

/// Kind of terminal result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeKind {
    Success,
    Failure,
    Cancelled,
}

/// Job lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    NotStarted,
    Draining,
    Finalizing,
    Terminal(OutcomeKind),
}

impl JobPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobPhase::Terminal(_))
    }
}

impl fmt::Display for JobPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobPhase::NotStarted => write!(f, "not started"),
            JobPhase::Draining => write!(f, "draining"),
            JobPhase::Finalizing => write!(f, "finalizing"),
            JobPhase::Terminal(OutcomeKind::Success) => write!(f, "succeeded"),
            JobPhase::Terminal(OutcomeKind::Failure) => write!(f, "failed"),
            JobPhase::Terminal(OutcomeKind::Cancelled) => write!(f, "cancelled"),
        }
    }
}

/// The single terminal result of a job
#[derive(Debug)]
pub enum JobOutcome {
    Success(PathBuf),
    Failure(TranscodeError),
    Cancelled,
}

impl JobOutcome {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            JobOutcome::Success(_) => OutcomeKind::Success,
            JobOutcome::Failure(_) => OutcomeKind::Failure,
            JobOutcome::Cancelled => OutcomeKind::Cancelled,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Success(_))
    }
}

impl fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobOutcome::Success(path) => write!(f, "success: {}", path.display()),
            JobOutcome::Failure(err) => write!(f, "failure: {}", err),
            JobOutcome::Cancelled => write!(f, "cancelled"),
        }
    }
}
