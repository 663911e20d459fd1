// Ports - contracts between the frame pipeline and a media backend
//
// Everything here is driven from the job's worker thread, so none of the
// reader, writer or render traits require `Send`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::domain::model::{Size, Timestamp};
use crate::domain::transform::ResolvedTransform;
use crate::engine::JobPlan;
use crate::error::TranscodeResult;
use crate::probe::AssetInfo;

/// Reader lifecycle as observed by the pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaderStatus {
    Unknown,
    Reading,
    Completed,
    Failed(String),
    Cancelled,
}

/// Writer lifecycle as observed by the pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriterStatus {
    Unknown,
    Writing,
    Completed,
    Failed(String),
    Cancelled,
}

/// A decoded sample and its presentation timestamp in the source timeline
#[derive(Debug, Clone)]
pub struct Sample<T> {
    pub pts: Timestamp,
    pub payload: T,
}

impl<T> Sample<T> {
    pub fn new(pts: Timestamp, payload: T) -> Self {
        Self { pts, payload }
    }
}

/// Demultiplexing reader bound to a trimmed range of the source
pub trait SampleReader {
    type Video;
    type Audio;

    /// Bind the decoded video and audio outputs to the reader
    fn attach_outputs(&mut self) -> TranscodeResult<()>;

    fn start_reading(&mut self) -> TranscodeResult<()>;

    fn status(&self) -> ReaderStatus;

    /// Next decoded video frame in presentation order.
    ///
    /// `None` means the stream is exhausted, or the reader failed, in which case
    /// `status()` reports `Failed`.
    fn next_video(&mut self) -> Option<Sample<Self::Video>>;

    /// Next decoded audio frame. Same contract as [`SampleReader::next_video`].
    fn next_audio(&mut self) -> Option<Sample<Self::Audio>>;

    fn cancel_reading(&mut self);
}

/// Callback a writer invokes when one of its inputs becomes ready again
#[derive(Clone)]
pub struct ReadyNotifier(Arc<dyn Fn() + Send + Sync>);

impl ReadyNotifier {
    pub fn new(notify: impl Fn() + Send + Sync + 'static) -> Self {
        Self(Arc::new(notify))
    }

    pub fn notify(&self) {
        (self.0)()
    }
}

impl std::fmt::Debug for ReadyNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ReadyNotifier")
    }
}

/// Multiplexing writer that encodes and interleaves both tracks
pub trait SampleWriter {
    type Frame;
    type Audio;

    /// Bind the encoder inputs to the writer
    fn attach_inputs(&mut self) -> TranscodeResult<()>;

    fn start_writing(&mut self) -> TranscodeResult<()>;

    /// Open the session. Nothing is written to the container before this call.
    fn start_session(&mut self, at: Timestamp) -> TranscodeResult<()>;

    fn status(&self) -> WriterStatus;

    fn video_ready(&self) -> bool;

    fn audio_ready(&self) -> bool;

    /// Register a wakeup for inputs that are not ready yet. Writers that are
    /// always ready can ignore it.
    fn set_ready_notifier(&mut self, _notifier: ReadyNotifier) {}

    /// Append a rendered frame at its original presentation timestamp
    fn append_video(&mut self, frame: &mut Self::Frame, pts: Timestamp) -> TranscodeResult<()>;

    fn append_audio(&mut self, sample: Sample<Self::Audio>) -> TranscodeResult<()>;

    /// Signal end-of-stream on the video input
    fn finish_video(&mut self) -> TranscodeResult<()>;

    /// Signal end-of-stream on the audio input
    fn finish_audio(&mut self) -> TranscodeResult<()>;

    /// Finalize the container and return the path it was stored at
    fn finish_writing(&mut self) -> TranscodeResult<PathBuf>;

    /// Abandon the output. No container is left at the destination.
    fn cancel_writing(&mut self);
}

/// What a render context produces per frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderTarget {
    pub transform: ResolvedTransform,
    pub output_size: Size,
}

/// Reusable per-job pixel buffers that apply the resolved transform
pub trait RenderContext: Sized {
    type Frame;
    type Output;

    /// Allocate every buffer the job needs, sized from the first decoded frame
    fn allocate(first: &Self::Frame, target: &RenderTarget) -> TranscodeResult<Self>;

    /// Render `frame` into the reused output buffer
    fn render(&mut self, frame: &Self::Frame) -> TranscodeResult<&mut Self::Output>;
}

/// Factory for the per-job media components
pub trait MediaBackend: Send + Sync + 'static {
    type VideoFrame;
    type AudioFrame;
    type Rendered;
    type Reader: SampleReader<Video = Self::VideoFrame, Audio = Self::AudioFrame>;
    type Writer: SampleWriter<Frame = Self::Rendered, Audio = Self::AudioFrame>;
    type Renderer: RenderContext<Frame = Self::VideoFrame, Output = Self::Rendered>;

    /// Inspect a source file
    fn inspect(&self, path: &Path) -> TranscodeResult<AssetInfo>;

    /// Construct a reader bound to the plan's trimmed range
    fn open_reader(&self, plan: &JobPlan) -> TranscodeResult<Self::Reader>;

    /// Construct a writer bound to the plan's destination and container
    fn open_writer(&self, plan: &JobPlan) -> TranscodeResult<Self::Writer>;
}
