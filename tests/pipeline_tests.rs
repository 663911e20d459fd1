//! Frame pipeline tests against an in-memory backend
//!
//! The fake reader produces numbered frames at 30 fps, the fake writer
//! records what it was given, and a shared journal lets each test see what
//! the pipeline did to them.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use vidpress::domain::model::{Size, Timebase, Timestamp, TrimRange};
use vidpress::domain::transform::{AffineTransform, Orientation, TransformPolicy};
use vidpress::engine::{
    EngineSettings, JobOutcome, JobPhase, JobPlan, ManualQueue, OutcomeKind, Progress,
    TranscodeRequest, Transcoder,
};
use vidpress::error::{TranscodeError, TranscodeResult};
use vidpress::ports::{
    MediaBackend, ReaderStatus, RenderContext, RenderTarget, Sample, SampleReader, SampleWriter,
    WriterStatus,
};
use vidpress::probe::{AssetInfo, AudioTrackInfo, VideoTrackInfo};

const TB: Timebase = Timebase { num: 1, den: 30 };
const AUDIO_TB: Timebase = Timebase { num: 1, den: 44_100 };
/// Samples per AAC frame
const AUDIO_FRAME: i64 = 1024;

/// How the fake media behaves
#[derive(Debug, Clone)]
struct Script {
    video_frames: u64,
    audio_frames: u64,
    /// Reader reports `Failed` once this many video frames were delivered
    reader_fails_after: Option<u64>,
    /// Writer fails on this many appended frames
    writer_fails_after: Option<u64>,
    session_fails: bool,
    /// Renderer panics on this video frame index
    render_panics_at: Option<u64>,
    frame_delay: Option<Duration>,
    intrinsic: AffineTransform,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            video_frames: 300,
            audio_frames: 430,
            reader_fails_after: None,
            writer_fails_after: None,
            session_fails: false,
            render_panics_at: None,
            frame_delay: None,
            intrinsic: AffineTransform::IDENTITY,
        }
    }
}

/// What happened to the fake components
#[derive(Debug, Default)]
struct Journal {
    readers_opened: AtomicUsize,
    writers_opened: AtomicUsize,
    allocations: AtomicUsize,
    finished_writes: AtomicUsize,
    cancelled_writes: AtomicUsize,
    video_pts: Mutex<Vec<i64>>,
    audio_samples: AtomicUsize,
    /// Largest number of decoded audio frames the reader held at once
    max_audio_backlog: AtomicUsize,
}

struct FakeFrame {
    index: u64,
    panics: bool,
    journal: Arc<Journal>,
}

struct FakeBackend {
    script: Script,
    journal: Arc<Journal>,
}

impl MediaBackend for FakeBackend {
    type VideoFrame = FakeFrame;
    type AudioFrame = u64;
    type Rendered = u64;
    type Reader = FakeReader;
    type Writer = FakeWriter;
    type Renderer = FakeRenderer;

    fn inspect(&self, path: &Path) -> TranscodeResult<AssetInfo> {
        Ok(asset(path, self.script.intrinsic))
    }

    fn open_reader(&self, plan: &JobPlan) -> TranscodeResult<FakeReader> {
        self.journal.readers_opened.fetch_add(1, Ordering::SeqCst);
        Ok(FakeReader {
            script: self.script.clone(),
            journal: Arc::clone(&self.journal),
            start_pts: TB.seconds_to_pts(plan.trim.start),
            audio_start_pts: AUDIO_TB.seconds_to_pts(plan.trim.start),
            sent_video: 0,
            sent_audio: 0,
            demuxed_audio: 0,
            status: ReaderStatus::Unknown,
        })
    }

    fn open_writer(&self, plan: &JobPlan) -> TranscodeResult<FakeWriter> {
        self.journal.writers_opened.fetch_add(1, Ordering::SeqCst);
        Ok(FakeWriter {
            script: self.script.clone(),
            journal: Arc::clone(&self.journal),
            destination: plan.destination.clone(),
            appended: 0,
            session: false,
            video_done: false,
            audio_done: false,
            status: WriterStatus::Unknown,
        })
    }
}

/// Audio and video are interleaved by time, so looking for a video frame
/// decodes every audio frame that precedes it
struct FakeReader {
    script: Script,
    journal: Arc<Journal>,
    start_pts: i64,
    audio_start_pts: i64,
    sent_video: u64,
    sent_audio: u64,
    /// Audio frames decoded so far, delivered or not
    demuxed_audio: u64,
    status: ReaderStatus,
}

impl FakeReader {
    fn audio_seconds(index: u64) -> f64 {
        AUDIO_TB.pts_to_seconds(index as i64 * AUDIO_FRAME)
    }

    fn demux_audio_until(&mut self, seconds: f64) {
        while self.demuxed_audio < self.script.audio_frames
            && Self::audio_seconds(self.demuxed_audio) <= seconds
        {
            self.demuxed_audio += 1;
        }
        let backlog = (self.demuxed_audio - self.sent_audio) as usize;
        self.journal.max_audio_backlog.fetch_max(backlog, Ordering::SeqCst);
    }
}

impl SampleReader for FakeReader {
    type Video = FakeFrame;
    type Audio = u64;

    fn attach_outputs(&mut self) -> TranscodeResult<()> {
        Ok(())
    }

    fn start_reading(&mut self) -> TranscodeResult<()> {
        self.status = ReaderStatus::Reading;
        Ok(())
    }

    fn status(&self) -> ReaderStatus {
        let drained =
            self.sent_video >= self.script.video_frames && self.sent_audio >= self.script.audio_frames;
        if self.status == ReaderStatus::Reading && drained {
            ReaderStatus::Completed
        } else {
            self.status.clone()
        }
    }

    fn next_video(&mut self) -> Option<Sample<FakeFrame>> {
        if self.status != ReaderStatus::Reading || self.sent_video >= self.script.video_frames {
            return None;
        }
        if let Some(delay) = self.script.frame_delay {
            std::thread::sleep(delay);
        }
        let index = self.sent_video;
        self.sent_video += 1;
        self.demux_audio_until(TB.pts_to_seconds(index as i64));
        if self.script.reader_fails_after == Some(self.sent_video) {
            self.status = ReaderStatus::Failed("corrupt packet".to_string());
        }
        Some(Sample::new(
            Timestamp::new(self.start_pts + index as i64, TB),
            FakeFrame {
                index,
                panics: self.script.render_panics_at == Some(index),
                journal: Arc::clone(&self.journal),
            },
        ))
    }

    fn next_audio(&mut self) -> Option<Sample<u64>> {
        if self.status != ReaderStatus::Reading || self.sent_audio >= self.script.audio_frames {
            return None;
        }
        let index = self.sent_audio;
        self.sent_audio += 1;
        self.demuxed_audio = self.demuxed_audio.max(self.sent_audio);
        Some(Sample::new(
            Timestamp::new(self.audio_start_pts + index as i64 * AUDIO_FRAME, AUDIO_TB),
            self.sent_audio,
        ))
    }

    fn cancel_reading(&mut self) {
        if self.status == ReaderStatus::Reading {
            self.status = ReaderStatus::Cancelled;
        }
    }
}

struct FakeWriter {
    script: Script,
    journal: Arc<Journal>,
    destination: PathBuf,
    appended: u64,
    session: bool,
    video_done: bool,
    audio_done: bool,
    status: WriterStatus,
}

impl SampleWriter for FakeWriter {
    type Frame = u64;
    type Audio = u64;

    fn attach_inputs(&mut self) -> TranscodeResult<()> {
        Ok(())
    }

    fn start_writing(&mut self) -> TranscodeResult<()> {
        self.status = WriterStatus::Writing;
        Ok(())
    }

    fn start_session(&mut self, _at: Timestamp) -> TranscodeResult<()> {
        if self.script.session_fails {
            return Err(TranscodeError::IoSetupFailure {
                message: "no encoder".to_string(),
            });
        }
        self.session = true;
        Ok(())
    }

    fn status(&self) -> WriterStatus {
        self.status.clone()
    }

    fn video_ready(&self) -> bool {
        self.session && !self.video_done && self.status == WriterStatus::Writing
    }

    fn audio_ready(&self) -> bool {
        self.session && !self.audio_done && self.status == WriterStatus::Writing
    }

    fn append_video(&mut self, _frame: &mut u64, pts: Timestamp) -> TranscodeResult<()> {
        self.appended += 1;
        if self.script.writer_fails_after == Some(self.appended) {
            self.status = WriterStatus::Failed("disk full".to_string());
            return Err(TranscodeError::WriterFailure {
                message: "disk full".to_string(),
            });
        }
        self.journal.video_pts.lock().push(pts.value);
        Ok(())
    }

    fn append_audio(&mut self, _sample: Sample<u64>) -> TranscodeResult<()> {
        self.journal.audio_samples.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn finish_video(&mut self) -> TranscodeResult<()> {
        self.video_done = true;
        Ok(())
    }

    fn finish_audio(&mut self) -> TranscodeResult<()> {
        self.audio_done = true;
        Ok(())
    }

    fn finish_writing(&mut self) -> TranscodeResult<PathBuf> {
        self.journal.finished_writes.fetch_add(1, Ordering::SeqCst);
        self.status = WriterStatus::Completed;
        Ok(self.destination.clone())
    }

    fn cancel_writing(&mut self) {
        self.journal.cancelled_writes.fetch_add(1, Ordering::SeqCst);
        if self.status == WriterStatus::Writing {
            self.status = WriterStatus::Cancelled;
        }
    }
}

struct FakeRenderer {
    output: u64,
}

impl RenderContext for FakeRenderer {
    type Frame = FakeFrame;
    type Output = u64;

    fn allocate(first: &FakeFrame, _target: &RenderTarget) -> TranscodeResult<Self> {
        first.journal.allocations.fetch_add(1, Ordering::SeqCst);
        Ok(Self { output: 0 })
    }

    fn render(&mut self, frame: &FakeFrame) -> TranscodeResult<&mut u64> {
        if frame.panics {
            panic!("render buffer too small for frame {}", frame.index);
        }
        self.output = frame.index;
        Ok(&mut self.output)
    }
}

fn asset(path: &Path, intrinsic: AffineTransform) -> AssetInfo {
    AssetInfo {
        path: path.to_path_buf(),
        container: "mov,mp4,m4a,3gp,3g2,mj2".to_string(),
        file_size: 4_000_000,
        duration: 10.0,
        bit_rate: Some(3_000_000),
        video: VideoTrackInfo {
            index: 0,
            codec: "h264".to_string(),
            coded_size: Size::new(1920, 1080),
            natural_size: intrinsic.without_translation().transformed_size(Size::new(1920, 1080)),
            frame_rate: 30.0,
            bit_rate: Some(2_800_000),
            time_base: TB,
            intrinsic_transform: intrinsic,
        },
        audio: AudioTrackInfo {
            index: 1,
            codec: "aac".to_string(),
            sample_rate: 44_100,
            channels: 2,
            bit_rate: Some(128_000),
            time_base: Timebase { num: 1, den: 44_100 },
        },
    }
}

/// A transcoder over the fake backend plus everything its callbacks delivered
struct Harness {
    queue: Arc<ManualQueue>,
    transcoder: Transcoder<FakeBackend>,
    journal: Arc<Journal>,
    progress: Arc<Mutex<Vec<Progress>>>,
    outcomes: Arc<Mutex<Vec<JobOutcome>>>,
}

impl Harness {
    fn new(script: Script) -> Self {
        let queue = Arc::new(ManualQueue::new());
        let journal = Arc::new(Journal::default());
        let backend = FakeBackend {
            script,
            journal: Arc::clone(&journal),
        };
        Self {
            transcoder: Transcoder::with_backend(backend, EngineSettings::default(), queue.clone()),
            queue,
            journal,
            progress: Arc::new(Mutex::new(Vec::new())),
            outcomes: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn start(&self, request: TranscodeRequest) -> TranscodeResult<vidpress::JobHandle> {
        let progress = Arc::clone(&self.progress);
        let outcomes = Arc::clone(&self.outcomes);
        self.transcoder.start(
            request,
            move |p: Progress| progress.lock().push(p),
            move |outcome: JobOutcome| outcomes.lock().push(outcome),
        )
    }

    /// Run a job to its end and deliver every callback
    fn run(&self, request: TranscodeRequest) -> OutcomeKind {
        let handle = self.start(request).expect("job should start");
        handle.join();
        self.queue.run_pending();
        let outcomes = self.outcomes.lock();
        assert_eq!(outcomes.len(), 1, "exactly one outcome");
        outcomes[0].kind()
    }
}

fn request() -> TranscodeRequest {
    TranscodeRequest::new("in.mov", "out.mp4")
}

#[test]
fn test_successful_job_reports_once_and_finalizes() {
    let harness = Harness::new(Script::default());
    assert_eq!(harness.run(request()), OutcomeKind::Success);

    match &harness.outcomes.lock()[0] {
        JobOutcome::Success(path) => assert_eq!(path, &PathBuf::from("out.mp4")),
        other => panic!("unexpected outcome {}", other),
    }
    assert_eq!(harness.journal.finished_writes.load(Ordering::SeqCst), 1);
    assert_eq!(harness.journal.cancelled_writes.load(Ordering::SeqCst), 0);
    assert_eq!(harness.journal.video_pts.lock().len(), 300);
    assert_eq!(harness.journal.audio_samples.load(Ordering::SeqCst), 430);
}

#[test]
fn test_render_context_is_allocated_once() {
    let harness = Harness::new(Script::default());
    harness.run(request());
    assert_eq!(harness.journal.allocations.load(Ordering::SeqCst), 1);
}

#[test]
fn test_audio_backlog_stays_bounded() {
    let harness = Harness::new(Script::default());
    assert_eq!(harness.run(request()), OutcomeKind::Success);

    // About 1.4 AAC frames arrive per video frame at 44.1 kHz and 30 fps
    let backlog = harness.journal.max_audio_backlog.load(Ordering::SeqCst);
    assert!(backlog <= 4, "audio backlog reached {}", backlog);
    assert_eq!(harness.journal.audio_samples.load(Ordering::SeqCst), 430);
}

#[test]
fn test_panicking_render_still_reports_failure() {
    let harness = Harness::new(Script {
        render_panics_at: Some(5),
        ..Script::default()
    });
    assert_eq!(harness.run(request()), OutcomeKind::Failure);

    assert!(matches!(
        &harness.outcomes.lock()[0],
        JobOutcome::Failure(TranscodeError::WriterFailure { .. })
    ));
    assert_eq!(harness.journal.finished_writes.load(Ordering::SeqCst), 0);
    assert_eq!(harness.journal.video_pts.lock().len(), 5);
}

#[test]
fn test_oversized_canvas_is_rejected_before_any_io() {
    let harness = Harness::new(Script::default());
    let result = harness.start(
        request().with_policy(TransformPolicy::Custom(AffineTransform::scale(1000.0, 1000.0))),
    );

    assert!(matches!(result, Err(TranscodeError::IoSetupFailure { .. })));
    assert_eq!(harness.journal.readers_opened.load(Ordering::SeqCst), 0);
    harness.queue.run_pending();
    assert!(harness.outcomes.lock().is_empty());
}

#[test]
fn test_progress_is_monotonic_and_bounded() {
    // More frames than the 300 estimated for 10 s at 30 fps
    let harness = Harness::new(Script {
        video_frames: 305,
        ..Script::default()
    });
    harness.run(request());

    let progress = harness.progress.lock();
    assert_eq!(progress.len(), 305);
    assert!(progress.windows(2).all(|w| w[0].completed <= w[1].completed));
    assert!(progress.iter().all(|p| p.total == 300 && p.completed <= p.total));
    assert_eq!(progress.last().map(|p| p.completed), Some(300));
}

#[test]
fn test_timestamps_are_preserved_from_the_trim_start() {
    let harness = Harness::new(Script {
        video_frames: 60,
        ..Script::default()
    });
    let kind = harness.run(request().with_trim(TrimRange::new(2.0, 2.0)));
    assert_eq!(kind, OutcomeKind::Success);

    let pts = harness.journal.video_pts.lock();
    assert_eq!(pts.first(), Some(&60));
    assert!(pts.windows(2).all(|w| w[1] == w[0] + 1));
}

#[test]
fn test_zero_duration_trim_fails_before_any_io() {
    let harness = Harness::new(Script::default());
    let result = harness.start(request().with_trim(TrimRange::new(5.0, 0.0)));

    assert!(matches!(result, Err(TranscodeError::ZeroDurationRange { .. })));
    assert_eq!(harness.journal.readers_opened.load(Ordering::SeqCst), 0);
    assert_eq!(harness.journal.writers_opened.load(Ordering::SeqCst), 0);
    harness.queue.run_pending();
    assert!(harness.outcomes.lock().is_empty());
    assert!(harness.progress.lock().is_empty());
}

#[test]
fn test_session_failure_is_returned_from_start() {
    let harness = Harness::new(Script {
        session_fails: true,
        ..Script::default()
    });
    let result = harness.start(request());

    assert!(matches!(result, Err(TranscodeError::IoSetupFailure { .. })));
    assert_eq!(harness.journal.cancelled_writes.load(Ordering::SeqCst), 1);
    harness.queue.run_pending();
    assert!(harness.outcomes.lock().is_empty());
}

#[test]
fn test_reader_failure_aborts_without_output() {
    let harness = Harness::new(Script {
        reader_fails_after: Some(20),
        ..Script::default()
    });
    assert_eq!(harness.run(request()), OutcomeKind::Failure);

    match &harness.outcomes.lock()[0] {
        JobOutcome::Failure(TranscodeError::ReaderFailure { message }) => {
            assert_eq!(message, "corrupt packet")
        }
        other => panic!("unexpected outcome {}", other),
    }
    assert_eq!(harness.journal.finished_writes.load(Ordering::SeqCst), 0);
    assert_eq!(harness.journal.cancelled_writes.load(Ordering::SeqCst), 1);
    assert_eq!(harness.journal.video_pts.lock().len(), 20);
}

#[test]
fn test_writer_failure_takes_priority_over_reader_failure() {
    // Frame 10 fails the reader and the writer in the same iteration
    let harness = Harness::new(Script {
        reader_fails_after: Some(10),
        writer_fails_after: Some(10),
        ..Script::default()
    });
    assert_eq!(harness.run(request()), OutcomeKind::Failure);

    match &harness.outcomes.lock()[0] {
        JobOutcome::Failure(TranscodeError::WriterFailure { message }) => {
            assert_eq!(message, "disk full")
        }
        other => panic!("unexpected outcome {}", other),
    }
    assert_eq!(harness.journal.finished_writes.load(Ordering::SeqCst), 0);
}

#[test]
fn test_cancel_mid_job_reports_cancelled() {
    let harness = Harness::new(Script {
        frame_delay: Some(Duration::from_millis(2)),
        ..Script::default()
    });
    let handle = harness.start(request()).expect("job should start");

    let deadline = Instant::now() + Duration::from_secs(10);
    while handle.frames_completed() < 10 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(1));
    }
    handle.cancel();
    handle.cancel();
    assert!(handle.is_cancelled());

    let canceller = handle.canceller();
    handle.join();
    canceller.cancel();
    harness.queue.run_pending();

    let outcomes = harness.outcomes.lock();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].kind(), OutcomeKind::Cancelled);
    assert_eq!(harness.journal.finished_writes.load(Ordering::SeqCst), 0);
    assert_eq!(harness.journal.cancelled_writes.load(Ordering::SeqCst), 1);
    assert!(harness.journal.video_pts.lock().len() < 300);
}

#[test]
fn test_cancel_after_completion_is_a_no_op() {
    let harness = Harness::new(Script::default());
    let handle = harness.start(request()).expect("job should start");
    let canceller = handle.canceller();
    assert_eq!(handle.estimated_frames(), 300);
    handle.join();

    canceller.cancel();
    harness.queue.run_pending();

    let outcomes = harness.outcomes.lock();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].kind(), OutcomeKind::Success);
}

#[test]
fn test_phase_is_terminal_after_join() {
    let harness = Harness::new(Script::default());
    let handle = harness.start(request()).expect("job should start");
    let id = handle.id();
    let plan_frames = handle.plan().estimated_frames;

    // Poll the phase from the caller's side until the worker finishes
    let deadline = Instant::now() + Duration::from_secs(10);
    while !handle.phase().is_terminal() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(handle.phase(), JobPhase::Terminal(OutcomeKind::Success));
    handle.cancel();
    assert!(!handle.is_cancelled());
    assert!(id > 0);
    assert_eq!(plan_frames, 300);
    handle.join();
}

#[test]
fn test_plans_resolve_canvas_from_policy() {
    let harness = Harness::new(Script::default());

    let plan = harness
        .transcoder
        .plan(&request().with_policy(TransformPolicy::CameraOrientationFix))
        .unwrap();
    assert_eq!(plan.transform.source_orientation, Orientation::Up);
    assert!(!plan.transform.is_identity());
    assert_eq!(plan.output_size, Size::new(1920, 1080));

    let quarter_turn = Orientation::Left.matrix();
    let plan = harness
        .transcoder
        .plan(&request().with_policy(TransformPolicy::Custom(quarter_turn)))
        .unwrap();
    assert_eq!(plan.transform.canvas, Size::new(1080, 1920));
    assert_eq!(plan.output_size, Size::new(1080, 1920));

    let plan = harness
        .transcoder
        .plan(&request().with_target_size(Size::new(641, 361)))
        .unwrap();
    assert_eq!(plan.output_size, Size::new(640, 360));
    assert!(plan.transform.is_identity());
}

#[test]
fn test_rotated_source_is_left_alone_by_camera_fix() {
    let harness = Harness::new(Script {
        intrinsic: Orientation::Right.transform_for(Size::new(1920, 1080)),
        ..Script::default()
    });

    let plan = harness
        .transcoder
        .plan(&request().with_policy(TransformPolicy::CameraOrientationFix))
        .unwrap();
    assert_eq!(plan.transform.source_orientation, Orientation::Right);
    assert!(plan.transform.is_identity());
    assert_eq!(plan.transform.canvas, Size::new(1920, 1080));
}

#[tokio::test]
async fn test_async_transcode_resolves_to_the_outcome() {
    let backend = FakeBackend {
        script: Script {
            video_frames: 30,
            audio_frames: 43,
            ..Script::default()
        },
        journal: Arc::new(Journal::default()),
    };
    let queue = Arc::new(vidpress::engine::TokioQueue::current());
    let transcoder = Transcoder::with_backend(backend, EngineSettings::default(), queue);

    let outcome = transcoder
        .transcode(request().with_trim(TrimRange::new(0.0, 1.0)), |_| {})
        .await
        .unwrap();
    assert!(outcome.is_success());
}
