//! Job planning and the per-job worker thread

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;

use tokio::sync::oneshot;
use tracing::{debug, info, info_span, warn};

use crate::adapters::LibavBackend;
use crate::domain::model::ResolvedTrim;
use crate::domain::transform;
use crate::engine::dispatch::CallbackQueue;
use crate::engine::pipeline::FramePipeline;
use crate::engine::progress::{Progress, ProgressController};
use crate::engine::reporter::{CompletionCallback, CompletionReporter};
use crate::engine::{EngineSettings, JobOutcome, JobPhase, JobPlan, TranscodeRequest};
use crate::error::{TranscodeError, TranscodeResult};
use crate::ports::MediaBackend;
use crate::probe::{AssetInfo, AssetValidator};

static NEXT_JOB_ID: AtomicU64 = AtomicU64::new(1);

/// Largest canvas or output side H.264 encoders accept
pub const MAX_FRAME_SIDE: u32 = 16_384;

/// Entry point for running transcode jobs.
///
/// Each job gets its own worker thread, reader, writer and render context.
/// Callbacks run on the queue given at construction.
pub struct Transcoder<B: MediaBackend = LibavBackend> {
    backend: Arc<B>,
    settings: EngineSettings,
    queue: Arc<dyn CallbackQueue>,
}

impl<B: MediaBackend> Clone for Transcoder<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            settings: self.settings.clone(),
            queue: Arc::clone(&self.queue),
        }
    }
}

impl Transcoder<LibavBackend> {
    /// Transcoder over FFmpeg
    pub fn new(settings: EngineSettings, queue: Arc<dyn CallbackQueue>) -> TranscodeResult<Self> {
        Ok(Self::with_backend(LibavBackend::new()?, settings, queue))
    }
}

impl<B: MediaBackend> Transcoder<B> {
    pub fn with_backend(backend: B, settings: EngineSettings, queue: Arc<dyn CallbackQueue>) -> Self {
        Self {
            backend: Arc::new(backend),
            settings,
            queue,
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn inspect(&self, path: &Path) -> TranscodeResult<AssetInfo> {
        self.backend.inspect(path)
    }

    /// Inspect the source and resolve trim, transform and output size
    pub fn plan(&self, request: &TranscodeRequest) -> TranscodeResult<JobPlan> {
        request.encoding.validate()?;
        self.settings.validate()?;

        let asset = self.backend.inspect(&request.source)?;
        AssetValidator.validate(&asset)?;

        let trim = match &request.trim {
            Some(range) => range.resolve(asset.duration)?,
            None => ResolvedTrim::full(asset.duration)?,
        };

        let resolved = transform::resolve(
            &request.policy,
            &asset.video.intrinsic_transform,
            asset.video.coded_size,
        );
        let output_size = request.target_size.unwrap_or(resolved.canvas).even();
        for (what, size) in [("canvas", resolved.canvas), ("output", output_size)] {
            if size.is_empty() || size.width > MAX_FRAME_SIDE || size.height > MAX_FRAME_SIDE {
                return Err(TranscodeError::setup(format!(
                    "{} size {} is outside 1..={} per side",
                    what, size, MAX_FRAME_SIDE
                )));
            }
        }
        let estimated_frames = asset.estimated_frames(&trim);
        let id = NEXT_JOB_ID.fetch_add(1, Ordering::Relaxed);

        debug!(
            "Job {}: trim {:.3}s+{:.3}s, source {}, canvas {}, output {}, {} frames",
            id,
            trim.start,
            trim.duration,
            asset.orientation(),
            resolved.canvas,
            output_size,
            estimated_frames
        );

        Ok(JobPlan {
            id,
            source: request.source.clone(),
            destination: request.destination.clone(),
            asset,
            trim,
            transform: resolved,
            output_size,
            encoding: request.encoding.clone(),
            settings: self.settings.clone(),
            estimated_frames,
        })
    }

    /// Start a job.
    ///
    /// Returns once the worker has finished setup. Setup failures come back
    /// here as `Err` and no callback fires. Otherwise exactly one outcome is
    /// delivered to `on_complete`.
    pub fn start<P, C>(
        &self,
        request: TranscodeRequest,
        on_progress: P,
        on_complete: C,
    ) -> TranscodeResult<JobHandle>
    where
        P: Fn(Progress) + Send + Sync + 'static,
        C: FnOnce(JobOutcome) + Send + 'static,
    {
        let plan = self.plan(&request)?;
        let id = plan.id;
        let summary = plan.clone();

        let controller = Arc::new(ProgressController::new(
            plan.estimated_frames,
            Arc::clone(&self.queue),
            Some(Arc::new(on_progress)),
        ));
        let on_complete: CompletionCallback = Box::new(on_complete);

        let backend = Arc::clone(&self.backend);
        let worker_controller = Arc::clone(&controller);
        let span = info_span!("transcode", job = id);
        let (setup_tx, setup_rx) = mpsc::sync_channel::<TranscodeResult<()>>(1);

        let thread = std::thread::Builder::new()
            .name(format!("vidpress-job-{}", id))
            .spawn(move || {
                let _entered = span.enter();
                info!(
                    "Transcoding {} -> {}",
                    plan.source.display(),
                    plan.destination.display()
                );

                let pipeline = match FramePipeline::setup(&*backend, &plan, Arc::clone(&worker_controller)) {
                    Ok(pipeline) => pipeline,
                    Err(err) => {
                        warn!("Setup failed: {}", err);
                        let _ = setup_tx.send(Err(err));
                        return;
                    }
                };

                // Armed only once setup has succeeded; reports a failure if the run unwinds
                let reporter = CompletionReporter::new(worker_controller, on_complete);
                let _ = setup_tx.send(Ok(()));
                reporter.report(pipeline.run());
            })?;

        match setup_rx.recv() {
            Ok(Ok(())) => Ok(JobHandle {
                id,
                plan: summary,
                controller,
                thread: Some(thread),
            }),
            Ok(Err(err)) => {
                let _ = thread.join();
                Err(err)
            }
            Err(_) => {
                let _ = thread.join();
                Err(TranscodeError::setup("job worker exited during setup"))
            }
        }
    }

    /// Run a job to completion from async code
    pub async fn transcode<P>(&self, request: TranscodeRequest, on_progress: P) -> TranscodeResult<JobOutcome>
    where
        P: Fn(Progress) + Send + Sync + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let transcoder = self.clone();
        let _handle = tokio::task::spawn_blocking(move || {
            transcoder.start(request, on_progress, move |outcome| {
                let _ = tx.send(outcome);
            })
        })
        .await
        .map_err(|e| TranscodeError::setup(format!("job start task failed: {}", e)))??;

        rx.await
            .map_err(|_| TranscodeError::writer("job ended without reporting an outcome"))
    }
}

/// Caller's view of a running job
pub struct JobHandle {
    id: u64,
    plan: JobPlan,
    controller: Arc<ProgressController>,
    thread: Option<JoinHandle<()>>,
}

impl JobHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// What the job resolved to before it started
    pub fn plan(&self) -> &JobPlan {
        &self.plan
    }

    /// Request cooperative cancellation. Safe to call repeatedly or after completion.
    pub fn cancel(&self) {
        self.controller.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.controller.is_cancelled()
    }

    pub fn frames_completed(&self) -> u64 {
        self.controller.frames_completed()
    }

    pub fn estimated_frames(&self) -> u64 {
        self.controller.estimated_total()
    }

    pub fn phase(&self) -> JobPhase {
        self.controller.phase()
    }

    /// A cancel-only handle that can move to another thread or task
    pub fn canceller(&self) -> Canceller {
        Canceller(Arc::clone(&self.controller))
    }

    /// Block until the worker thread exits
    pub fn join(mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Job {} worker panicked", self.id);
            }
        }
    }
}

/// Cancels a job without owning its handle
#[derive(Clone)]
pub struct Canceller(Arc<ProgressController>);

impl Canceller {
    pub fn cancel(&self) {
        self.0.cancel();
    }
}
