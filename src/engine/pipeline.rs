//! Frame pipeline: drains the reader into the writer through the render context

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::domain::model::Timestamp;
use crate::engine::progress::ProgressController;
use crate::engine::{JobOutcome, JobPhase, JobPlan};
use crate::error::{TranscodeError, TranscodeResult};
use crate::ports::{
    MediaBackend, ReaderStatus, RenderContext, RenderTarget, SampleReader, SampleWriter,
    WriterStatus,
};

/// Owns the job's render context, allocated on first use and released on every exit path
pub struct RenderSlot<C> {
    context: Option<C>,
    allocations: u32,
}

impl<C> Default for RenderSlot<C> {
    fn default() -> Self {
        Self {
            context: None,
            allocations: 0,
        }
    }
}

impl<C: RenderContext> RenderSlot<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Render through the context, allocating it from `frame` on first use
    pub fn render(&mut self, frame: &C::Frame, target: &RenderTarget) -> TranscodeResult<&mut C::Output> {
        if self.context.is_none() {
            if self.allocations > 0 {
                return Err(TranscodeError::writer("render context used after release"));
            }
            self.context = Some(C::allocate(frame, target)?);
            self.allocations += 1;
            debug!("Render context allocated for {}", target.output_size);
        }
        let context = self
            .context
            .as_mut()
            .ok_or_else(|| TranscodeError::writer("render context unavailable"))?;
        context.render(frame)
    }

    /// Drop the context and its buffers
    pub fn release(&mut self) {
        if self.context.take().is_some() {
            debug!("Render context released");
        }
    }
}

/// One job's drain loop, from setup to a terminal outcome
pub struct FramePipeline<B: MediaBackend> {
    reader: B::Reader,
    writer: B::Writer,
    render: RenderSlot<B::Renderer>,
    target: RenderTarget,
    controller: Arc<ProgressController>,
    idle_wait: Duration,
    video_finished: bool,
    audio_finished: bool,
    /// Presentation time of the last video frame handed to the writer, in seconds
    video_clock: Option<f64>,
    /// First append, render or end-of-stream error, reported as a writer-side failure
    fault: Option<TranscodeError>,
}

impl<B: MediaBackend> FramePipeline<B> {
    /// Build and start the reader and writer, then open the session at the trim start.
    ///
    /// Nothing reaches the container until every step here has succeeded.
    pub fn setup(
        backend: &B,
        plan: &JobPlan,
        controller: Arc<ProgressController>,
    ) -> TranscodeResult<Self> {
        debug!("Constructing reader for {}", plan.source.display());
        let mut reader = backend.open_reader(plan).map_err(TranscodeError::into_setup)?;

        debug!("Constructing writer for {}", plan.destination.display());
        let mut writer = backend.open_writer(plan).map_err(TranscodeError::into_setup)?;

        if let Err(err) = Self::start(&mut reader, &mut writer, plan, &controller) {
            reader.cancel_reading();
            writer.cancel_writing();
            return Err(err.into_setup());
        }

        debug!("Session started at {:.3}s", plan.trim.start);
        Ok(Self {
            reader,
            writer,
            render: RenderSlot::new(),
            target: plan.render_target(),
            controller,
            idle_wait: plan.settings.idle_wait(),
            video_finished: false,
            audio_finished: false,
            video_clock: None,
            fault: None,
        })
    }

    fn start(
        reader: &mut B::Reader,
        writer: &mut B::Writer,
        plan: &JobPlan,
        controller: &ProgressController,
    ) -> TranscodeResult<()> {
        reader.attach_outputs()?;
        writer.attach_inputs()?;
        writer.set_ready_notifier(controller.ready_notifier());

        reader.start_reading()?;
        writer.start_writing()?;
        writer.start_session(Timestamp::from_seconds(
            plan.trim.start,
            plan.asset.video.time_base,
        ))
    }

    /// Drain both streams, then finalize. Always returns exactly one outcome.
    pub fn run(mut self) -> JobOutcome {
        self.controller.set_phase(JobPhase::Draining);
        info!(
            "Draining, {} frames expected",
            self.controller.estimated_total()
        );

        while !(self.video_finished && self.audio_finished) {
            if let Some(outcome) = self.abort_reason() {
                return self.abort(outcome);
            }

            let seen = self.controller.wake_generation();
            let video_progressed = self.step_video();
            let audio_progressed = self.step_audio();

            if !video_progressed && !audio_progressed {
                self.controller.wait_for_wakeup(seen, self.idle_wait);
            }
        }

        // A failure in the last iteration must not finalize as success
        if let Some(outcome) = self.abort_reason() {
            return self.abort(outcome);
        }

        self.finalize()
    }

    /// Abort conditions in priority order: writer, reader, cancellation
    fn abort_reason(&mut self) -> Option<JobOutcome> {
        if let WriterStatus::Failed(message) = self.writer.status() {
            return Some(JobOutcome::Failure(TranscodeError::writer(message)));
        }
        if let Some(err) = self.fault.take() {
            return Some(JobOutcome::Failure(err));
        }
        if let ReaderStatus::Failed(message) = self.reader.status() {
            return Some(JobOutcome::Failure(TranscodeError::reader(message)));
        }
        if self.controller.is_cancelled() {
            return Some(JobOutcome::Cancelled);
        }
        None
    }

    fn step_video(&mut self) -> bool {
        if self.video_finished || !self.writer.video_ready() {
            return false;
        }

        match self.reader.next_video() {
            Some(sample) => {
                self.controller.frame_completed();
                self.video_clock = Some(sample.pts.seconds());
                let appended = match self.render.render(&sample.payload, &self.target) {
                    Ok(rendered) => self.writer.append_video(rendered, sample.pts),
                    Err(err) => Err(err),
                };
                if let Err(err) = appended {
                    record(&mut self.fault, err);
                }
            }
            None => {
                debug!("Video stream finished");
                self.video_finished = true;
                if let Err(err) = self.writer.finish_video() {
                    record(&mut self.fault, err);
                }
            }
        }
        true
    }

    /// Append audio until it has caught up with the video clock.
    ///
    /// Audio the reader decoded while searching for video is drained here.
    fn step_audio(&mut self) -> bool {
        let mut progressed = false;
        while !self.audio_finished && self.writer.audio_ready() && self.fault.is_none() {
            progressed = true;
            match self.reader.next_audio() {
                Some(sample) => {
                    let at = sample.pts.seconds();
                    if let Err(err) = self.writer.append_audio(sample) {
                        record(&mut self.fault, err);
                    }
                    if !self.audio_behind_video(at) {
                        break;
                    }
                }
                None => {
                    debug!("Audio stream finished");
                    self.audio_finished = true;
                    if let Err(err) = self.writer.finish_audio() {
                        record(&mut self.fault, err);
                    }
                }
            }
        }
        progressed
    }

    /// Whether audio starting at `at` still trails the last appended video frame
    fn audio_behind_video(&self, at: f64) -> bool {
        !self.video_finished && self.video_clock.is_some_and(|clock| at < clock)
    }

    fn abort(mut self, outcome: JobOutcome) -> JobOutcome {
        match &outcome {
            JobOutcome::Cancelled => info!(
                "Cancelling after {} frames",
                self.controller.frames_completed()
            ),
            other => warn!("Aborting: {}", other),
        }
        self.reader.cancel_reading();
        self.writer.cancel_writing();
        self.render.release();
        outcome
    }

    fn finalize(mut self) -> JobOutcome {
        self.controller.set_phase(JobPhase::Finalizing);
        debug!(
            "Finalizing after {} frames",
            self.controller.frames_completed()
        );

        match self.writer.finish_writing() {
            Ok(path) => {
                self.render.release();
                JobOutcome::Success(path)
            }
            Err(err) => {
                self.reader.cancel_reading();
                self.writer.cancel_writing();
                self.render.release();
                JobOutcome::Failure(err)
            }
        }
    }
}

/// Keep the first fault, later ones are consequences of it
fn record(slot: &mut Option<TranscodeError>, err: TranscodeError) {
    match slot {
        Some(_) => debug!("Suppressing follow-on error: {}", err),
        None => *slot = Some(err),
    }
}
