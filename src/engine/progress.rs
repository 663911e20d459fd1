//! Frame progress, cooperative cancellation and the pipeline's wakeup signal

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::engine::dispatch::CallbackQueue;
use crate::engine::JobPhase;
use crate::ports::ReadyNotifier;

/// Progress snapshot handed to the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    /// Frames processed so far, clamped to `total`
    pub completed: u64,
    /// Estimated frame count for the trimmed range
    pub total: u64,
}

impl Progress {
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.completed as f64 / self.total as f64
        }
    }

    pub fn percent(&self) -> f64 {
        self.fraction() * 100.0
    }
}

/// Caller-supplied progress callback
pub type ProgressCallback = Arc<dyn Fn(Progress) + Send + Sync>;

/// Generation counter the pipeline parks on while no stream can make progress
#[derive(Default)]
struct Wakeup {
    generation: Mutex<u64>,
    cond: Condvar,
}

impl Wakeup {
    fn notify(&self) {
        *self.generation.lock() += 1;
        self.cond.notify_all();
    }

    fn generation(&self) -> u64 {
        *self.generation.lock()
    }

    fn wait_since(&self, seen: u64, timeout: Duration) {
        let mut generation = self.generation.lock();
        if *generation == seen {
            let _ = self.cond.wait_for(&mut generation, timeout);
        }
    }
}

/// Shared between the job's worker thread and every handle the caller holds
pub struct ProgressController {
    frames: AtomicU64,
    estimated_total: u64,
    cancelled: AtomicBool,
    phase: Mutex<JobPhase>,
    wakeup: Arc<Wakeup>,
    queue: Arc<dyn CallbackQueue>,
    on_progress: Option<ProgressCallback>,
}

impl ProgressController {
    pub fn new(
        estimated_total: u64,
        queue: Arc<dyn CallbackQueue>,
        on_progress: Option<ProgressCallback>,
    ) -> Self {
        Self {
            frames: AtomicU64::new(0),
            estimated_total: estimated_total.max(1),
            cancelled: AtomicBool::new(false),
            phase: Mutex::new(JobPhase::NotStarted),
            wakeup: Arc::new(Wakeup::default()),
            queue,
            on_progress,
        }
    }

    /// Request cancellation. Idempotent, and a no-op once the job is terminal.
    pub fn cancel(&self) {
        // Held across the set so a terminal transition cannot slip in between
        let phase = self.phase.lock();
        if phase.is_terminal() {
            return;
        }
        if !self.cancelled.swap(true, Ordering::AcqRel) {
            debug!("Cancellation requested");
        }
        drop(phase);
        self.wakeup.notify();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn frames_completed(&self) -> u64 {
        self.frames.load(Ordering::Acquire)
    }

    pub fn estimated_total(&self) -> u64 {
        self.estimated_total
    }

    pub fn phase(&self) -> JobPhase {
        *self.phase.lock()
    }

    /// Move to `next`. Refused once terminal.
    pub fn set_phase(&self, next: JobPhase) -> bool {
        let mut phase = self.phase.lock();
        if phase.is_terminal() {
            return false;
        }
        trace!("Phase {} -> {}", *phase, next);
        *phase = next;
        true
    }

    /// Count one processed video frame and dispatch progress to the caller
    pub fn frame_completed(&self) -> u64 {
        let completed = self.frames.fetch_add(1, Ordering::AcqRel) + 1;
        if self.phase().is_terminal() {
            return completed;
        }
        if let Some(callback) = &self.on_progress {
            let callback = Arc::clone(callback);
            let progress = Progress {
                completed: completed.min(self.estimated_total),
                total: self.estimated_total,
            };
            self.queue.dispatch(Box::new(move || callback(progress)));
        }
        completed
    }

    /// Hand a callback task to the caller's queue
    pub(crate) fn dispatch(&self, task: crate::engine::dispatch::Task) {
        self.queue.dispatch(task);
    }

    /// Notifier writers use to wake the pipeline when an input becomes ready
    pub fn ready_notifier(&self) -> ReadyNotifier {
        let wakeup = Arc::clone(&self.wakeup);
        ReadyNotifier::new(move || wakeup.notify())
    }

    /// Current wakeup generation, taken before polling the streams
    pub(crate) fn wake_generation(&self) -> u64 {
        self.wakeup.generation()
    }

    /// Park until a wakeup newer than `seen` arrives or `timeout` elapses
    pub(crate) fn wait_for_wakeup(&self, seen: u64, timeout: Duration) {
        self.wakeup.wait_since(seen, timeout);
    }
}
