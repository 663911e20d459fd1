//! Delivery of the single terminal result

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::engine::progress::ProgressController;
use crate::engine::{JobOutcome, JobPhase};
use crate::error::TranscodeError;

/// Caller-supplied completion callback
pub type CompletionCallback = Box<dyn FnOnce(JobOutcome) + Send + 'static>;

/// Delivers exactly one outcome per job through the caller's queue
pub struct CompletionReporter {
    controller: Arc<ProgressController>,
    callback: Mutex<Option<CompletionCallback>>,
}

impl CompletionReporter {
    pub fn new(controller: Arc<ProgressController>, callback: CompletionCallback) -> Self {
        Self {
            controller,
            callback: Mutex::new(Some(callback)),
        }
    }

    /// Mark the job terminal and dispatch `outcome`. Later reports are dropped.
    pub fn report(&self, outcome: JobOutcome) -> bool {
        let Some(callback) = self.callback.lock().take() else {
            warn!("Dropping duplicate job outcome: {}", outcome);
            return false;
        };

        self.controller.set_phase(JobPhase::Terminal(outcome.kind()));
        match &outcome {
            JobOutcome::Success(path) => info!("Transcode finished: {}", path.display()),
            JobOutcome::Failure(err) => error!("Transcode failed: {}", err),
            JobOutcome::Cancelled => info!("Transcode cancelled"),
        }

        self.controller.dispatch(Box::new(move || callback(outcome)));
        true
    }
}

impl Drop for CompletionReporter {
    fn drop(&mut self) {
        if self.callback.get_mut().is_some() {
            self.report(JobOutcome::Failure(TranscodeError::writer(
                "job worker stopped without an outcome",
            )));
        }
    }
}
