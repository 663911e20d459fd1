//! Console and JSON progress output for the CLI

use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Instant;

use chrono::Utc;
use serde_json::json;

use crate::engine::{JobOutcome, JobPlan, Progress};
use crate::utils::{estimate_remaining, format_duration, format_file_size, progress_percent};

/// Where the CLI sends job events
#[derive(Debug)]
pub struct ProgressPrinter {
    json: bool,
    started: Instant,
    last_percent: AtomicU32,
}

impl ProgressPrinter {
    pub fn new(json: bool) -> Self {
        Self {
            json,
            started: Instant::now(),
            last_percent: AtomicU32::new(u32::MAX),
        }
    }

    pub fn started(&self, plan: &JobPlan) {
        if self.json {
            emit(json!({
                "event": "started",
                "job": plan.id,
                "source": plan.source,
                "destination": plan.destination,
                "orientation": plan.transform.source_orientation.to_string(),
                "output_size": plan.output_size,
                "trim_start": plan.trim.start,
                "trim_duration": plan.trim.duration,
                "estimated_frames": plan.estimated_frames,
            }));
        } else {
            eprintln!(
                "Transcoding {} -> {} ({} {}, {} frames)",
                plan.source.display(),
                plan.destination.display(),
                plan.transform.source_orientation,
                plan.output_size,
                plan.estimated_frames
            );
        }
    }

    /// Print at most one update per whole percent
    pub fn progress(&self, progress: Progress) {
        let percent = progress_percent(progress.completed, progress.total);
        let step = percent.floor() as u32;
        if self.last_percent.swap(step, Ordering::Relaxed) == step {
            return;
        }

        if self.json {
            emit(json!({
                "event": "progress",
                "completed": progress.completed,
                "total": progress.total,
                "percent": percent,
            }));
        } else {
            let eta = estimate_remaining(progress.completed, progress.total, self.started.elapsed())
                .map(|remaining| format!(", {} left", format_duration(remaining)))
                .unwrap_or_default();
            eprint!(
                "\r{:5.1}% ({}/{} frames{})   ",
                percent, progress.completed, progress.total, eta
            );
            let _ = std::io::stderr().flush();
        }
    }

    pub fn finished(&self, outcome: &JobOutcome) {
        let elapsed = self.started.elapsed();
        if self.json {
            let (status, detail) = match outcome {
                JobOutcome::Success(path) => ("success", path.display().to_string()),
                JobOutcome::Failure(err) => ("failure", err.to_string()),
                JobOutcome::Cancelled => ("cancelled", String::new()),
            };
            emit(json!({
                "event": "finished",
                "status": status,
                "detail": detail,
                "elapsed_seconds": elapsed.as_secs_f64(),
            }));
            return;
        }

        eprintln!();
        match outcome {
            JobOutcome::Success(path) => eprintln!(
                "Done in {}: {} ({})",
                format_duration(elapsed),
                path.display(),
                file_size(path)
            ),
            JobOutcome::Failure(err) => eprintln!("Failed after {}: {}", format_duration(elapsed), err),
            JobOutcome::Cancelled => eprintln!("Cancelled after {}", format_duration(elapsed)),
        }
    }
}

fn file_size(path: &Path) -> String {
    std::fs::metadata(path)
        .map(|meta| format_file_size(meta.len()))
        .unwrap_or_else(|_| "size unknown".to_string())
}

/// One JSON event per line on stdout
fn emit(mut event: serde_json::Value) {
    if let Some(fields) = event.as_object_mut() {
        fields.insert("timestamp".to_string(), json!(Utc::now().to_rfc3339()));
    }
    println!("{}", event);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_is_throttled_to_whole_percents() {
        let printer = ProgressPrinter::new(true);
        printer.progress(Progress { completed: 1, total: 300 });
        assert_eq!(printer.last_percent.load(Ordering::Relaxed), 0);
        printer.progress(Progress { completed: 2, total: 300 });
        assert_eq!(printer.last_percent.load(Ordering::Relaxed), 0);
        printer.progress(Progress { completed: 150, total: 300 });
        assert_eq!(printer.last_percent.load(Ordering::Relaxed), 50);
    }
}
