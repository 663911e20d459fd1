//! Command implementations

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tokio::sync::oneshot;
use tracing::{info, warn};

use crate::cli::args::{InspectArgs, TranscodeArgs};
use crate::cli::progress::ProgressPrinter;
use crate::config::VidpressConfig;
use crate::engine::{JobOutcome, TokioQueue, TranscodeRequest, Transcoder};
use crate::output::verifier::Expectation;
use crate::output::{default_output_path, OutputVerifier, VerificationReport};
use crate::probe::{AssetInfo, AssetInspector};
use crate::utils::format_file_size;

/// Execute the transcode command
pub async fn transcode(args: TranscodeArgs, config: VidpressConfig) -> Result<()> {
    info!("Starting transcode operation");
    info!("Input: {}", args.input.display());

    if !args.input.exists() {
        return Err(anyhow!("Input file does not exist: {}", args.input.display()));
    }

    let destination = args
        .output
        .clone()
        .unwrap_or_else(|| default_output_path(&args.input, &config.engine.container));
    info!("Output: {}", destination.display());

    let mut request = TranscodeRequest::new(&args.input, &destination)
        .with_policy(args.policy().context("Invalid transform policy")?)
        .with_encoding(args.apply_encoding(&config.encoding));
    if let Some(size) = args.target_size() {
        request = request.with_target_size(size);
    }
    if let Some(trim) = args.trim().context("Invalid trim range")? {
        request = request.with_trim(trim);
    }

    let transcoder = Transcoder::new(config.engine.clone(), Arc::new(TokioQueue::current()))
        .context("Failed to initialize transcoder")?;
    let printer = Arc::new(ProgressPrinter::new(args.json));
    let progress_printer = Arc::clone(&printer);
    let (outcome_tx, mut outcome_rx) = oneshot::channel();

    // Setup blocks on the worker thread, keep it off the runtime
    let handle = tokio::task::spawn_blocking(move || {
        transcoder.start(
            request,
            move |progress| progress_printer.progress(progress),
            move |outcome| {
                let _ = outcome_tx.send(outcome);
            },
        )
    })
    .await
    .context("Transcode start task failed")?
    .context("Failed to start transcode")?;

    printer.started(handle.plan());
    let canceller = handle.canceller();

    let outcome = tokio::select! {
        outcome = &mut outcome_rx => outcome,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupt received, cancelling");
            canceller.cancel();
            outcome_rx.await
        }
    }
    .context("Job ended without reporting an outcome")?;

    let plan = handle.plan().clone();
    tokio::task::spawn_blocking(move || handle.join())
        .await
        .context("Failed to join job worker")?;

    printer.finished(&outcome);
    match outcome {
        JobOutcome::Success(path) => {
            if args.verify {
                let report = OutputVerifier::new()
                    .verify(&path, &Expectation::from_plan(&plan))
                    .context("Failed to verify output")?;
                display_verification(&report, args.json)?;
                if !report.success {
                    return Err(anyhow!("Verification failed for {}", path.display()));
                }
            }
            info!("Transcode operation completed successfully");
            Ok(())
        }
        JobOutcome::Failure(err) => Err(anyhow::Error::new(err).context("Transcode failed")),
        JobOutcome::Cancelled => Err(anyhow!("Transcode cancelled")),
    }
}

/// Execute the inspect command
pub fn inspect(args: InspectArgs) -> Result<()> {
    info!("Starting inspect operation");
    info!("Input: {}", args.input.display());

    crate::init().context("Failed to initialize FFmpeg")?;
    let info = AssetInspector::new()
        .inspect(&args.input)
        .context("Failed to inspect input file")?;

    if args.json {
        let json = serde_json::to_string_pretty(&info).context("Failed to serialize asset info to JSON")?;
        println!("{}", json);
    } else {
        display_asset_info(&info);
    }

    info!("Inspect operation completed successfully");
    Ok(())
}

/// Display asset information in human-readable format
fn display_asset_info(info: &AssetInfo) {
    println!("Asset Information");
    println!("=================");
    println!("File: {}", info.path.display());
    println!("Format: {}", info.container);
    println!("Duration: {:.3}s", info.duration);
    println!("File Size: {}", format_file_size(info.file_size));
    println!("Bit Rate: {} bps", info.bit_rate.unwrap_or(0));
    println!();

    let video = &info.video;
    println!("Video (stream {}):", video.index);
    println!("  Codec: {}", video.codec);
    println!("  Coded Size: {} @ {:.2} fps", video.coded_size, video.frame_rate);
    println!("  Natural Size: {}", video.natural_size);
    println!("  Orientation: {}", info.orientation());
    println!("  Transform: {}", video.intrinsic_transform);
    println!();

    let audio = &info.audio;
    println!("Audio (stream {}):", audio.index);
    println!("  Codec: {}", audio.codec);
    println!("  {} Hz, {} channels", audio.sample_rate, audio.channels);
    println!("  Bit Rate: {} bps", audio.bit_rate.unwrap_or(0));
}

fn display_verification(report: &VerificationReport, json: bool) -> Result<()> {
    if json {
        let json = serde_json::to_string(report).context("Failed to serialize verification report")?;
        println!("{}", json);
        return Ok(());
    }

    println!("Verification of {}", report.path.display());
    for check in &report.checks {
        let status = if check.success { "ok" } else { "FAILED" };
        println!("  [{}] {}: {}", status, check.check_type, check.details);
    }
    Ok(())
}
