//! Stillframe CLI: deterministic snapshots of HTML animations
//!
//! ## Usage
//!
//! ```bash
//! stillframe demo.html                          # 0..4000ms every 200ms
//! stillframe 'intro-*.html' -i anims -o frames  # quoted glob
//! stillframe demo.html --target 2000 --interval 100 --manifest frames/manifest.json
//! stillframe 'demo-??.html' --list              # resolve only, no browser
//! ```

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;
use stillframe::{
    resolve_inputs, single_selector, CaptureConfig, CaptureTimeline, ChromiumLauncher, Manifest,
    Orchestrator,
};
use stillframe_cli::{logging, Cli, CliConfig, CliError, CliResult, ProgressReporter, Verbosity};
use tokio_util::sync::CancellationToken;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> CliResult<()> {
    let cli = Cli::parse();
    let config = build_config(&cli);
    logging::init(config.verbosity, config.color);

    // Everything that can be rejected is rejected before a browser starts
    let selector = single_selector(&cli.files)?;
    let capture = cli.capture_config()?;
    let sources = resolve_inputs(&config.input_dir, &selector)?;

    let reporter = ProgressReporter::new(config.color.should_color(), config.verbosity.is_quiet());

    if cli.list {
        let timeline = CaptureTimeline::new(capture.target_ms, capture.interval_ms);
        reporter.listing(&sources, &timeline);
        return Ok(());
    }

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run_capture(&config, capture, &sources, reporter))
}

fn build_config(cli: &Cli) -> CliConfig {
    CliConfig::new()
        .with_verbosity(Verbosity::from_flags(cli.quiet, cli.verbose))
        .with_color(cli.color.clone().into())
        .with_input_dir(cli.input_dir.clone())
        .with_output_dir(cli.output_dir.clone())
        .with_manifest(cli.manifest.clone())
}

async fn run_capture(
    config: &CliConfig,
    capture: CaptureConfig,
    sources: &[PathBuf],
    mut reporter: ProgressReporter,
) -> CliResult<()> {
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, cancelling remaining captures");
            on_signal.cancel();
        }
    });

    let timeline = CaptureTimeline::new(capture.target_ms, capture.interval_ms);
    reporter.header(&format!(
        "Capturing {} file(s), {} frame(s) each",
        sources.len(),
        timeline.len()
    ));

    let orchestrator = Orchestrator::new(ChromiumLauncher::new(), capture, &config.output_dir)
        .with_cancellation(cancel);

    let started = Instant::now();
    reporter.start_spinner("capturing");
    let result = orchestrator.run(sources).await;
    reporter.finish();
    let report = result?;

    reporter.report(&report, &config.output_dir, started.elapsed());

    if let Some(path) = &config.manifest {
        let manifest = Manifest::from_report(&report, orchestrator.config())?;
        manifest.write(path)?;
        reporter.info(&format!(
            "manifest with {} frame(s) written to {}",
            manifest.frame_count(),
            path.display()
        ));
    }

    if report.is_success() {
        Ok(())
    } else {
        Err(CliError::CaptureFailed {
            failed: report.failures().len(),
            total: report.outcomes.len(),
        })
    }
}
