//! Background removal job runner
//!
//! Processes one or more images in order through a single orchestrator and
//! renders the observable job state as a progress bar.

use super::config::CliConfigBuilder;
use crate::{
    config::SegmentOptions,
    orchestrator::SegmentOrchestrator,
    services::{create_telemetry_sink, TelemetryEvent, TelemetryKind},
    tracing_config::{events, init_cli_tracing, spans, TracingFormat},
    types::{JobState, Step},
};
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{info, warn, Instrument};

/// Run background removal jobs with synthesized progress
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "bgremove-jobs")]
pub struct Cli {
    /// Image handles to process, in order
    #[arg(value_name = "IMAGE", required = true)]
    pub images: Vec<String>,

    /// Removal engine program (see the JSON-lines protocol in the crate docs)
    #[arg(long, value_name = "PROGRAM", required_unless_present = "simulate")]
    pub engine_cmd: Option<String>,

    /// Extra argument passed to the engine program (repeatable)
    #[arg(long = "engine-arg", value_name = "ARG", allow_hyphen_values = true)]
    pub engine_args: Vec<String>,

    /// Use a built-in simulated engine instead of an external program
    #[arg(long, conflicts_with = "engine_cmd")]
    pub simulate: bool,

    /// Base location the engine resolves its model assets against
    #[arg(long, value_name = "URL")]
    pub public_path: Option<String>,

    /// Configuration file [default: the user config dir, if present]
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Telemetry output
    #[arg(long, value_enum, default_value_t = CliTelemetry::None)]
    pub telemetry: CliTelemetry,

    /// Log output format
    #[arg(long, value_enum, default_value_t = CliLogFormat::Console)]
    pub log_format: CliLogFormat,

    /// Enable verbose logging (-v: DEBUG, -vv: TRACE)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum CliTelemetry {
    None,
    Log,
    Json,
}

impl From<CliTelemetry> for TelemetryKind {
    fn from(value: CliTelemetry) -> Self {
        match value {
            CliTelemetry::None => Self::None,
            CliTelemetry::Log => Self::Log,
            CliTelemetry::Json => Self::Json,
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum CliLogFormat {
    Console,
    Compact,
    #[cfg(feature = "tracing-json")]
    Json,
}

impl From<CliLogFormat> for TracingFormat {
    fn from(value: CliLogFormat) -> Self {
        match value {
            CliLogFormat::Console => Self::Console,
            CliLogFormat::Compact => Self::Compact,
            #[cfg(feature = "tracing-json")]
            CliLogFormat::Json => Self::Json,
        }
    }
}

/// Outcome counts for a batch
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchReport {
    pub succeeded: usize,
    pub failed: usize,
}

pub async fn main() -> Result<()> {
    let cli = Cli::parse();
    let session_id = init_cli_tracing(cli.verbose, cli.log_format.into())
        .context("Failed to initialize tracing")?;

    let engine = CliConfigBuilder::engine(&cli)?;
    let config = CliConfigBuilder::segment_config(&cli)?;
    let options = CliConfigBuilder::options(&cli);

    let telemetry = create_telemetry_sink(cli.telemetry.into());
    telemetry.emit(&TelemetryEvent::WelcomeExposed);

    let session = spans::session(&session_id, engine.name());
    let orchestrator = SegmentOrchestrator::builder(engine)
        .config(config)
        .telemetry_boxed(telemetry)
        .build()
        .context("Invalid configuration")?;

    let start_time = Instant::now();
    let report = run_batch(&orchestrator, &cli.images, &options, cli.telemetry)
        .instrument(session)
        .await?;
    events::batch_summary(
        report.succeeded,
        report.failed,
        start_time.elapsed().as_millis() as u64,
    );

    if report.failed > 0 {
        anyhow::bail!(
            "{} of {} image(s) failed",
            report.failed,
            report.succeeded + report.failed
        );
    }
    Ok(())
}

/// Process `images` in order, one job at a time
pub async fn run_batch(
    orchestrator: &SegmentOrchestrator,
    images: &[String],
    options: &SegmentOptions,
    telemetry: CliTelemetry,
) -> Result<BatchReport> {
    let pb = ProgressBar::new(100);
    pb.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} {prefix} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos:>3}% {msg}",
        )?
        .progress_chars("#>-"),
    );
    let renderer = tokio::spawn(render_states(orchestrator.subscribe(), pb.clone()));

    let mut report = BatchReport::default();
    async {
        for (index, image) in images.iter().enumerate() {
            pb.reset();
            pb.set_prefix(format!("[{}/{}]", index + 1, images.len()));

            let result = orchestrator
                .process_with_options(image.as_str(), options)
                .instrument(spans::image(index, image))
                .await;
            match result {
                Ok(output) => {
                    report.succeeded += 1;
                    if telemetry == CliTelemetry::Json {
                        info!(image = %image, output = %output, "Background removed");
                    } else {
                        pb.suspend(|| println!("{} -> {}", image, output));
                    }
                },
                Err(e) => {
                    report.failed += 1;
                    events::error_with_context(&e, image);
                },
            }
        }
    }
    .instrument(spans::batch(images.len()))
    .await;

    renderer.abort();
    pb.finish_and_clear();
    if report.failed > 0 {
        warn!(
            "Some images failed. Succeeded: {}, Failed: {}",
            report.succeeded, report.failed
        );
    }
    Ok(report)
}

async fn render_states(mut updates: watch::Receiver<JobState>, pb: ProgressBar) {
    while updates.changed().await.is_ok() {
        let state = updates.borrow_and_update().clone();
        pb.set_position(u64::from(state.progress));
        pb.set_message(status_line(&state));
    }
}

fn status_line(state: &JobState) -> String {
    match (&state.error, state.loading, state.step) {
        (Some(error), false, _) => format!("❌ {}", error),
        (None, false, _) if state.result.is_some() => "✅ done".to_string(),
        (_, true, Step::Downloading) => "📥 Downloading model".to_string(),
        (_, true, Step::Processing) => "🔄 Removing background".to_string(),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::ScriptedEngine;
    use crate::error::EngineFailure;
    use crate::types::{ImageHandle, OutputHandle};

    #[test]
    fn test_cli_requires_engine_or_simulate() {
        assert!(Cli::try_parse_from(["bgremove-jobs", "a.png"]).is_err());
        assert!(Cli::try_parse_from(["bgremove-jobs", "--simulate", "a.png"]).is_ok());
        assert!(Cli::try_parse_from(["bgremove-jobs", "--engine-cmd", "remover", "a.png"]).is_ok());
    }

    #[test]
    fn test_cli_rejects_conflicting_engines() {
        let result =
            Cli::try_parse_from(["bgremove-jobs", "--simulate", "--engine-cmd", "x", "a.png"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_requires_image() {
        assert!(Cli::try_parse_from(["bgremove-jobs", "--simulate"]).is_err());
    }

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::try_parse_from(["bgremove-jobs", "--simulate", "-vv", "a.png", "b.png"])
            .unwrap();
        assert_eq!(cli.images, vec!["a.png", "b.png"]);
        assert_eq!(cli.telemetry, CliTelemetry::None);
        assert_eq!(cli.log_format, CliLogFormat::Console);
        assert_eq!(cli.verbose, 2);
        assert_eq!(TelemetryKind::from(CliTelemetry::Json), TelemetryKind::Json);
    }

    #[test]
    fn test_status_line() {
        let mut state = JobState::started(ImageHandle::from("a.png"), Step::Downloading);
        assert!(status_line(&state).contains("Downloading"));

        state.step = Step::Processing;
        assert!(status_line(&state).contains("Removing background"));

        state.loading = false;
        state.result = Some(OutputHandle::from("out"));
        assert!(status_line(&state).contains("done"));

        state.result = None;
        state.error = Some(EngineFailure::new("oom"));
        assert!(status_line(&state).contains("oom"));

        assert_eq!(status_line(&JobState::default()), "");
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_counts_outcomes() {
        let orchestrator = SegmentOrchestrator::new(ScriptedEngine::deriving("-nobg"));
        let images = vec!["a.png".to_string(), " ".to_string(), "b.png".to_string()];

        let report = run_batch(
            &orchestrator,
            &images,
            &SegmentOptions::default(),
            CliTelemetry::Json,
        )
        .await
        .unwrap();

        assert_eq!(
            report,
            BatchReport {
                succeeded: 2,
                failed: 1
            }
        );
        assert_eq!(
            orchestrator.snapshot().result,
            Some(OutputHandle::from("b.png-nobg"))
        );
    }
}
