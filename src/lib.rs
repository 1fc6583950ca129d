#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::unused_async)]

//! # Background Removal Job Orchestration
//!
//! Drives a background removal engine for one image at a time and publishes
//! an observable job state: a percentage, the current step, and the final
//! result or error.
//!
//! Removal engines report progress unevenly. Model downloads arrive as a
//! burst of per-file samples, and inference is silent for many seconds. The
//! orchestrator turns those reports into a steadily advancing percentage:
//!
//! - **Download staircase**: each download sub-phase advances a running floor
//! - **Extrapolation**: during inference the percentage moves with wall-clock
//!   time toward a cap just below 100
//! - **Throttling**: bursts of samples are applied at most once per window
//! - **Warm state**: once the model is resident, later jobs skip the
//!   `Downloading` step
//! - **Supersession**: starting a job invalidates every callback and timer of
//!   the previous one
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use bgremove_jobs::{CommandEngine, SegmentConfig, SegmentOrchestrator};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let engine = CommandEngine::new("bgremove-engine");
//! let orchestrator = SegmentOrchestrator::builder(engine)
//!     .config(SegmentConfig::load(None)?)
//!     .build()?;
//!
//! let mut updates = orchestrator.subscribe();
//! tokio::spawn(async move {
//!     while updates.changed().await.is_ok() {
//!         let state = updates.borrow_and_update().clone();
//!         println!("{}: {}%", state.step, state.progress);
//!     }
//! });
//!
//! let output = orchestrator.process("portrait.jpg").await?;
//! println!("saved to {}", output);
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - `cli` (default): the `bgremove-jobs` command-line frontend
//! - `tracing-json`: JSON log output for the CLI
//!
//! To use only as a library without CLI dependencies:
//!
//! ```toml
//! [dependencies]
//! bgremove-jobs = { version = "0.1", default-features = false }
//! ```

pub mod backends;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod orchestrator;
pub mod services;
pub mod synthesizer;
#[cfg(feature = "cli")]
pub mod tracing_config;
pub mod types;
pub mod warm;

pub use backends::{CommandEngine, EngineCall, ScriptedEngine};
pub use config::{SegmentConfig, SegmentConfigBuilder, SegmentOptions, INFERENCE_PHASE_KEY};
pub use engine::{EngineOptions, ProgressCallback, RemovalEngine};
pub use error::{EngineFailure, Result, SegmentError};
pub use orchestrator::{SegmentOrchestrator, SegmentOrchestratorBuilder};
pub use services::{
    create_telemetry_sink, JsonTelemetry, NoOpTelemetry, TelemetryEvent, TelemetryKind,
    TelemetrySink, TracingTelemetry,
};
pub use synthesizer::{Admission, InferenceSignal, ProgressSynthesizer, SampleOutcome, Throttle};
pub use types::{ImageHandle, JobState, OutputHandle, ProgressSample, Step};
pub use warm::EngineWarmState;
