//! Background removal job orchestrator
//!
//! [`SegmentOrchestrator`] owns the lifecycle of one job at a time: it starts
//! the engine call, turns the engine's progress reports into the observable
//! [`JobState`], runs the extrapolation timer while inference is silent, and
//! finalizes the state when the engine resolves or rejects.
//!
//! Every asynchronous path (progress callback, throttle flush, timer tick,
//! engine completion) captures the job's generation and checks it under the
//! job lock before touching state, so a superseded job can never write into
//! its successor. The engine call itself is not cancelled.

use crate::{
    config::{SegmentConfig, SegmentOptions},
    engine::{EngineOptions, ProgressCallback, RemovalEngine},
    error::{EngineFailure, Result, SegmentError},
    services::{NoOpTelemetry, TelemetryEvent, TelemetrySink},
    synthesizer::{Admission, InferenceSignal, ProgressSynthesizer, Throttle},
    types::{ImageHandle, JobState, OutputHandle, ProgressSample, Step},
    warm::EngineWarmState,
};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn, Instrument};

/// Trailing-edge flush task for one throttle window
struct PendingFlush {
    at: Instant,
    task: JoinHandle<()>,
}

/// Per-job bookkeeping, dropped when the job ends or is superseded
struct SynthesisContext {
    generation: u64,
    started_at: Instant,
    synthesizer: ProgressSynthesizer,
    throttle: Throttle,
    extrapolation: Option<JoinHandle<()>>,
    flush: Option<PendingFlush>,
    runtime: Handle,
}

impl SynthesisContext {
    fn new(generation: u64, config: &SegmentConfig, runtime: Handle) -> Self {
        Self {
            generation,
            started_at: Instant::now(),
            synthesizer: ProgressSynthesizer::new(config),
            throttle: Throttle::new(config.throttle_window()),
            extrapolation: None,
            flush: None,
            runtime,
        }
    }

    fn stop_extrapolation(&mut self) {
        if let Some(timer) = self.extrapolation.take() {
            timer.abort();
            debug!(generation = self.generation, "Extrapolation timer stopped");
        }
    }

    fn abort_flush(&mut self) {
        if let Some(flush) = self.flush.take() {
            flush.task.abort();
        }
    }

    /// Abort both timers and drop any held sample
    fn cancel_timers(&mut self) {
        self.stop_extrapolation();
        self.abort_flush();
        self.throttle.cancel();
    }
}

#[derive(Default)]
struct JobSlot {
    generation: u64,
    context: Option<SynthesisContext>,
}

impl JobSlot {
    fn current_mut(&mut self, generation: u64) -> Option<&mut SynthesisContext> {
        if self.generation != generation {
            return None;
        }
        self.context.as_mut()
    }

    /// Tear down the active job and invalidate its generation
    fn retire(&mut self) {
        if let Some(mut context) = self.context.take() {
            context.cancel_timers();
        }
        self.generation += 1;
    }
}

/// State shared between the orchestrator and its callbacks and timers
struct Shared {
    config: SegmentConfig,
    warm: EngineWarmState,
    state_tx: watch::Sender<JobState>,
    slot: Mutex<JobSlot>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, JobSlot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Supersede any active job and start a new one
    fn begin(&self, image: ImageHandle, runtime: Handle) -> (u64, Step) {
        let mut slot = self.lock();
        if slot.context.is_some() {
            debug!(generation = slot.generation, "Superseding active job");
        }
        slot.retire();
        let generation = slot.generation;
        let step = if self.warm.is_resident() {
            Step::Processing
        } else {
            Step::Downloading
        };
        slot.context = Some(SynthesisContext::new(generation, &self.config, runtime));
        self.state_tx.send_replace(JobState::started(image, step));
        (generation, step)
    }

    fn on_sample(self: &Arc<Self>, generation: u64, sample: ProgressSample) {
        let mut slot = self.lock();
        let Some(context) = slot.current_mut(generation) else {
            debug!(generation, key = %sample.key, "Discarding stale progress sample");
            return;
        };

        match context.throttle.offer(Instant::now(), sample) {
            Admission::Apply(sample) => {
                // a new window has opened; the previous window's flush is moot
                context.abort_flush();
                self.apply(context, &sample);
            },
            Admission::Deferred { flush_at, schedule } => {
                if schedule {
                    context.abort_flush();
                    let shared = Arc::clone(self);
                    let task = context.runtime.spawn(async move {
                        tokio::time::sleep_until(flush_at).await;
                        shared.flush(generation, flush_at);
                    });
                    context.flush = Some(PendingFlush { at: flush_at, task });
                }
            },
        }
    }

    fn flush(self: &Arc<Self>, generation: u64, flush_at: Instant) {
        let mut slot = self.lock();
        let Some(context) = slot.current_mut(generation) else {
            return;
        };
        if context.flush.as_ref().is_some_and(|flush| flush.at == flush_at) {
            context.flush = None;
        }
        if let Some(sample) = context.throttle.flush(Instant::now()) {
            self.apply(context, &sample);
        }
    }

    fn apply(self: &Arc<Self>, context: &mut SynthesisContext, sample: &ProgressSample) {
        let Some(signal) = self.settle(context, sample) else {
            return;
        };
        match signal {
            InferenceSignal::Completed => context.stop_extrapolation(),
            InferenceSignal::Running if context.extrapolation.is_none() => {
                context.extrapolation = Some(self.spawn_extrapolation(context));
            },
            InferenceSignal::Running => {},
        }
    }

    /// Apply a sample's progress, step and warm-flag effects
    ///
    /// Returns the inference signal so the caller can drive the timer.
    fn settle(
        &self,
        context: &mut SynthesisContext,
        sample: &ProgressSample,
    ) -> Option<InferenceSignal> {
        let outcome = context.synthesizer.observe(sample, self.warm.is_resident());
        debug!(
            generation = context.generation,
            key = %sample.key,
            current = sample.current,
            total = sample.total,
            "Applying progress sample"
        );

        // Once extrapolating, the timer owns the progress value
        if let Some(progress) = outcome.progress {
            if context.extrapolation.is_none() {
                self.raise_progress(progress);
            }
        }

        let signal = outcome.inference?;
        self.warm.mark_resident();
        self.set_step(Step::Processing);
        Some(signal)
    }

    fn spawn_extrapolation(self: &Arc<Self>, context: &SynthesisContext) -> JoinHandle<()> {
        let shared = Arc::clone(self);
        let generation = context.generation;
        let period = self.config.extrapolation_tick();
        debug!(generation, "Extrapolation timer started");
        context.runtime.spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if !shared.extrapolate(generation) {
                    break;
                }
            }
        })
    }

    /// One extrapolation tick; returns whether the timer should keep running
    fn extrapolate(&self, generation: u64) -> bool {
        let mut slot = self.lock();
        let Some(context) = slot.current_mut(generation) else {
            return false;
        };
        if !self.state_tx.borrow().loading {
            context.extrapolation = None;
            return false;
        }
        let progress = context.synthesizer.extrapolate(context.started_at.elapsed());
        self.raise_progress(progress);
        true
    }

    fn raise_progress(&self, progress: u8) {
        self.state_tx.send_if_modified(|state| {
            if state.loading && progress > state.progress {
                state.progress = progress;
                true
            } else {
                false
            }
        });
    }

    fn set_step(&self, step: Step) {
        self.state_tx.send_if_modified(|state| {
            if state.loading && state.step != step {
                state.step = step;
                true
            } else {
                false
            }
        });
    }

    /// Apply the engine's outcome if the job is still current
    fn finish(&self, generation: u64, outcome: &std::result::Result<OutputHandle, EngineFailure>) -> bool {
        let mut slot = self.lock();
        if slot.generation != generation || slot.context.is_none() {
            return false;
        }
        if let Some(mut context) = slot.context.take() {
            // the last held sample still lands so step and warm state converge
            if let Some(sample) = context.throttle.take_pending() {
                self.settle(&mut context, &sample);
            }
            context.cancel_timers();
        }
        self.state_tx.send_modify(|state| {
            state.loading = false;
            match outcome {
                Ok(output) => {
                    state.error = None;
                    state.result = Some(output.clone());
                },
                Err(failure) => {
                    state.error = Some(failure.clone());
                },
            }
        });
        true
    }

    /// Drop the job if it is still current without recording an outcome
    fn abandon(&self, generation: u64) {
        let mut slot = self.lock();
        if slot.generation == generation && slot.context.is_some() {
            slot.retire();
            self.state_tx.send_replace(JobState::default());
            debug!(generation, "Job abandoned before the engine finished");
        }
    }
}

/// Resets the job if the `process` future is dropped before completing
struct InFlight<'a> {
    shared: &'a Shared,
    generation: u64,
    armed: bool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.shared.abandon(self.generation);
        }
    }
}

/// Orchestrates background removal jobs against a removal engine
///
/// # Examples
///
/// ```rust
/// use bgremove_jobs::{ScriptedEngine, SegmentOrchestrator};
///
/// # async fn example() -> bgremove_jobs::Result<()> {
/// let orchestrator = SegmentOrchestrator::new(ScriptedEngine::succeeding("portrait-nobg.png"));
/// let mut updates = orchestrator.subscribe();
///
/// let output = orchestrator.process("portrait.jpg").await?;
/// assert_eq!(output.as_str(), "portrait-nobg.png");
///
/// let state = updates.borrow_and_update().clone();
/// assert!(!state.loading);
/// assert_eq!(state.result, Some(output));
/// # Ok(())
/// # }
/// ```
pub struct SegmentOrchestrator {
    engine: Arc<dyn RemovalEngine>,
    telemetry: Arc<dyn TelemetrySink>,
    shared: Arc<Shared>,
}

impl SegmentOrchestrator {
    /// Create an orchestrator with default configuration, its own warm state
    /// and no telemetry
    pub fn new<E: RemovalEngine + 'static>(engine: E) -> Self {
        Self::from_parts(
            Arc::new(engine),
            SegmentConfig::default(),
            EngineWarmState::new(),
            Arc::new(NoOpTelemetry),
        )
    }

    /// Create a new orchestrator builder
    pub fn builder<E: RemovalEngine + 'static>(engine: E) -> SegmentOrchestratorBuilder {
        SegmentOrchestratorBuilder::new(Arc::new(engine))
    }

    fn from_parts(
        engine: Arc<dyn RemovalEngine>,
        config: SegmentConfig,
        warm: EngineWarmState,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        let (state_tx, _) = watch::channel(JobState::default());
        Self {
            engine,
            telemetry,
            shared: Arc::new(Shared {
                config,
                warm,
                state_tx,
                slot: Mutex::new(JobSlot::default()),
            }),
        }
    }

    /// Remove the background from `image` with default options
    ///
    /// # Errors
    /// - `SegmentError::InvalidImage` for an empty handle (no state is touched)
    /// - `SegmentError::Engine` when the engine rejects the job
    pub async fn process(&self, image: impl Into<ImageHandle>) -> Result<OutputHandle> {
        self.process_with_options(image, &SegmentOptions::default())
            .await
    }

    /// Remove the background from `image`
    ///
    /// Supersedes any job that is still running on this orchestrator: its
    /// timers are torn down and whatever its engine call later returns is
    /// not applied to the state. The superseded caller still receives its
    /// engine's outcome.
    ///
    /// # Errors
    /// - `SegmentError::InvalidImage` for an empty handle (no state is touched)
    /// - `SegmentError::Internal` when not called inside a Tokio runtime
    /// - `SegmentError::Engine` when the engine rejects the job
    pub async fn process_with_options(
        &self,
        image: impl Into<ImageHandle>,
        options: &SegmentOptions,
    ) -> Result<OutputHandle> {
        let image = image.into();
        if image.is_empty() {
            return Err(SegmentError::invalid_image("image handle is empty"));
        }
        let runtime = Handle::try_current()
            .map_err(|_| SegmentError::internal("process() must run inside a Tokio runtime"))?;

        let engine_options = EngineOptions {
            public_path: options.public_path.clone(),
            revision: self.shared.warm.revision_for_job(),
        };
        let (generation, step) = self.shared.begin(image.clone(), runtime);
        let mut in_flight = InFlight {
            shared: &self.shared,
            generation,
            armed: true,
        };

        let span = tracing::info_span!(
            "segment_job",
            generation,
            image = %image,
            engine = %self.engine.name()
        );
        span.in_scope(|| info!(step = %step, revision = engine_options.revision, "Starting background removal"));
        self.telemetry.emit(&TelemetryEvent::BackgroundRemove);

        let callback = {
            let shared = Arc::clone(&self.shared);
            ProgressCallback::new(move |sample| shared.on_sample(generation, sample))
        };
        let started = Instant::now();
        let outcome = self
            .engine
            .remove_background(&image, callback, &engine_options)
            .instrument(span.clone())
            .await;
        let duration = started.elapsed();
        in_flight.armed = false;

        self.telemetry.emit(&match outcome {
            Ok(_) => TelemetryEvent::BackgroundRemoveSuccess { duration },
            Err(_) => TelemetryEvent::BackgroundRemoveFail { duration },
        });

        let applied = self.shared.finish(generation, &outcome);
        span.in_scope(|| match (&outcome, applied) {
            (_, false) => debug!("Discarding outcome of superseded job"),
            (Ok(output), true) => info!(
                output = %output,
                duration_ms = duration.as_millis() as u64,
                "✅ Background removed"
            ),
            (Err(failure), true) => warn!(
                error = %failure,
                duration_ms = duration.as_millis() as u64,
                "❌ Background removal failed"
            ),
        });

        outcome.map_err(SegmentError::from)
    }

    /// Cancel the active job's timers
    ///
    /// Idempotent, and a no-op when no job is active. The job itself keeps
    /// running and the state is not otherwise changed.
    pub fn clear(&self) {
        let mut slot = self.shared.lock();
        if let Some(context) = slot.context.as_mut() {
            context.cancel_timers();
        }
    }

    /// Cancel the active job's timers and return the state to its defaults
    ///
    /// The active job, if any, is detached: its engine outcome is no longer
    /// applied. The engine warm state is left untouched.
    pub fn reset(&self) {
        self.clear();
        let mut slot = self.shared.lock();
        slot.retire();
        self.shared.state_tx.send_replace(JobState::default());
    }

    /// Current state snapshot
    #[must_use]
    pub fn snapshot(&self) -> JobState {
        self.shared.state_tx.borrow().clone()
    }

    /// Subscribe to state changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<JobState> {
        self.shared.state_tx.subscribe()
    }

    #[must_use]
    pub fn warm_state(&self) -> &EngineWarmState {
        &self.shared.warm
    }

    #[must_use]
    pub fn config(&self) -> &SegmentConfig {
        &self.shared.config
    }
}

impl Drop for SegmentOrchestrator {
    fn drop(&mut self) {
        self.shared.lock().retire();
    }
}

/// Builder for `SegmentOrchestrator`
pub struct SegmentOrchestratorBuilder {
    engine: Arc<dyn RemovalEngine>,
    config: SegmentConfig,
    warm: Option<EngineWarmState>,
    telemetry: Arc<dyn TelemetrySink>,
}

impl SegmentOrchestratorBuilder {
    fn new(engine: Arc<dyn RemovalEngine>) -> Self {
        Self {
            engine,
            config: SegmentConfig::default(),
            warm: None,
            telemetry: Arc::new(NoOpTelemetry),
        }
    }

    #[must_use]
    pub fn config(mut self, config: SegmentConfig) -> Self {
        self.config = config;
        self
    }

    /// Share warm-up state with other orchestrators driving the same engine
    #[must_use]
    pub fn warm_state(mut self, warm: EngineWarmState) -> Self {
        self.warm = Some(warm);
        self
    }

    #[must_use]
    pub fn telemetry<T: TelemetrySink + 'static>(mut self, telemetry: T) -> Self {
        self.telemetry = Arc::new(telemetry);
        self
    }

    #[must_use]
    pub fn telemetry_boxed(mut self, telemetry: Box<dyn TelemetrySink>) -> Self {
        self.telemetry = Arc::from(telemetry);
        self
    }

    /// Build the orchestrator
    ///
    /// # Errors
    /// - Configuration validation failures
    pub fn build(self) -> Result<SegmentOrchestrator> {
        self.config.validate()?;
        Ok(SegmentOrchestrator::from_parts(
            self.engine,
            self.config,
            self.warm.unwrap_or_default(),
            self.telemetry,
        ))
    }
}
