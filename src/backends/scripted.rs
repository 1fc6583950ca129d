//! Scripted removal engine for tests and demos
//!
//! Replays a fixed sequence of progress samples and pauses, then resolves
//! or rejects. Samples added with [`ScriptedEngine::cold_sample`] are only
//! replayed on the first invocation, which mimics an engine that downloads
//! its model once and keeps it loaded afterwards.

use crate::{
    engine::{EngineOptions, ProgressCallback, RemovalEngine},
    error::EngineFailure,
    types::{ImageHandle, OutputHandle, ProgressSample},
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

#[derive(Debug, Clone)]
enum ScriptStep {
    Sample(ProgressSample),
    Sleep(Duration),
}

#[derive(Debug, Clone)]
enum ScriptOutcome {
    Output(OutputHandle),
    /// Output handle derived from the input handle plus a suffix
    Derived(String),
    Failure(EngineFailure),
}

/// A recorded engine invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineCall {
    pub image: ImageHandle,
    pub options: EngineOptions,
}

/// Engine that replays a script
#[derive(Debug, Clone)]
pub struct ScriptedEngine {
    cold_steps: Vec<ScriptStep>,
    steps: Vec<ScriptStep>,
    outcome: ScriptOutcome,
    gate: Option<Arc<Semaphore>>,
    warmed: Arc<AtomicBool>,
    /// Call history for verification in tests
    call_history: Arc<Mutex<Vec<EngineCall>>>,
}

impl ScriptedEngine {
    fn with_outcome(outcome: ScriptOutcome) -> Self {
        Self {
            cold_steps: Vec::new(),
            steps: Vec::new(),
            outcome,
            gate: None,
            warmed: Arc::new(AtomicBool::new(false)),
            call_history: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Engine that resolves with `output`
    pub fn succeeding<O: Into<OutputHandle>>(output: O) -> Self {
        Self::with_outcome(ScriptOutcome::Output(output.into()))
    }

    /// Engine that rejects with `message`
    pub fn failing<S: Into<String>>(message: S) -> Self {
        Self::with_outcome(ScriptOutcome::Failure(EngineFailure::new(message)))
    }

    /// Engine that resolves with the input handle followed by `suffix`
    pub fn deriving<S: Into<String>>(suffix: S) -> Self {
        Self::with_outcome(ScriptOutcome::Derived(suffix.into()))
    }

    /// A plausible model download followed by a few seconds of inference
    #[must_use]
    pub fn simulated() -> Self {
        let mut engine = Self::deriving("-nobg.png");
        for current in 0..=4 {
            engine = engine
                .cold_sample("fetch:/models/isnet_fp16", current, 4)
                .cold_sleep(Duration::from_millis(400));
        }
        for current in 0..=2 {
            engine = engine
                .cold_sample("fetch:/onnxruntime-web/ort-wasm-simd.wasm", current, 2)
                .cold_sleep(Duration::from_millis(300));
        }
        engine
            .sample("compute:decode", 1, 1)
            .sample("compute:inference", 0, 1)
            .sleep(Duration::from_secs(4))
            .sample("compute:inference", 1, 1)
            .sample("compute:mask", 1, 1)
    }

    /// Report a sample on every invocation
    #[must_use]
    pub fn sample(mut self, key: &str, current: u64, total: u64) -> Self {
        self.steps
            .push(ScriptStep::Sample(ProgressSample::new(key, current, total)));
        self
    }

    /// Pause on every invocation
    #[must_use]
    pub fn sleep(mut self, duration: Duration) -> Self {
        self.steps.push(ScriptStep::Sleep(duration));
        self
    }

    /// Report a sample on the first invocation only
    #[must_use]
    pub fn cold_sample(mut self, key: &str, current: u64, total: u64) -> Self {
        self.cold_steps
            .push(ScriptStep::Sample(ProgressSample::new(key, current, total)));
        self
    }

    /// Pause on the first invocation only
    #[must_use]
    pub fn cold_sleep(mut self, duration: Duration) -> Self {
        self.cold_steps.push(ScriptStep::Sleep(duration));
        self
    }

    /// Hold every invocation after its script until [`release`](Self::release) is called
    #[must_use]
    pub fn gated(mut self) -> Self {
        self.gate = Some(Arc::new(Semaphore::new(0)));
        self
    }

    /// Let one held invocation finish (in call order)
    pub fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(1);
        }
    }

    /// Get the call history for verification in tests
    pub fn calls(&self) -> Vec<EngineCall> {
        self.call_history
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    fn record_call(&self, image: &ImageHandle, options: &EngineOptions) {
        if let Ok(mut history) = self.call_history.lock() {
            history.push(EngineCall {
                image: image.clone(),
                options: options.clone(),
            });
        }
    }

    async fn replay(steps: &[ScriptStep], progress: &ProgressCallback) {
        for step in steps {
            match step {
                ScriptStep::Sample(sample) => progress.report_sample(sample.clone()),
                ScriptStep::Sleep(duration) => tokio::time::sleep(*duration).await,
            }
        }
    }
}

#[async_trait]
impl RemovalEngine for ScriptedEngine {
    async fn remove_background(
        &self,
        image: &ImageHandle,
        progress: ProgressCallback,
        options: &EngineOptions,
    ) -> Result<OutputHandle, EngineFailure> {
        self.record_call(image, options);

        if !self.warmed.swap(true, Ordering::AcqRel) {
            Self::replay(&self.cold_steps, &progress).await;
        }
        Self::replay(&self.steps, &progress).await;

        if let Some(gate) = &self.gate {
            match gate.acquire().await {
                Ok(permit) => permit.forget(),
                Err(_) => return Err(EngineFailure::new("scripted engine gate closed")),
            }
        }

        match &self.outcome {
            ScriptOutcome::Output(output) => Ok(output.clone()),
            ScriptOutcome::Derived(suffix) => {
                Ok(OutputHandle::new(format!("{}{}", image.as_str(), suffix)))
            },
            ScriptOutcome::Failure(failure) => Err(failure.clone()),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
