//! End-to-end job scenarios against scripted engines
//!
//! All tests run on a paused Tokio clock so throttle windows and
//! extrapolation ticks fire deterministically.

use bgremove_jobs::{
    EngineWarmState, ImageHandle, JobState, OutputHandle, Result, ScriptedEngine, SegmentError,
    SegmentOrchestrator, Step, TelemetryEvent, TelemetrySink,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Collect every state the orchestrator publishes
fn record_states(orchestrator: &SegmentOrchestrator) -> Arc<Mutex<Vec<JobState>>> {
    let mut updates = orchestrator.subscribe();
    let seen = Arc::new(Mutex::new(vec![updates.borrow_and_update().clone()]));
    let sink = Arc::clone(&seen);
    tokio::spawn(async move {
        while updates.changed().await.is_ok() {
            let state = updates.borrow_and_update().clone();
            sink.lock().unwrap().push(state);
        }
    });
    seen
}

fn spawn_job(
    orchestrator: &Arc<SegmentOrchestrator>,
    image: &'static str,
) -> JoinHandle<Result<OutputHandle>> {
    let orchestrator = Arc::clone(orchestrator);
    tokio::spawn(async move { orchestrator.process(image).await })
}

async fn advance(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

#[derive(Clone, Default)]
struct RecordingTelemetry {
    events: Arc<Mutex<Vec<TelemetryEvent>>>,
}

impl RecordingTelemetry {
    fn names(&self) -> Vec<String> {
        self.events.lock().unwrap().iter().map(TelemetryEvent::name).collect()
    }
}

impl TelemetrySink for RecordingTelemetry {
    fn emit(&self, event: &TelemetryEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

#[tokio::test(start_paused = true)]
async fn cold_job_downloads_then_extrapolates_to_success() {
    let engine = ScriptedEngine::succeeding("outputX")
        .sample("fetch:/models/isnet", 1, 4)
        .sleep(Duration::from_secs(1))
        .sample("fetch:/models/isnet", 4, 4)
        .sleep(Duration::from_secs(1))
        .sample("fetch:/ort-wasm.wasm", 1, 2)
        .sleep(Duration::from_secs(1))
        .sample("compute:inference", 0, 1)
        .sleep(Duration::from_secs(5))
        .sample("compute:inference", 1, 1);
    let orchestrator = SegmentOrchestrator::new(engine);
    let seen = record_states(&orchestrator);

    let output = orchestrator.process("portrait.jpg").await.unwrap();
    assert_eq!(output.as_str(), "outputX");

    let state = orchestrator.snapshot();
    assert!(!state.loading);
    assert_eq!(state.step, Step::Processing);
    assert_eq!(state.result, Some(OutputHandle::from("outputX")));
    assert_eq!(state.error, None);
    assert_eq!(state.image, ImageHandle::from("portrait.jpg"));
    assert!(state.progress >= 32 && state.progress <= 99);
    assert!(orchestrator.warm_state().is_resident());

    let seen = seen.lock().unwrap();
    let loading: Vec<u8> = seen
        .iter()
        .filter(|s| s.loading)
        .map(|s| s.progress)
        .collect();
    assert!(loading.windows(2).all(|w| w[0] <= w[1]), "{:?}", loading);
    assert!(seen.iter().any(|s| s.loading && s.step == Step::Downloading));
}

#[tokio::test(start_paused = true)]
async fn fetch_then_inference_settles_on_processing() {
    let engine = ScriptedEngine::succeeding("outputX")
        .sample("fetch", 1, 6)
        .sleep(Duration::from_secs(1))
        .sample("fetch", 2, 6)
        .sleep(Duration::from_secs(1))
        .sample("compute:inference", 0, 1);
    let orchestrator = SegmentOrchestrator::new(engine);

    orchestrator.process("portrait.jpg").await.unwrap();

    let state = orchestrator.snapshot();
    assert!(!state.loading);
    assert_eq!(state.error, None);
    assert_eq!(state.result, Some(OutputHandle::from("outputX")));
    assert_eq!(state.step, Step::Processing);
    // one phase change: floor(100/6)
    assert_eq!(state.progress, 16);
}

#[tokio::test(start_paused = true)]
async fn burst_before_resolve_still_delivers_last_sample() {
    let engine = ScriptedEngine::succeeding("outputX")
        .sample("fetch", 1, 6)
        .sample("fetch", 2, 6)
        .sample("compute:inference", 0, 1);
    let orchestrator = SegmentOrchestrator::new(engine.clone());

    orchestrator.process("imgA").await.unwrap();
    advance(5_000).await;

    let state = orchestrator.snapshot();
    assert!(!state.loading);
    assert_eq!(state.result, Some(OutputHandle::from("outputX")));
    assert_eq!(state.step, Step::Processing);
    assert_eq!(state.progress, 16);
    assert!(orchestrator.warm_state().is_resident());

    // the next job starts warm, so the fetch revision is reused
    orchestrator.process("imgB").await.unwrap();
    let calls = engine.calls();
    assert_eq!(calls[0].options.revision, 1);
    assert_eq!(calls[1].options.revision, 1);
}

#[tokio::test(start_paused = true)]
async fn failure_after_burst_still_marks_engine_resident() {
    let engine = ScriptedEngine::failing("oom")
        .sample("fetch", 1, 6)
        .sample("compute:inference", 0, 1);
    let orchestrator = SegmentOrchestrator::new(engine);

    assert!(orchestrator.process("imgA").await.is_err());

    let state = orchestrator.snapshot();
    assert!(state.is_failed());
    assert_eq!(state.step, Step::Processing);
    assert!(orchestrator.warm_state().is_resident());
}

#[tokio::test(start_paused = true)]
async fn boundary_burst_keeps_one_update_per_window() {
    let engine = ScriptedEngine::succeeding("out")
        .sample("fetch:/models/isnet", 1, 60)
        .sleep(Duration::from_millis(500))
        .sample("fetch:/models/isnet", 10, 60)
        .sleep(Duration::from_millis(500))
        .sample("fetch:/models/isnet", 20, 60)
        .sample("fetch:/models/isnet", 30, 60)
        .gated();
    let orchestrator = Arc::new(SegmentOrchestrator::new(engine.clone()));
    let job = spawn_job(&orchestrator, "a.png");

    // 30/60 is held for the window opened at t=1s
    advance(1_500).await;
    assert!(orchestrator.snapshot().progress < 8);

    advance(1_000).await;
    assert_eq!(orchestrator.snapshot().progress, 8);

    engine.release();
    job.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn regressing_samples_never_lower_progress() {
    let engine = ScriptedEngine::succeeding("out")
        .sample("fetch:/models/isnet", 5, 6)
        .sleep(Duration::from_secs(1))
        .sample("fetch:/models/isnet", 1, 6)
        .sleep(Duration::from_secs(1))
        .gated();
    let orchestrator = Arc::new(SegmentOrchestrator::new(engine.clone()));
    let job = spawn_job(&orchestrator, "a.png");

    advance(500).await;
    assert_eq!(orchestrator.snapshot().progress, 13);

    advance(2_000).await;
    assert_eq!(orchestrator.snapshot().progress, 13);

    engine.release();
    job.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn engine_failure_is_recorded() {
    let engine = ScriptedEngine::failing("oom")
        .sample("fetch:/models/isnet", 1, 2)
        .sleep(Duration::from_secs(1));
    let orchestrator = SegmentOrchestrator::new(engine);

    let err = orchestrator.process("portrait.jpg").await.unwrap_err();
    match &err {
        SegmentError::Engine(failure) => assert_eq!(failure.message(), "oom"),
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(err.to_string(), "oom");

    let state = orchestrator.snapshot();
    assert!(!state.loading);
    assert!(state.is_failed());
    assert_eq!(state.error.as_ref().map(|e| e.message()), Some("oom"));
    assert_eq!(state.result, None);
    assert_eq!(state.step, Step::Downloading);
    assert_eq!(state.image, ImageHandle::from("portrait.jpg"));
}

#[tokio::test(start_paused = true)]
async fn extrapolation_never_exceeds_cap() {
    let engine = ScriptedEngine::succeeding("out")
        .sample("compute:inference", 0, 1)
        .gated();
    let orchestrator = Arc::new(SegmentOrchestrator::new(engine.clone()));
    let job = spawn_job(&orchestrator, "a.png");

    advance(15_500).await;
    assert_eq!(orchestrator.snapshot().progress, 50);

    advance(15_000).await;
    assert_eq!(orchestrator.snapshot().progress, 99);

    advance(60_000).await;
    let state = orchestrator.snapshot();
    assert_eq!(state.progress, 99);
    assert!(state.loading);

    engine.release();
    job.await.unwrap().unwrap();
    assert!(orchestrator.snapshot().is_succeeded());
}

#[tokio::test(start_paused = true)]
async fn clear_is_idempotent_and_freezes_progress() {
    let engine = ScriptedEngine::succeeding("out")
        .sample("compute:inference", 0, 1)
        .gated();
    let orchestrator = Arc::new(SegmentOrchestrator::new(engine.clone()));

    // nothing to clear yet
    orchestrator.clear();
    assert_eq!(orchestrator.snapshot(), JobState::default());

    let job = spawn_job(&orchestrator, "a.png");
    advance(3_500).await;
    assert_eq!(orchestrator.snapshot().progress, 10);

    orchestrator.clear();
    orchestrator.clear();
    advance(10_000).await;

    let state = orchestrator.snapshot();
    assert_eq!(state.progress, 10);
    assert!(state.loading);

    engine.release();
    job.await.unwrap().unwrap();
    let state = orchestrator.snapshot();
    assert_eq!(state.result, Some(OutputHandle::from("out")));
    assert_eq!(state.progress, 10);
}

#[tokio::test(start_paused = true)]
async fn resident_engine_skips_download_step() {
    let warm = EngineWarmState::new();
    let first = SegmentOrchestrator::builder(
        ScriptedEngine::deriving("-nobg")
            .sample("fetch:/models/isnet", 1, 1)
            .sleep(Duration::from_secs(1))
            .sample("compute:inference", 0, 1)
            .sleep(Duration::from_secs(2))
            .sample("compute:inference", 1, 1),
    )
    .warm_state(warm.clone())
    .build()
    .unwrap();
    first.process("a.png").await.unwrap();
    assert!(warm.is_resident());

    let engine = ScriptedEngine::deriving("-nobg")
        .cold_sample("fetch:/models/isnet", 1, 2)
        .gated();
    let second = Arc::new(
        SegmentOrchestrator::builder(engine.clone())
            .warm_state(warm.clone())
            .build()
            .unwrap(),
    );
    let job = spawn_job(&second, "b.png");
    advance(100).await;

    let state = second.snapshot();
    assert!(state.loading);
    assert_eq!(state.step, Step::Processing);
    // download reports no longer move the percentage
    assert_eq!(state.progress, 0);

    engine.release();
    assert_eq!(job.await.unwrap().unwrap().as_str(), "b.png-nobg");
    assert_eq!(engine.calls()[0].options.revision, 1);
    assert_eq!(warm.fetch_revision(), 1);
}

#[tokio::test(start_paused = true)]
async fn superseded_job_cannot_touch_new_state() {
    let engine = ScriptedEngine::deriving("-nobg")
        .sample("compute:inference", 0, 1)
        .gated();
    let orchestrator = Arc::new(SegmentOrchestrator::new(engine.clone()));

    let first = spawn_job(&orchestrator, "a.png");
    advance(3_500).await;
    assert_eq!(orchestrator.snapshot().progress, 10);

    let second = spawn_job(&orchestrator, "b.png");
    advance(3_500).await;

    // only the second job's timer is running: 3s into its own job
    let state = orchestrator.snapshot();
    assert_eq!(state.image, ImageHandle::from("b.png"));
    assert_eq!(state.progress, 10);
    assert_eq!(state.step, Step::Processing);

    // the first job's late result is returned to its caller but not applied
    engine.release();
    assert_eq!(first.await.unwrap().unwrap().as_str(), "a.png-nobg");
    let state = orchestrator.snapshot();
    assert!(state.loading);
    assert_eq!(state.image, ImageHandle::from("b.png"));
    assert_eq!(state.result, None);

    engine.release();
    assert_eq!(second.await.unwrap().unwrap().as_str(), "b.png-nobg");
    let state = orchestrator.snapshot();
    assert!(!state.loading);
    assert_eq!(state.result, Some(OutputHandle::from("b.png-nobg")));
}

#[tokio::test(start_paused = true)]
async fn bursts_are_throttled_to_one_update_per_window() {
    let engine = ScriptedEngine::succeeding("out")
        .sample("fetch:/models/isnet", 1, 10)
        .sample("fetch:/models/isnet", 2, 10)
        .sample("fetch:/models/isnet", 3, 10)
        .sample("fetch:/models/isnet", 4, 10)
        .gated();
    let orchestrator = Arc::new(SegmentOrchestrator::new(engine.clone()));
    let job = spawn_job(&orchestrator, "a.png");

    // leading edge: 1/10 of the first download phase
    advance(500).await;
    assert_eq!(orchestrator.snapshot().progress, 1);

    // trailing edge: only the last held sample is applied
    advance(1_000).await;
    assert_eq!(orchestrator.snapshot().progress, 6);

    engine.release();
    job.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn reset_returns_to_defaults_and_detaches_job() {
    let engine = ScriptedEngine::succeeding("out")
        .sample("compute:inference", 0, 1)
        .gated();
    let orchestrator = Arc::new(SegmentOrchestrator::new(engine.clone()));
    let job = spawn_job(&orchestrator, "a.png");

    advance(3_500).await;
    assert_eq!(orchestrator.snapshot().progress, 10);

    orchestrator.reset();
    assert_eq!(orchestrator.snapshot(), JobState::default());

    advance(5_000).await;
    assert_eq!(orchestrator.snapshot(), JobState::default());

    engine.release();
    assert_eq!(job.await.unwrap().unwrap().as_str(), "out");
    assert_eq!(orchestrator.snapshot(), JobState::default());
    assert!(orchestrator.warm_state().is_resident());
}

#[tokio::test(start_paused = true)]
async fn telemetry_brackets_every_job() {
    let telemetry = RecordingTelemetry::default();
    let orchestrator =
        SegmentOrchestrator::builder(ScriptedEngine::succeeding("out").sleep(Duration::from_secs(2)))
            .telemetry(telemetry.clone())
            .build()
            .unwrap();

    orchestrator.process("a.png").await.unwrap();
    assert_eq!(
        telemetry.names(),
        vec!["click:background_remove", "click:background_remove_success"]
    );
    let duration = telemetry.events.lock().unwrap()[1].duration().unwrap();
    assert!(duration >= Duration::from_secs(2));

    let telemetry = RecordingTelemetry::default();
    let orchestrator = SegmentOrchestrator::builder(ScriptedEngine::failing("oom"))
        .telemetry(telemetry.clone())
        .build()
        .unwrap();
    assert!(orchestrator.process("a.png").await.is_err());
    assert_eq!(
        telemetry.names(),
        vec!["click:background_remove", "click:background_remove_fail"]
    );
}

#[tokio::test]
async fn blank_image_is_rejected_without_side_effects() {
    let telemetry = RecordingTelemetry::default();
    let engine = ScriptedEngine::succeeding("out");
    let orchestrator = SegmentOrchestrator::builder(engine.clone())
        .telemetry(telemetry.clone())
        .build()
        .unwrap();

    let err = orchestrator.process("   ").await.unwrap_err();
    assert!(matches!(err, SegmentError::InvalidImage(_)));
    assert_eq!(orchestrator.snapshot(), JobState::default());
    assert!(telemetry.names().is_empty());
    assert!(engine.calls().is_empty());
}
