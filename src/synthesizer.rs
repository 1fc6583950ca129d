//! Progress synthesis from raw engine reports
//!
//! Engines report progress in bursts and then go quiet for the whole of
//! inference. [`ProgressSynthesizer`] turns those reports into a percentage
//! that advances per download sub-phase and, once inference starts, is
//! extrapolated from wall-clock time. [`Throttle`] limits how often reports
//! are applied. Neither owns a timer; the orchestrator drives both.

use crate::config::SegmentConfig;
use crate::types::ProgressSample;
use std::time::Duration;
use tokio::time::Instant;

/// What the inference phase reported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InferenceSignal {
    /// Inference is under way; extrapolation should run
    Running,
    /// Inference reported `current == total`; extrapolation should stop
    Completed,
}

/// Result of feeding one sample to the synthesizer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SampleOutcome {
    /// Download-weighted percentage, when the model is not yet resident
    pub progress: Option<u8>,
    /// Set when the sample belongs to the inference phase
    pub inference: Option<InferenceSignal>,
}

/// Per-job progress synthesizer
#[derive(Debug, Clone)]
pub struct ProgressSynthesizer {
    inference_key: String,
    download_phases: u32,
    download_step: u8,
    cap: u8,
    horizon: Duration,
    /// Running floor; advances by one download step per phase key change
    floor: u8,
    last_key: Option<String>,
}

impl ProgressSynthesizer {
    #[must_use]
    pub fn new(config: &SegmentConfig) -> Self {
        Self {
            inference_key: config.inference_key.clone(),
            download_phases: config.download_phases.max(1),
            download_step: config.download_step(),
            cap: config.extrapolation_cap,
            horizon: config.extrapolation_horizon(),
            floor: 0,
            last_key: None,
        }
    }

    /// Current running floor
    #[must_use]
    pub fn floor(&self) -> u8 {
        self.floor
    }

    /// Feed one sample
    ///
    /// `resident` is whether the engine's model was already loaded when the
    /// sample arrived; resident engines contribute no download progress.
    pub fn observe(&mut self, sample: &ProgressSample, resident: bool) -> SampleOutcome {
        let Some(fraction) = sample.fraction() else {
            tracing::debug!(key = %sample.key, "Ignoring progress sample with zero total");
            return SampleOutcome::default();
        };

        let mut outcome = SampleOutcome::default();

        if !resident {
            if self
                .last_key
                .as_deref()
                .is_some_and(|last| last != sample.key)
            {
                self.floor = self.floor.saturating_add(self.download_step).min(self.cap);
            }
            let contribution = (100.0 * fraction / f64::from(self.download_phases)).floor() as u8;
            outcome.progress = Some(self.floor.saturating_add(contribution).min(self.cap));
            self.last_key = Some(sample.key.clone());
        }

        if sample.key == self.inference_key {
            outcome.inference = Some(if sample.is_complete() {
                InferenceSignal::Completed
            } else {
                InferenceSignal::Running
            });
        }

        outcome
    }

    /// Extrapolated percentage after `elapsed` time since the job started
    ///
    /// Moves linearly from the floor toward 100 over the configured horizon
    /// and never exceeds the cap.
    #[must_use]
    pub fn extrapolate(&self, elapsed: Duration) -> u8 {
        let floor = f64::from(self.floor);
        let ratio = elapsed.as_secs_f64() / self.horizon.as_secs_f64().max(f64::EPSILON);
        let value = floor + (100.0 - floor) * ratio;
        value.min(f64::from(self.cap)).floor() as u8
    }
}

/// Throttle decision for one offered sample
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Apply the sample now
    Apply(ProgressSample),
    /// The sample is held until `flush_at`; `schedule` is true when no flush
    /// is scheduled yet for this window
    Deferred { flush_at: Instant, schedule: bool },
}

/// Leading- and trailing-edge throttle
///
/// The first sample of a window is applied at once. Later samples in the
/// same window replace each other and the last one is applied when the
/// window closes, which starts a new window.
#[derive(Debug, Clone)]
pub struct Throttle {
    window: Duration,
    window_start: Option<Instant>,
    pending: Option<ProgressSample>,
}

impl Throttle {
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            window_start: None,
            pending: None,
        }
    }

    pub fn offer(&mut self, now: Instant, sample: ProgressSample) -> Admission {
        match self.window_start {
            Some(start) if now < start + self.window => {
                let schedule = self.pending.is_none();
                self.pending = Some(sample);
                Admission::Deferred {
                    flush_at: start + self.window,
                    schedule,
                }
            },
            _ => {
                self.window_start = Some(now);
                self.pending = None;
                Admission::Apply(sample)
            },
        }
    }

    /// Take the held sample once its window has closed
    ///
    /// Returns `None` before the window ends, even if a sample is held.
    pub fn flush(&mut self, now: Instant) -> Option<ProgressSample> {
        if self
            .window_start
            .is_some_and(|start| now < start + self.window)
        {
            return None;
        }
        let sample = self.pending.take()?;
        self.window_start = Some(now);
        Some(sample)
    }

    /// Take the held sample regardless of the window, for final delivery
    pub fn take_pending(&mut self) -> Option<ProgressSample> {
        self.pending.take()
    }

    /// Drop any held sample
    pub fn cancel(&mut self) {
        self.pending = None;
    }

    #[must_use]
    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }
}
