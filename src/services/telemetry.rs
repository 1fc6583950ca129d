//! Job lifecycle telemetry
//!
//! This module separates telemetry concerns from job orchestration, allowing
//! different frontends to forward events wherever they like. Emission is
//! fire-and-forget: a sink can never affect the outcome of a job.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io::Write;
use std::sync::Mutex;
use std::time::Duration;

/// Telemetry events with a fixed vocabulary
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelemetryEvent {
    /// A background removal job was started
    BackgroundRemove,
    /// A background removal job produced a result
    BackgroundRemoveSuccess { duration: Duration },
    /// A background removal job failed
    BackgroundRemoveFail { duration: Duration },
    /// The welcome screen became visible
    WelcomeExposed,
}

impl TelemetryEvent {
    /// Interaction kind (`click` or `expose`)
    #[must_use]
    pub fn action(&self) -> &'static str {
        match self {
            Self::WelcomeExposed => "expose",
            _ => "click",
        }
    }

    /// Object the interaction refers to
    #[must_use]
    pub fn object(&self) -> &'static str {
        match self {
            Self::BackgroundRemove => "background_remove",
            Self::BackgroundRemoveSuccess { .. } => "background_remove_success",
            Self::BackgroundRemoveFail { .. } => "background_remove_fail",
            Self::WelcomeExposed => "welcome",
        }
    }

    /// Full event name, e.g. `click:background_remove_success`
    #[must_use]
    pub fn name(&self) -> String {
        format!("{}:{}", self.action(), self.object())
    }

    /// Job duration for terminal events
    #[must_use]
    pub fn duration(&self) -> Option<Duration> {
        match self {
            Self::BackgroundRemoveSuccess { duration } | Self::BackgroundRemoveFail { duration } => {
                Some(*duration)
            },
            _ => None,
        }
    }
}

/// Trait for receiving job lifecycle telemetry
pub trait TelemetrySink: Send + Sync {
    /// Record an event; must not block for long or panic
    fn emit(&self, event: &TelemetryEvent);
}

/// Telemetry sink that discards all events
pub struct NoOpTelemetry;

impl TelemetrySink for NoOpTelemetry {
    fn emit(&self, _event: &TelemetryEvent) {}
}

/// Telemetry sink that logs events through `tracing`
pub struct TracingTelemetry;

impl TelemetrySink for TracingTelemetry {
    fn emit(&self, event: &TelemetryEvent) {
        match event.duration() {
            Some(duration) => tracing::info!(
                event = %event.name(),
                duration_ms = duration.as_millis() as u64,
                "📈 Telemetry"
            ),
            None => tracing::info!(event = %event.name(), "📈 Telemetry"),
        }
    }
}

#[derive(Serialize)]
struct TelemetryRecord<'a> {
    timestamp: DateTime<Utc>,
    action: &'a str,
    object: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration_ms: Option<u64>,
}

/// Telemetry sink that writes one JSON object per line
pub struct JsonTelemetry<W: Write + Send> {
    writer: Mutex<W>,
}

impl<W: Write + Send> JsonTelemetry<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    /// Recover the underlying writer
    pub fn into_inner(self) -> W {
        self.writer
            .into_inner()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl JsonTelemetry<std::io::Stdout> {
    /// JSON lines on stdout
    #[must_use]
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> TelemetrySink for JsonTelemetry<W> {
    fn emit(&self, event: &TelemetryEvent) {
        let record = TelemetryRecord {
            timestamp: Utc::now(),
            action: event.action(),
            object: event.object(),
            duration_ms: event.duration().map(|d| d.as_millis() as u64),
        };
        let Ok(mut writer) = self.writer.lock() else {
            return;
        };
        let written = serde_json::to_writer(&mut *writer, &record)
            .map_err(std::io::Error::from)
            .and_then(|()| writeln!(writer))
            .and_then(|()| writer.flush());
        if let Err(e) = written {
            tracing::debug!(error = %e, "Dropping telemetry event");
        }
    }
}

/// Telemetry output selection for frontends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TelemetryKind {
    /// Discard events
    #[default]
    None,
    /// Log events
    Log,
    /// JSON lines on stdout
    Json,
}

/// Create the telemetry sink for the given selection
#[must_use]
pub fn create_telemetry_sink(kind: TelemetryKind) -> Box<dyn TelemetrySink> {
    match kind {
        TelemetryKind::None => Box::new(NoOpTelemetry),
        TelemetryKind::Log => Box::new(TracingTelemetry),
        TelemetryKind::Json => Box::new(JsonTelemetry::stdout()),
    }
}
