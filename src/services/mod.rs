//! Frontend-facing services

pub mod telemetry;

pub use telemetry::{
    create_telemetry_sink, JsonTelemetry, NoOpTelemetry, TelemetryEvent, TelemetryKind,
    TelemetrySink, TracingTelemetry,
};
