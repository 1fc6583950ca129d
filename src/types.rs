//! Core types for background removal jobs

use crate::error::EngineFailure;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque reference to an input image (an upload URL, object key or file path)
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageHandle(String);

impl ImageHandle {
    pub fn new<S: Into<String>>(handle: S) -> Self {
        Self(handle.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// An empty handle refers to no image
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl From<&str> for ImageHandle {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ImageHandle {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for ImageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque reference to the engine's processed output
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OutputHandle(String);

impl OutputHandle {
    pub fn new<S: Into<String>>(handle: S) -> Self {
        Self(handle.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl From<&str> for OutputHandle {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for OutputHandle {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for OutputHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A raw progress report from the removal engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSample {
    /// Sub-stage that produced the report (e.g. `fetch:/models/isnet`, `compute:inference`)
    pub key: String,
    pub current: u64,
    pub total: u64,
}

impl ProgressSample {
    pub fn new<S: Into<String>>(key: S, current: u64, total: u64) -> Self {
        Self {
            key: key.into(),
            current,
            total,
        }
    }

    /// Completed fraction in `[0, 1]`, or `None` when `total` is zero
    #[must_use]
    pub fn fraction(&self) -> Option<f64> {
        if self.total == 0 {
            return None;
        }
        Some((self.current.min(self.total) as f64) / (self.total as f64))
    }

    /// Whether the sample reports its sub-stage as finished
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.total > 0 && self.current >= self.total
    }
}

/// Coarse, UI-facing phase of a job
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Step {
    #[default]
    Idle,
    /// Engine is fetching and initializing its model
    Downloading,
    /// Engine is running inference
    Processing,
}

impl Step {
    /// Get a human-readable description of the step
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Step::Idle => "Waiting for an image",
            Step::Downloading => "Downloading model",
            Step::Processing => "Removing background",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Idle => write!(f, "idle"),
            Step::Downloading => write!(f, "downloading"),
            Step::Processing => write!(f, "processing"),
        }
    }
}

/// Externally observable snapshot of the current job
///
/// When `loading` returns to false after a job, exactly one of `result`
/// and `error` is set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobState {
    pub image: ImageHandle,
    pub error: Option<EngineFailure>,
    pub loading: bool,
    /// Percentage in `0..=100`, non-decreasing while `loading`
    pub progress: u8,
    pub step: Step,
    pub result: Option<OutputHandle>,
}

impl JobState {
    /// Fresh state for a job that is about to start on `image`
    #[must_use]
    pub fn started(image: ImageHandle, step: Step) -> Self {
        Self {
            image,
            loading: true,
            step,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn is_succeeded(&self) -> bool {
        !self.loading && self.result.is_some()
    }

    #[must_use]
    pub fn is_failed(&self) -> bool {
        !self.loading && self.error.is_some()
    }
}
