//! Removal engine abstraction
//!
//! The engine is the opaque collaborator that downloads the segmentation
//! model and runs inference. The orchestrator only sees its progress reports
//! and its final outcome.

use crate::{
    error::EngineFailure,
    types::{ImageHandle, OutputHandle, ProgressSample},
};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Callback through which an engine reports `(phase key, current, total)` samples
///
/// May be called any number of times, from any thread, in any timing
/// pattern. Cheap to clone.
#[derive(Clone)]
pub struct ProgressCallback {
    inner: Arc<dyn Fn(ProgressSample) + Send + Sync>,
}

impl ProgressCallback {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(ProgressSample) + Send + Sync + 'static,
    {
        Self { inner: Arc::new(f) }
    }

    /// A callback that discards every report
    #[must_use]
    pub fn noop() -> Self {
        Self::new(|_| {})
    }

    pub fn report(&self, key: &str, current: u64, total: u64) {
        (self.inner)(ProgressSample::new(key, current, total));
    }

    pub fn report_sample(&self, sample: ProgressSample) {
        (self.inner)(sample);
    }
}

impl fmt::Debug for ProgressCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressCallback").finish_non_exhaustive()
    }
}

/// Options handed to the engine for one invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineOptions {
    /// Location to load model assets from
    pub public_path: Option<String>,
    /// Model fetch revision, see [`EngineWarmState::revision_for_job`](crate::EngineWarmState::revision_for_job)
    pub revision: u64,
}

/// Trait for background removal engines
#[async_trait]
pub trait RemovalEngine: Send + Sync {
    /// Remove the background from `image`
    ///
    /// # Errors
    /// - Unsupported or unreadable image
    /// - Model download or initialization failures
    /// - Inference failures, including resource exhaustion
    async fn remove_background(
        &self,
        image: &ImageHandle,
        progress: ProgressCallback,
        options: &EngineOptions,
    ) -> Result<OutputHandle, EngineFailure>;

    /// Short name used in logs
    fn name(&self) -> &str {
        "engine"
    }
}

#[async_trait]
impl<E: RemovalEngine + ?Sized> RemovalEngine for Arc<E> {
    async fn remove_background(
        &self,
        image: &ImageHandle,
        progress: ProgressCallback,
        options: &EngineOptions,
    ) -> Result<OutputHandle, EngineFailure> {
        (**self).remove_background(image, progress, options).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
