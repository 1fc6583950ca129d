//! Engine warm-up tracking shared across jobs
//!
//! Once the removal engine has finished downloading and initializing its
//! model, later jobs can skip the `Downloading` step. The flag lives in an
//! explicit, cloneable handle rather than a global so that whoever composes
//! the orchestrators decides its scope (one per process, one per test).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
struct WarmInner {
    model_resident: AtomicBool,
    fetch_revision: AtomicU64,
}

/// Shared handle to the engine's warm-up state
///
/// Clones refer to the same state.
#[derive(Debug, Clone, Default)]
pub struct EngineWarmState {
    inner: Arc<WarmInner>,
}

impl EngineWarmState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the engine's model is already loaded
    #[must_use]
    pub fn is_resident(&self) -> bool {
        self.inner.model_resident.load(Ordering::Acquire)
    }

    /// Record that the engine reached its inference phase
    ///
    /// Returns `true` only for the call that performed the false→true
    /// transition. The flag never reverts.
    pub fn mark_resident(&self) -> bool {
        let transitioned = !self.inner.model_resident.swap(true, Ordering::AcqRel);
        if transitioned {
            tracing::info!("Removal engine model is resident; later jobs skip the download step");
        }
        transitioned
    }

    /// Revision the engine should use when fetching model assets
    ///
    /// Bumped for every job that starts while the model is not resident so a
    /// retried download is not served a stale partial fetch; reused unchanged
    /// once the model is resident.
    #[must_use]
    pub fn revision_for_job(&self) -> u64 {
        if self.is_resident() {
            self.inner.fetch_revision.load(Ordering::Acquire)
        } else {
            self.inner.fetch_revision.fetch_add(1, Ordering::AcqRel) + 1
        }
    }

    #[must_use]
    pub fn fetch_revision(&self) -> u64 {
        self.inner.fetch_revision.load(Ordering::Acquire)
    }
}
