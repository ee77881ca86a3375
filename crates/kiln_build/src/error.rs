//! Errors that abort a whole run rather than a single build.

/// Run-level orchestration errors.
///
/// Per-build failures never surface here; they are recorded as failed
/// outcomes in the [`crate::RunSummary`].
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// The worker thread pool could not be created.
    #[error("failed to start build workers: {reason}")]
    ThreadPool {
        /// Description of the failure.
        reason: String,
    },

    /// The transient-failure signatures are invalid.
    #[error(transparent)]
    Backend(#[from] kiln_backend::BackendError),

    /// Releasing the run's slots after cancellation failed.
    #[error(transparent)]
    Cache(#[from] kiln_cache::CacheError),
}
