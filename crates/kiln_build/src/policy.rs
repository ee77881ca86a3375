//! Orchestration policy derived from the project configuration.

use std::time::Duration;

use kiln_config::{ContentionMode, IsolationMode, ProjectConfig};

/// What a shared-mode build does when another worker holds its slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentionPolicy {
    /// Fail the build with `AlreadyPopulating`.
    FailFast,
    /// Wait up to `timeout` for the other worker, re-checking every `poll`.
    Wait {
        /// Upper bound on the wait.
        timeout: Duration,
        /// Re-check interval.
        poll: Duration,
    },
}

/// Knobs of one orchestrated run.
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    /// Slot isolation mode.
    pub mode: IsolationMode,
    /// Shared-slot contention policy.
    pub contention: ContentionPolicy,
    /// Attempts for store operations that fail with I/O races.
    pub store_attempts: u32,
    /// Delay before retrying a transient toolchain failure.
    pub transient_backoff: Duration,
    /// Parallel builds; `None` lets rayon pick.
    pub jobs: Option<usize>,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self::from_config(&ProjectConfig::default())
    }
}

impl OrchestratorOptions {
    /// Derives options from a loaded configuration.
    pub fn from_config(config: &ProjectConfig) -> Self {
        let contention = match config.cache.contention {
            ContentionMode::FailFast => ContentionPolicy::FailFast,
            ContentionMode::Wait => ContentionPolicy::Wait {
                timeout: Duration::from_secs(config.cache.wait_timeout_secs),
                poll: Duration::from_millis(config.cache.poll_interval_ms.max(1)),
            },
        };
        Self {
            mode: config.cache.mode,
            contention,
            store_attempts: config.retry.store_attempts.max(1),
            transient_backoff: Duration::from_millis(config.retry.backoff_ms),
            jobs: config.run.jobs,
        }
    }
}
