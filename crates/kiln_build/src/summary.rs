//! Run summaries.

use std::fmt::Write as _;
use std::path::PathBuf;

use kiln_cache::CacheKey;
use kiln_config::BackendKind;
use serde::Serialize;

use crate::state::BuildState;

/// Result of one build request.
#[derive(Debug, Clone, Serialize)]
pub struct BuildOutcome {
    /// Request label.
    pub label: String,
    /// Kernel name.
    pub kernel: String,
    /// Target backend.
    pub backend: BackendKind,
    /// Cache key, once computed.
    pub key: Option<CacheKey>,
    /// Final state.
    pub state: BuildState,
    /// Slot generation the outcome refers to.
    pub generation: u64,
    /// Toolchain runs attempted.
    pub attempts: u32,
    /// Slot directory, once acquired.
    pub slot_dir: Option<PathBuf>,
    /// Failure description.
    pub error: Option<String>,
    /// Toolchain log tail of a failed build.
    pub log_tail: Vec<String>,
}

impl BuildOutcome {
    /// Returns `true` if the build failed.
    pub fn is_failure(&self) -> bool {
        self.state == BuildState::Failed
    }
}

/// Outcomes of every request of a run, in request order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    /// One outcome per request.
    pub outcomes: Vec<BuildOutcome>,
    /// Whether the run was cancelled.
    pub cancelled: bool,
}

impl RunSummary {
    /// Number of outcomes in `state`.
    pub fn count(&self, state: BuildState) -> usize {
        self.outcomes.iter().filter(|o| o.state == state).count()
    }

    /// Failed outcomes.
    pub fn failures(&self) -> impl Iterator<Item = &BuildOutcome> {
        self.outcomes.iter().filter(|o| o.is_failure())
    }

    /// Process exit code: `0` when every requested build is ready or was
    /// reused, `1` otherwise.
    pub fn exit_code(&self) -> i32 {
        if self.cancelled || self.failures().next().is_some() {
            1
        } else {
            0
        }
    }

    /// Human-readable report: one line per failure with its log tail, then
    /// the totals.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for failure in self.failures() {
            let key = failure.key.map(|k| k.to_string()).unwrap_or_else(|| "-".to_string());
            let _ = writeln!(
                out,
                "FAILED {} [{}] key={} gen={}: {}",
                failure.label,
                failure.backend,
                key,
                failure.generation,
                failure.error.as_deref().unwrap_or("unknown error")
            );
            for line in &failure.log_tail {
                let _ = writeln!(out, "    | {line}");
            }
        }
        let _ = writeln!(
            out,
            "{} built, {} reused, {} failed{}",
            self.count(BuildState::Ready),
            self.count(BuildState::Skipped),
            self.count(BuildState::Failed),
            if self.cancelled { " (cancelled)" } else { "" }
        );
        out
    }
}
