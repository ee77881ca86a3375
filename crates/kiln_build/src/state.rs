//! Per-build states.

use std::fmt;

use serde::Serialize;

/// Where one (worker, key) build is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildState {
    /// Accepted, no slot yet.
    Requested,
    /// The slot was resolved in the store.
    SlotAcquired,
    /// This worker holds the populate lock and the toolchain is running.
    Populating,
    /// Built and committed by this worker.
    Ready,
    /// The build failed; see the outcome's error.
    Failed,
    /// A `Ready` slot was reused without building.
    Skipped,
}

impl BuildState {
    /// Returns `true` for states a build ends in.
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Ready | Self::Failed | Self::Skipped)
    }
}

impl fmt::Display for BuildState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Requested => "requested",
            Self::SlotAcquired => "slot-acquired",
            Self::Populating => "populating",
            Self::Ready => "ready",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        f.write_str(s)
    }
}
