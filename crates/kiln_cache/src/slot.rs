//! Cache slots and their on-disk status markers.

use std::fmt;
use std::path::{Path, PathBuf};

use kiln_common::{ContentHash, RunId};
use kiln_config::IsolationMode;
use serde::{Deserialize, Serialize};

use crate::artifact::BackendArtifact;
use crate::error::CacheError;
use crate::key::CacheKey;
use crate::lock::LockRecord;

/// Name of the status marker within a slot directory.
pub(crate) const STATUS_FILE: &str = "status.json";

/// Name of the artifact manifest within a committed generation.
pub(crate) const ARTIFACT_FILE: &str = "artifact.json";

/// Lifecycle state of a cache slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotStatus {
    /// Nothing has been built in this slot yet.
    Empty,
    /// An owner holds the populate lock.
    Populating,
    /// A complete artifact tree is committed.
    Ready,
    /// The last populate failed.
    Failed,
}

impl SlotStatus {
    /// Returns `true` for `Ready` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ready | Self::Failed)
    }
}

impl fmt::Display for SlotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Empty => "empty",
            Self::Populating => "populating",
            Self::Ready => "ready",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Contents of `status.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusMarker {
    /// Recorded status.
    pub status: SlotStatus,
    /// Generation the status refers to.
    pub generation: u64,
    /// Run that recorded the status.
    pub run: RunId,
    /// Artifact checksum, for `Ready`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<ContentHash>,
    /// Failure reason, for `Failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Seconds since the Unix epoch when the marker was written.
    pub updated_at: u64,
}

impl StatusMarker {
    /// Loads the marker of a slot directory, returning `None` if it is
    /// missing or unreadable.
    pub(crate) fn load(slot_dir: &Path) -> Option<Self> {
        let content = std::fs::read_to_string(slot_dir.join(STATUS_FILE)).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// Atomically replaces the marker of a slot directory.
    pub(crate) fn save(&self, slot_dir: &Path) -> Result<(), CacheError> {
        let path = slot_dir.join(STATUS_FILE);
        let json = serde_json::to_vec_pretty(self)?;
        kiln_common::atomic_write(&path, &json).map_err(|e| CacheError::io(path, e))
    }
}

/// A cache slot as seen by one worker.
///
/// The slot is a snapshot of on-disk state; [`crate::CacheStore`] operations
/// update it as they move the slot through its lifecycle.
#[derive(Debug, Clone)]
pub struct CacheSlot {
    /// The key addressing this slot.
    pub key: CacheKey,
    /// Isolation mode the slot was acquired under.
    pub mode: IsolationMode,
    /// Slot directory.
    pub dir: PathBuf,
    /// Last observed status.
    pub status: SlotStatus,
    /// Current generation; `0` before the first populate.
    pub generation: u64,
    /// Run that recorded the current status, if any.
    pub run_id: Option<RunId>,
    /// Checksum of the committed artifact, when `Ready`.
    pub checksum: Option<ContentHash>,
    /// Failure reason, when `Failed`.
    pub reason: Option<String>,
    /// Lock observed while `Populating`.
    pub lock: Option<LockRecord>,
}

impl CacheSlot {
    /// Directory of generation `n` within this slot.
    pub fn generation_dir_for(&self, n: u64) -> PathBuf {
        self.dir.join(format!("gen-{n}"))
    }

    /// Directory of the current generation.
    pub fn generation_dir(&self) -> PathBuf {
        self.generation_dir_for(self.generation)
    }

    /// Staging directory of the current generation.
    pub fn staging_dir(&self) -> PathBuf {
        self.dir.join(format!("gen-{}.staging", self.generation))
    }

    /// Loads the committed artifact manifest of a `Ready` slot.
    pub fn artifact(&self) -> Option<BackendArtifact> {
        if self.status != SlotStatus::Ready {
            return None;
        }
        let content = std::fs::read_to_string(self.generation_dir().join(ARTIFACT_FILE)).ok()?;
        serde_json::from_str(&content).ok()
    }

    pub(crate) fn apply_marker(&mut self, marker: &StatusMarker) {
        self.status = marker.status;
        self.generation = marker.generation;
        self.run_id = Some(marker.run.clone());
        self.checksum = marker.checksum;
        self.reason = marker.reason.clone();
    }
}

/// A slot entry listed by [`crate::CacheStore::slots`].
#[derive(Debug, Clone, Serialize)]
pub struct SlotInfo {
    /// Slot directory name.
    pub key: String,
    /// Namespace the slot lives in.
    pub mode: IsolationMode,
    /// Owning worker namespace, for isolated slots.
    pub worker: Option<String>,
    /// Slot directory.
    pub dir: PathBuf,
    /// Status from the marker, or `Populating` while a lock is held.
    pub status: SlotStatus,
    /// Generation from the marker.
    pub generation: u64,
    /// Marker timestamp.
    pub updated_at: Option<u64>,
    /// Failure reason, for failed slots.
    pub reason: Option<String>,
    /// Current lock holder, if any.
    pub lock: Option<LockRecord>,
}
