//! Per-worker coverage shards and their on-disk naming.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use kiln_common::{atomic_write, ContentHash, ContentHasher, WorkerId};
use serde::{Deserialize, Serialize};

use crate::error::ReportError;

/// Hit counts per line number.
pub type LineHits = BTreeMap<u32, u64>;

/// File-name prefix of shard files: `coverage.<shard_id>.json`.
pub const SHARD_PREFIX: &str = "coverage.";
/// File-name suffix of shard files.
pub const SHARD_SUFFIX: &str = ".json";
/// File-name suffix of expectation markers: `<shard_id>.expected`.
pub const EXPECTED_SUFFIX: &str = ".expected";

/// One worker's partial coverage record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageShard {
    /// Unique id of the shard within the run.
    pub shard_id: String,
    /// The worker that wrote it.
    pub worker: String,
    /// Line hits per source file.
    pub lines: BTreeMap<String, LineHits>,
}

impl CoverageShard {
    /// Creates an empty shard.
    pub fn new(shard_id: impl Into<String>, worker: impl Into<String>) -> Self {
        Self {
            shard_id: shard_id.into(),
            worker: worker.into(),
            lines: BTreeMap::new(),
        }
    }

    /// Adds `hits` executions of `line` in `file`.
    pub fn record(&mut self, file: &str, line: u32, hits: u64) -> &mut Self {
        let entry = self
            .lines
            .entry(file.to_string())
            .or_default()
            .entry(line)
            .or_insert(0);
        *entry = entry.saturating_add(hits);
        self
    }

    /// Hash over the shard's canonical content, used to order shards that
    /// share an id.
    pub fn content_hash(&self) -> ContentHash {
        let mut hasher = ContentHasher::new();
        hasher.str_part(&self.shard_id).str_part(&self.worker);
        for (file, hits) in &self.lines {
            hasher.str_part(file);
            for (line, count) in hits {
                hasher.part(&line.to_le_bytes()).part(&count.to_le_bytes());
            }
        }
        hasher.finish()
    }

    /// Shard file name for `shard_id`.
    pub fn file_name(shard_id: &str) -> String {
        format!("{SHARD_PREFIX}{shard_id}{SHARD_SUFFIX}")
    }
}

/// Writes one worker's shard and expectation marker into a run directory.
#[derive(Debug, Clone)]
pub struct ShardWriter {
    dir: PathBuf,
    shard_id: String,
    worker: String,
}

impl ShardWriter {
    /// Creates a writer for `worker`. The worker id is unique per process
    /// and nonce, so it doubles as the shard id.
    pub fn new(dir: impl Into<PathBuf>, worker: &WorkerId) -> Self {
        Self {
            dir: dir.into(),
            shard_id: worker.as_str().to_string(),
            worker: worker.as_str().to_string(),
        }
    }

    /// The shard id this writer writes.
    pub fn shard_id(&self) -> &str {
        &self.shard_id
    }

    /// An empty shard carrying this writer's identity.
    pub fn shard(&self) -> CoverageShard {
        CoverageShard::new(&self.shard_id, &self.worker)
    }

    /// Path of the shard file.
    pub fn shard_path(&self) -> PathBuf {
        self.dir.join(CoverageShard::file_name(&self.shard_id))
    }

    /// Records that this worker will produce a shard. Called at worker start
    /// so a crash before [`ShardWriter::write`] shows up as a missing shard.
    pub fn register(&self) -> Result<PathBuf, ReportError> {
        let path = self.dir.join(format!("{}{EXPECTED_SUFFIX}", self.shard_id));
        atomic_write(&path, self.worker.as_bytes()).map_err(|e| ReportError::io(&path, e))?;
        Ok(path)
    }

    /// Writes `shard` atomically under this writer's shard id.
    pub fn write(&self, shard: &CoverageShard) -> Result<PathBuf, ReportError> {
        let mut shard = shard.clone();
        shard.shard_id.clone_from(&self.shard_id);
        let path = self.shard_path();
        let data = serde_json::to_vec_pretty(&shard)?;
        atomic_write(&path, &data).map_err(|e| ReportError::io(&path, e))?;
        tracing::debug!(shard = %self.shard_id, path = %path.display(), "coverage shard written");
        Ok(path)
    }
}

/// Extracts the shard id from a shard file name.
pub(crate) fn shard_id_from_file(name: &str) -> Option<&str> {
    name.strip_prefix(SHARD_PREFIX)?
        .strip_suffix(SHARD_SUFFIX)
        .filter(|id| !id.is_empty())
}

/// Extracts the shard id from an expectation marker name.
pub(crate) fn shard_id_from_marker(name: &str) -> Option<&str> {
    name.strip_suffix(EXPECTED_SUFFIX).filter(|id| !id.is_empty())
}

/// Reads a shard file.
pub(crate) fn read_shard(path: &Path) -> Result<CoverageShard, String> {
    let data = std::fs::read(path).map_err(|e| e.to_string())?;
    serde_json::from_slice(&data).map_err(|e| e.to_string())
}
