//! Discovery of shards and expectation markers below a run root.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::error::{ReportError, ReportWarning};
use crate::shard::{read_shard, shard_id_from_file, shard_id_from_marker, CoverageShard};

/// Everything found below a run root.
#[derive(Debug, Default)]
pub struct Discovery {
    /// Shards that parsed.
    pub shards: Vec<CoverageShard>,
    /// Ids of all registered shards, plus the ids named by shard files that
    /// could not be used.
    pub expected: BTreeSet<String>,
    /// Shard files that could not be used.
    pub warnings: Vec<ReportWarning>,
}

/// Walks `root` (slot trees included) for shard files and expectation
/// markers.
///
/// A shard that cannot be read, or whose recorded id disagrees with its file
/// name, is skipped with a warning. The id in its file name is still
/// expected, so it counts as missing even without a marker. A missing root
/// yields an empty discovery.
pub fn discover(root: &Path) -> Result<Discovery, ReportError> {
    let mut discovery = Discovery::default();
    if !root.is_dir() {
        tracing::debug!(root = %root.display(), "no run root, nothing to aggregate");
        return Ok(discovery);
    }
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for path in sorted_entries(&dir)? {
            let Ok(meta) = std::fs::symlink_metadata(&path) else {
                continue;
            };
            if meta.is_dir() {
                pending.push(path);
                continue;
            }
            if !meta.is_file() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if let Some(id) = shard_id_from_marker(name) {
                discovery.expected.insert(id.to_string());
            } else if let Some(id) = shard_id_from_file(name) {
                match read_shard(&path) {
                    Ok(shard) if shard.shard_id == id => discovery.shards.push(shard),
                    Ok(shard) => discovery.skip(
                        id,
                        path.clone(),
                        format!("records id '{}' but is named for '{id}'", shard.shard_id),
                    ),
                    Err(reason) => discovery.skip(id, path.clone(), reason),
                }
            }
        }
    }
    tracing::debug!(
        shards = discovery.shards.len(),
        registered = discovery.expected.len(),
        "shard discovery finished"
    );
    Ok(discovery)
}

impl Discovery {
    fn skip(&mut self, id: &str, path: PathBuf, reason: String) {
        self.expected.insert(id.to_string());
        let warning = ReportWarning::UnreadableShard { path, reason };
        tracing::warn!("{warning}");
        self.warnings.push(warning);
    }
}

fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>, ReportError> {
    let entries = std::fs::read_dir(dir).map_err(|e| ReportError::io(dir, e))?;
    let mut paths = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| ReportError::io(dir, e))?;
        paths.push(entry.path());
    }
    paths.sort();
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shard::ShardWriter;
    use kiln_common::WorkerId;

    #[test]
    fn finds_shards_in_nested_slot_trees() {
        let root = tempfile::tempdir().unwrap();
        let nested = root.path().join("shared").join("ab").join("gen-1");
        for dir in [root.path().to_path_buf(), nested] {
            let writer = ShardWriter::new(&dir, &WorkerId::new("gw"));
            writer.register().unwrap();
            writer.write(&writer.shard()).unwrap();
        }
        let found = discover(root.path()).unwrap();
        assert_eq!(found.shards.len(), 2);
        assert_eq!(found.expected.len(), 2);
        assert!(found.warnings.is_empty());
    }

    #[test]
    fn truncated_shard_is_skipped_with_warning() {
        let root = tempfile::tempdir().unwrap();
        std::fs::write(root.path().join("coverage.gw9.json"), b"{\"shard_id\": \"gw").unwrap();
        std::fs::write(root.path().join("gw9.expected"), b"gw9").unwrap();
        let found = discover(root.path()).unwrap();
        assert!(found.shards.is_empty());
        assert!(found.expected.contains("gw9"));
        assert_eq!(found.warnings.len(), 1);
    }

    #[test]
    fn unregistered_torn_shard_is_still_expected() {
        let root = tempfile::tempdir().unwrap();
        std::fs::write(root.path().join("coverage.gw1.json"), b"{\"shard_id\":").unwrap();
        let found = discover(root.path()).unwrap();
        assert!(found.shards.is_empty());
        assert!(found.expected.contains("gw1"));
        assert_eq!(found.warnings.len(), 1);
    }

    #[test]
    fn renamed_shard_is_rejected() {
        let root = tempfile::tempdir().unwrap();
        let writer = ShardWriter::new(root.path(), &WorkerId::new("gw0"));
        let path = writer.write(&writer.shard()).unwrap();
        std::fs::rename(&path, root.path().join("coverage.other.json")).unwrap();
        let found = discover(root.path()).unwrap();
        assert!(found.shards.is_empty());
        assert!(matches!(found.warnings[0], ReportWarning::UnreadableShard { .. }));
    }

    #[test]
    fn missing_root_is_empty() {
        let root = tempfile::tempdir().unwrap();
        let found = discover(&root.path().join("absent")).unwrap();
        assert!(found.shards.is_empty());
    }
}
