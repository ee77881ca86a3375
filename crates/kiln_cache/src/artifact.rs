//! Backend artifact manifests and staging-tree hashing.

use std::collections::BTreeMap;
use std::path::Path;

use kiln_common::{ContentHash, ContentHasher};
use kiln_config::BackendKind;
use serde::{Deserialize, Serialize};

use crate::error::CacheError;
use crate::slot::ARTIFACT_FILE;

/// Files excluded from the artifact file map.
///
/// The toolchain log carries timestamps and host paths, so two identical
/// builds would never agree on it.
const UNHASHED_FILES: &[&str] = &["toolchain.log", ARTIFACT_FILE];

/// What a backend produced in a slot's staging directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendArtifact {
    /// Backend that produced the artifact.
    pub backend: BackendKind,
    /// Content hash of every produced file, keyed by `/`-separated path
    /// relative to the generation directory.
    pub files: BTreeMap<String, ContentHash>,
    /// Relative path of the success artifact (library or exported IP).
    pub success_artifact: String,
    /// Toolchain exit code.
    pub exit_code: i32,
    /// Last lines of the toolchain log.
    #[serde(default)]
    pub log_tail: Vec<String>,
}

impl BackendArtifact {
    /// Deterministic checksum over backend, file hashes, success artifact and
    /// exit code. The log tail is not part of the checksum.
    pub fn checksum(&self) -> ContentHash {
        let mut h = ContentHasher::new();
        h.str_part(self.backend.name())
            .str_part(&self.success_artifact)
            .part(&self.exit_code.to_le_bytes())
            .part(&(self.files.len() as u64).to_le_bytes());
        for (path, hash) in &self.files {
            h.str_part(path).part(hash.as_bytes());
        }
        h.finish()
    }

    /// Writes `artifact.json` into `dir`.
    pub(crate) fn save(&self, dir: &Path) -> Result<(), CacheError> {
        let path = dir.join(ARTIFACT_FILE);
        let json = serde_json::to_vec_pretty(self)?;
        kiln_common::atomic_write(&path, &json).map_err(|e| CacheError::io(path, e))
    }
}

/// Hashes every regular file below `root`, keyed by relative `/`-separated
/// path. The toolchain log and artifact manifest are skipped.
pub fn hash_tree(root: &Path) -> Result<BTreeMap<String, ContentHash>, CacheError> {
    let mut files = BTreeMap::new();
    walk(root, root, &mut files)?;
    Ok(files)
}

fn walk(
    root: &Path,
    dir: &Path,
    files: &mut BTreeMap<String, ContentHash>,
) -> Result<(), CacheError> {
    let entries = std::fs::read_dir(dir).map_err(|e| CacheError::io(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| CacheError::io(dir, e))?;
        let path = entry.path();
        let file_type = entry.file_type().map_err(|e| CacheError::io(&path, e))?;
        if file_type.is_dir() {
            walk(root, &path, files)?;
            continue;
        }
        if !file_type.is_file() {
            continue;
        }
        let Ok(rel) = path.strip_prefix(root) else {
            continue;
        };
        let rel = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if UNHASHED_FILES.contains(&rel.as_str()) {
            continue;
        }
        let content = std::fs::read(&path).map_err(|e| CacheError::io(&path, e))?;
        files.insert(rel, ContentHash::from_bytes(&content));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact(files: BTreeMap<String, ContentHash>) -> BackendArtifact {
        BackendArtifact {
            backend: BackendKind::Cpu,
            files,
            success_artifact: "libgemm.so".to_string(),
            exit_code: 0,
            log_tail: vec!["linking".to_string()],
        }
    }

    #[test]
    fn hash_tree_uses_relative_paths_and_skips_log() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/gemm.cpp"), "void gemm() {}").unwrap();
        std::fs::write(dir.path().join("libgemm.so"), b"\x7fELF").unwrap();
        std::fs::write(dir.path().join("toolchain.log"), "c++ -O3").unwrap();

        let files = hash_tree(dir.path()).unwrap();
        let names: Vec<_> = files.keys().cloned().collect();
        assert_eq!(names, vec!["libgemm.so", "src/gemm.cpp"]);
        assert_eq!(
            files["src/gemm.cpp"],
            ContentHash::from_bytes(b"void gemm() {}")
        );
    }

    #[test]
    fn checksum_ignores_log_tail() {
        let files = BTreeMap::from([("a.so".to_string(), ContentHash::from_bytes(b"a"))]);
        let a = artifact(files.clone());
        let mut b = artifact(files);
        b.log_tail = vec!["different".to_string()];
        assert_eq!(a.checksum(), b.checksum());
    }

    #[test]
    fn checksum_tracks_file_contents() {
        let a = artifact(BTreeMap::from([(
            "a.so".to_string(),
            ContentHash::from_bytes(b"a"),
        )]));
        let b = artifact(BTreeMap::from([(
            "a.so".to_string(),
            ContentHash::from_bytes(b"b"),
        )]));
        assert_ne!(a.checksum(), b.checksum());
    }

    #[test]
    fn missing_root_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = hash_tree(&dir.path().join("nope")).unwrap_err();
        assert!(matches!(err, CacheError::Io { .. }));
    }
}
