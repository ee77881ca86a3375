//! Project resolution shared by every command.
//!
//! Finds the project root, loads `kiln.toml` with its environment overlay,
//! and opens the cache store.

use std::path::{Path, PathBuf};

use kiln_cache::CacheStore;
use kiln_common::{RunId, WorkerId};
use kiln_config::{apply_process_env, load_config, load_config_from_str, ProjectConfig, CONFIG_FILE};

use crate::GlobalArgs;

/// Revision used when neither `run.revision` nor `KILN_REVISION` is set.
pub const DEFAULT_REVISION: &str = "unversioned";

/// A loaded project.
#[derive(Debug)]
pub struct Project {
    /// Directory containing `kiln.toml`.
    pub root: PathBuf,
    /// Configuration with the environment applied.
    pub config: ProjectConfig,
}

impl Project {
    /// Absolute cache root.
    pub fn cache_root(&self) -> PathBuf {
        resolve(&self.root, &self.config.cache.root)
    }

    /// Kernel revision of this run.
    pub fn revision(&self) -> &str {
        self.config.run.revision.as_deref().unwrap_or(DEFAULT_REVISION)
    }

    /// Opens the cache store for one worker of a run.
    pub fn open_store(
        &self,
        worker: &str,
        run: Option<&str>,
    ) -> Result<CacheStore, Box<dyn std::error::Error>> {
        let run = run.map(RunId::new).unwrap_or_else(RunId::generate);
        let store = CacheStore::open(self.cache_root(), WorkerId::new(worker), run)?
            .with_stale_after(self.config.cache.stale_after());
        tracing::debug!(root = %store.root().display(), owner = %store.owner(), "cache store opened");
        Ok(store)
    }
}

/// Joins `path` onto `base` unless it is already absolute.
pub fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// Walks up from `start` looking for the nearest directory containing
/// `kiln.toml`.
pub fn find_project_root(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();
    loop {
        if current.join(CONFIG_FILE).exists() {
            return Some(current);
        }
        if !current.pop() {
            return None;
        }
    }
}

/// Loads the project selected by the global flags.
///
/// `--config` may name a file or a directory. Without it, the nearest
/// `kiln.toml` above the current directory is used; with none found, the
/// current directory and default settings are.
pub fn load_project(global: &GlobalArgs) -> Result<Project, Box<dyn std::error::Error>> {
    let cwd = std::env::current_dir()?;
    let (root, mut config) = match global.config {
        Some(ref config_path) => {
            let path = resolve(&cwd, Path::new(config_path));
            if path.is_file() {
                let content = std::fs::read_to_string(&path)
                    .map_err(|e| format!("cannot read {}: {e}", path.display()))?;
                let root = path
                    .parent()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| cwd.clone());
                (root, load_config_from_str(&content)?)
            } else if path.is_dir() {
                let config = load_config(&path)?;
                (path, config)
            } else {
                return Err(format!("config path not found: {}", path.display()).into());
            }
        }
        None => {
            let root = find_project_root(&cwd).unwrap_or(cwd);
            let config = load_config(&root)?;
            (root, config)
        }
    };
    apply_process_env(&mut config)?;
    Ok(Project { root, config })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn global(config: Option<String>) -> GlobalArgs {
        GlobalArgs {
            quiet: true,
            verbose: false,
            config,
        }
    }

    #[test]
    fn finds_root_from_subdirectory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "").unwrap();
        let nested = dir.path().join("kernels").join("blas");
        std::fs::create_dir_all(&nested).unwrap();
        assert_eq!(find_project_root(&nested).unwrap(), dir.path());
    }

    #[test]
    fn explicit_config_file_sets_root() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("ci.toml");
        std::fs::write(&file, "[cache]\nroot = \"cache\"\n").unwrap();
        let project = load_project(&global(Some(file.display().to_string()))).unwrap();
        assert_eq!(project.root, dir.path());
        assert_eq!(project.cache_root(), dir.path().join("cache"));
    }

    #[test]
    fn missing_config_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml").display().to_string();
        assert!(load_project(&global(Some(missing))).is_err());
    }

    #[test]
    fn absolute_paths_are_kept() {
        assert_eq!(resolve(Path::new("/a"), Path::new("/b")), PathBuf::from("/b"));
        assert_eq!(resolve(Path::new("/a"), Path::new("b")), PathBuf::from("/a/b"));
    }
}
