//! Lowered kernel programs handed to the adapters.

use std::path::Path;

use kiln_cache::KernelIdentity;

use crate::error::BackendError;

/// One lowered source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceUnit {
    /// File name, relative to the staging `src/` directory.
    pub file_name: String,
    /// Source text.
    pub code: String,
}

impl SourceUnit {
    /// Creates a source unit.
    pub fn new(file_name: &str, code: &str) -> Self {
        Self {
            file_name: file_name.to_string(),
            code: code.to_string(),
        }
    }
}

/// A kernel ready for code generation: its identity plus lowered sources.
#[derive(Debug, Clone)]
pub struct KernelIr {
    /// Identity used for cache addressing. Carries the top-level function.
    pub identity: KernelIdentity,
    /// Lowered sources, in compilation order.
    pub sources: Vec<SourceUnit>,
}

impl KernelIr {
    /// Creates a kernel and derives its identity from the sources.
    pub fn new(name: &str, revision: &str, sources: Vec<SourceUnit>) -> Self {
        let identity = KernelIdentity::from_sources(
            name,
            revision,
            sources.iter().map(|u| (u.file_name.as_str(), u.code.as_str())),
        );
        Self { identity, sources }
    }

    /// Overrides the top-level function name. The cache key follows it.
    pub fn with_top(mut self, top: &str) -> Self {
        self.identity = self.identity.with_top(top);
        self
    }

    /// Reads source files from disk. Relative paths resolve against `base`.
    pub fn load<P: AsRef<Path>>(
        name: &str,
        revision: &str,
        base: &Path,
        paths: &[P],
    ) -> Result<Self, BackendError> {
        let mut sources = Vec::with_capacity(paths.len());
        for path in paths {
            let path = base.join(path.as_ref());
            let code = std::fs::read_to_string(&path).map_err(|e| BackendError::io(&path, e))?;
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| format!("{name}.cpp"));
            sources.push(SourceUnit { file_name, code });
        }
        Ok(Self::new(name, revision, sources))
    }

    /// Kernel name.
    pub fn name(&self) -> &str {
        &self.identity.name
    }

    /// Top-level function; defaults to the kernel name.
    pub fn top(&self) -> &str {
        &self.identity.top
    }
}
