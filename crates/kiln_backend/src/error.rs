//! Error types for backend code generation and toolchain runs.

use std::path::PathBuf;
use std::time::Duration;

/// Errors produced while generating sources or running a toolchain.
///
/// `tool` names the backend (`cpu`, `fpga`, ...) or helper command that failed.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The toolchain exited non-zero or did not produce its success artifact.
    #[error("{tool} toolchain failed: {reason}")]
    ToolchainFailure {
        /// Backend or tool name.
        tool: String,
        /// Short description of the failure.
        reason: String,
        /// Exit code, when the process exited normally.
        exit_code: Option<i32>,
        /// Last lines of the toolchain log.
        log_tail: Vec<String>,
    },

    /// The toolchain failed with a signature known to be transient.
    #[error("{tool} toolchain failed transiently: {reason}")]
    TransientToolchainFailure {
        /// Backend or tool name.
        tool: String,
        /// Short description of the failure.
        reason: String,
        /// Exit code, when the process exited normally.
        exit_code: Option<i32>,
        /// Last lines of the toolchain log.
        log_tail: Vec<String>,
    },

    /// The toolchain exceeded its timeout class bound and was killed.
    #[error("{tool} toolchain timed out after {}s", .limit.as_secs())]
    Timeout {
        /// Backend or tool name.
        tool: String,
        /// The bound that was exceeded.
        limit: Duration,
        /// Last lines of the toolchain log.
        log_tail: Vec<String>,
    },

    /// The run was cancelled while the toolchain was running.
    #[error("{tool} toolchain cancelled")]
    Cancelled {
        /// Backend or tool name.
        tool: String,
    },

    /// The toolchain executable could not be started.
    #[error("failed to start {}: {source}", .program.display())]
    Spawn {
        /// Program that failed to start.
        program: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// A transient-failure signature is not a valid regular expression.
    #[error("invalid transient failure pattern '{pattern}': {reason}")]
    InvalidPattern {
        /// The offending pattern.
        pattern: String,
        /// Why it failed to compile.
        reason: String,
    },

    /// The adapter could not write or inspect staging files.
    #[error("backend I/O error at {}: {source}", .path.display())]
    Io {
        /// The path that caused the error.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Hashing the produced tree failed.
    #[error(transparent)]
    Cache(#[from] kiln_cache::CacheError),
}

impl BackendError {
    /// Returns `true` for failures worth a single retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientToolchainFailure { .. })
    }

    /// Returns the toolchain log tail carried by the error, if any.
    pub fn log_tail(&self) -> &[String] {
        match self {
            Self::ToolchainFailure { log_tail, .. }
            | Self::TransientToolchainFailure { log_tail, .. }
            | Self::Timeout { log_tail, .. } => log_tail,
            _ => &[],
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
