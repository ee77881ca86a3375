//! Error and warning types for report aggregation.

use std::path::PathBuf;

/// Errors that stop aggregation.
///
/// Missing or damaged shards are never errors; they surface as
/// [`ReportWarning`]s.
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    /// A filesystem operation failed.
    #[error("report I/O error at {path}: {source}")]
    Io {
        /// The path involved.
        path: PathBuf,
        /// The underlying error.
        source: std::io::Error,
    },

    /// The report could not be serialized.
    #[error("serialization error: {reason}")]
    Serialization {
        /// What went wrong.
        reason: String,
    },
}

impl ReportError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<serde_json::Error> for ReportError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization {
            reason: e.to_string(),
        }
    }
}

/// Non-fatal problems noticed while producing a report.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReportWarning {
    /// Fewer shards were found than expected.
    #[error("partial aggregation: {found}/{expected} shards found")]
    PartialAggregation {
        /// Distinct shards merged.
        found: usize,
        /// Shards expected.
        expected: usize,
        /// Registered shard ids with no readable shard.
        missing: Vec<String>,
    },

    /// A shard file exists but could not be read or parsed.
    #[error("skipping unreadable shard {path}: {reason}")]
    UnreadableShard {
        /// The shard file.
        path: PathBuf,
        /// Why it was skipped.
        reason: String,
    },

    /// The reporting endpoint could not be reached.
    #[error("reporting endpoint {endpoint} unreachable: {reason}")]
    EndpointUnreachable {
        /// The configured endpoint.
        endpoint: String,
        /// Why the probe failed.
        reason: String,
    },

    /// The uploader command failed.
    #[error("report upload failed: {reason}")]
    UploadFailed {
        /// Why the upload failed.
        reason: String,
    },
}
