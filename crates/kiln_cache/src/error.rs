//! Error types for cache store operations.

use std::path::PathBuf;

use crate::slot::SlotStatus;

/// Errors that can occur during cache key computation and store operations.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The build configuration cannot produce a cache key.
    #[error("invalid build configuration: {reason}")]
    InvalidConfig {
        /// Which option is wrong and why.
        reason: String,
    },

    /// A live owner already holds the populate lock of a shared slot.
    #[error("slot {key} is already being populated by {owner}")]
    AlreadyPopulating {
        /// The contended cache key.
        key: String,
        /// Display form of the lock owner.
        owner: String,
    },

    /// A slot's on-disk state contradicts the requested terminal transition.
    #[error("cache corruption in slot {key}: {reason}")]
    CacheCorruption {
        /// The affected cache key.
        key: String,
        /// What was found.
        reason: String,
    },

    /// The store cannot be reset while a slot is being populated.
    #[error("cache store is busy: slot {key} is being populated")]
    StoreBusy {
        /// A slot holding a live populate lock.
        key: String,
    },

    /// A store reset is running; populating must wait until it is done.
    #[error("cache store reset in progress by {owner}")]
    ResetInProgress {
        /// Display form of the resetting worker.
        owner: String,
    },

    /// The slot is not in a state that allows the requested transition.
    #[error("invalid transition for slot {key}: {from} -> {to}")]
    InvalidTransition {
        /// The affected cache key.
        key: String,
        /// Current slot status.
        from: SlotStatus,
        /// Requested slot status.
        to: SlotStatus,
    },

    /// An I/O error occurred while reading or writing store files.
    #[error("cache I/O error at {path}: {source}")]
    Io {
        /// The path that caused the error.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// A marker, lock record, or artifact manifest could not be (de)serialized.
    #[error("serialization error: {reason}")]
    Serialization {
        /// Description of the serialization failure.
        reason: String,
    },
}

impl CacheError {
    /// Returns `true` for store-protocol errors that a bounded local retry
    /// may clear. Lock contention is handled by the contention policy instead.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io { .. } | Self::ResetInProgress { .. })
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization {
            reason: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn already_populating_display() {
        let err = CacheError::AlreadyPopulating {
            key: "ab12".to_string(),
            owner: "gw1@ci:42 (run-1)".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("ab12"));
        assert!(msg.contains("gw1@ci:42"));
    }

    #[test]
    fn invalid_transition_display() {
        let err = CacheError::InvalidTransition {
            key: "k".to_string(),
            from: SlotStatus::Ready,
            to: SlotStatus::Populating,
        };
        assert_eq!(
            err.to_string(),
            "invalid transition for slot k: ready -> populating"
        );
    }

    #[test]
    fn retryable_classification() {
        let io = CacheError::io(
            "/tmp/x",
            std::io::Error::new(std::io::ErrorKind::Other, "race"),
        );
        assert!(io.is_retryable());
        let contended = CacheError::AlreadyPopulating {
            key: "k".to_string(),
            owner: "o".to_string(),
        };
        assert!(!contended.is_retryable());
        let busy = CacheError::StoreBusy {
            key: "k".to_string(),
        };
        assert!(!busy.is_retryable());
        let resetting = CacheError::ResetInProgress {
            owner: "maint@ci:7 (run-0)".to_string(),
        };
        assert!(resetting.is_retryable());
        let bad = CacheError::InvalidConfig {
            reason: "no part".to_string(),
        };
        assert!(!bad.is_retryable());
    }
}
