//! Shared foundational types used across the Kiln build cache.
//!
//! This crate provides content hashing, clock frequency values, run/worker
//! identities, and the atomic file write used by every on-disk record.

#![warn(missing_docs)]

pub mod frequency;
pub mod fs;
pub mod hash;
pub mod identity;

pub use frequency::{Frequency, ParseFrequencyError};
pub use fs::atomic_write;
pub use hash::{ContentHash, ContentHasher, ParseHashError};
pub use identity::{hostname, is_pid_alive, unix_now, OwnerId, RunId, WorkerId};
