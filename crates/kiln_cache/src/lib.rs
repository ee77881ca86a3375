//! Kernel build cache: cache keys, slots, and the on-disk store protocol.
//!
//! A [`CacheKey`] addresses one (kernel identity, build configuration) pair.
//! The [`CacheStore`] maps keys to slot directories, either shared across all
//! workers of a run or isolated per worker, and guards population with
//! exclusive lock files so that at most one owner populates a shared slot.

#![warn(missing_docs)]

pub mod artifact;
pub mod error;
pub mod key;
pub mod lock;
pub mod slot;
pub mod store;

pub use artifact::{hash_tree, BackendArtifact};
pub use error::CacheError;
pub use key::{compute_key, CacheKey, KernelIdentity};
pub use lock::LockRecord;
pub use slot::{CacheSlot, SlotInfo, SlotStatus, StatusMarker};
pub use store::{CacheStore, PopulateGuard};
