//! Populate lock files.
//!
//! A lock is a `populate.lock` file created with `O_CREAT | O_EXCL` inside the
//! slot directory. Its body records the owner and acquisition time so that
//! other workers can detect a dead or stale owner and reclaim the slot. The
//! store-wide reset lock uses the same record through the `*_file` variants.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use kiln_common::{unix_now, OwnerId};
use serde::{Deserialize, Serialize};

use crate::error::CacheError;

/// Name of the lock file within a slot directory.
pub(crate) const LOCK_FILE: &str = "populate.lock";

/// Body of a populate lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    /// The worker holding the lock.
    pub owner: OwnerId,
    /// Seconds since the Unix epoch when the lock was taken.
    pub acquired_at: u64,
}

impl LockRecord {
    /// Returns `true` if the owner is dead or the lock is older than
    /// `stale_after`.
    pub fn is_stale(&self, stale_after: Duration) -> bool {
        self.owner.is_known_dead()
            || unix_now().saturating_sub(self.acquired_at) > stale_after.as_secs()
    }
}

/// What the lock path holds right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum LockState {
    /// No lock file.
    Free,
    /// A readable lock record.
    Held(LockRecord),
    /// A lock file whose body is missing or garbled, with its age in seconds.
    Unreadable { age_secs: u64 },
}

pub(crate) fn lock_path(slot_dir: &Path) -> PathBuf {
    slot_dir.join(LOCK_FILE)
}

/// Tries to create the lock exclusively. Returns `Ok(false)` if it exists.
pub(crate) fn try_create(slot_dir: &Path, record: &LockRecord) -> Result<bool, CacheError> {
    try_create_file(&lock_path(slot_dir), record)
}

pub(crate) fn try_create_file(path: &Path, record: &LockRecord) -> Result<bool, CacheError> {
    let body = serde_json::to_vec(record)?;
    let mut file = match std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
    {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => return Ok(false),
        Err(e) => return Err(CacheError::io(path, e)),
    };
    if let Err(e) = file.write_all(&body).and_then(|()| file.sync_all()) {
        let _ = std::fs::remove_file(path);
        return Err(CacheError::io(path, e));
    }
    Ok(true)
}

/// Reads the lock of a slot directory.
pub(crate) fn read(slot_dir: &Path) -> LockState {
    read_file(&lock_path(slot_dir))
}

pub(crate) fn read_file(path: &Path) -> LockState {
    let Ok(content) = std::fs::read(path) else {
        return if path.exists() {
            LockState::Unreadable { age_secs: 0 }
        } else {
            LockState::Free
        };
    };
    match serde_json::from_slice(&content) {
        Ok(record) => LockState::Held(record),
        Err(_) => LockState::Unreadable {
            age_secs: file_age_secs(path),
        },
    }
}

/// Removes the lock file. A lock that is already gone is not an error.
pub(crate) fn remove(slot_dir: &Path) -> Result<(), CacheError> {
    remove_file(&lock_path(slot_dir))
}

pub(crate) fn remove_file(path: &Path) -> Result<(), CacheError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(CacheError::io(path, e)),
    }
}

/// Moves a stale lock out of the way and checks it is still the one judged
/// stale.
///
/// Returns `Ok(false)` when another worker replaced the lock in between; the
/// newer lock is put back when possible.
pub(crate) fn reclaim(slot_dir: &Path, judged: &LockState) -> Result<bool, CacheError> {
    let path = lock_path(slot_dir);
    let aside = slot_dir.join(format!("{LOCK_FILE}.stale-{:08x}", rand::random::<u32>()));
    match std::fs::rename(&path, &aside) {
        Ok(()) => {}
        // Someone else reclaimed it first; the caller retries the create.
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(true),
        Err(e) => return Err(CacheError::io(path, e)),
    }
    let moved = match std::fs::read(&aside) {
        Ok(content) => match serde_json::from_slice::<LockRecord>(&content) {
            Ok(record) => LockState::Held(record),
            Err(_) => LockState::Unreadable {
                age_secs: file_age_secs(&aside),
            },
        },
        Err(_) => LockState::Free,
    };
    let same = match (&moved, judged) {
        (LockState::Held(a), LockState::Held(b)) => a == b,
        (LockState::Unreadable { .. }, LockState::Unreadable { .. }) => true,
        _ => false,
    };
    if !same {
        if std::fs::hard_link(&aside, &path).is_ok() {
            let _ = std::fs::remove_file(&aside);
        }
        return Ok(false);
    }
    let _ = std::fs::remove_file(&aside);
    Ok(true)
}

fn file_age_secs(path: &Path) -> u64 {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.elapsed().ok())
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
