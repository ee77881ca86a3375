//! The on-disk cache store.
//!
//! Layout below the cache root:
//!
//! ```text
//! shared/<key>/status.json            status marker
//! shared/<key>/populate.lock          lock record of the current populator
//! shared/<key>/gen-<n>/               committed artifact tree + artifact.json
//! shared/<key>/gen-<n>.staging/       in-flight population
//! isolated/<worker>/<key>/...         same layout, one namespace per worker
//! ```
//!
//! A commit renames the staging tree into place before writing the status
//! marker and only then drops the lock, so a reader that observes `Ready`
//! always sees a complete generation.
//!
//! A reset holds `.reset.lock` in the root while it checks for live populate
//! locks and moves the namespaces aside. A populate that takes its slot lock
//! and then finds the reset lock backs off, so one of the two always sees
//! the other.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use kiln_common::{unix_now, OwnerId, RunId, WorkerId};
use kiln_config::IsolationMode;
use rand::Rng;

use crate::artifact::BackendArtifact;
use crate::error::CacheError;
use crate::key::CacheKey;
use crate::lock::{self, LockRecord, LockState};
use crate::slot::{CacheSlot, SlotInfo, SlotStatus, StatusMarker};

const SHARED_DIR: &str = "shared";
const ISOLATED_DIR: &str = "isolated";
const TRASH_DIR: &str = ".trash";
const RESET_LOCK: &str = ".reset.lock";

/// How many times `begin_populate` reclaims a stale lock before giving up.
const RECLAIM_ATTEMPTS: usize = 3;

/// Default bound after which a lock is stale even if its owner looks alive.
const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(6 * 60 * 60);

/// Filesystem-backed cache store used by one worker.
///
/// Every worker of a run opens its own `CacheStore` on the same root; they
/// coordinate only through the files described in the module docs.
#[derive(Debug)]
pub struct CacheStore {
    root: PathBuf,
    owner: OwnerId,
    stale_after: Duration,
}

impl CacheStore {
    /// Opens (and creates) the store rooted at `root` for one worker.
    pub fn open(root: impl Into<PathBuf>, worker: WorkerId, run: RunId) -> Result<Self, CacheError> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| CacheError::io(&root, e))?;
        Ok(Self {
            root,
            owner: OwnerId::current(worker, run),
            stale_after: DEFAULT_STALE_AFTER,
        })
    }

    /// Sets the age after which a populate lock is considered stale.
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    /// Returns the cache root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the identity recorded in locks taken by this store.
    pub fn owner(&self) -> &OwnerId {
        &self.owner
    }

    fn slot_dir(&self, key: &CacheKey, mode: IsolationMode) -> PathBuf {
        match mode {
            IsolationMode::Shared => self.root.join(SHARED_DIR).join(key.to_string()),
            IsolationMode::Isolated => self
                .root
                .join(ISOLATED_DIR)
                .join(self.owner.worker.as_str())
                .join(key.to_string()),
        }
    }

    /// Resolves the slot for `key` under `mode`.
    ///
    /// Shared slots report their on-disk status. Isolated slots are always
    /// returned `Empty`; if this worker used the key before, the next
    /// populate runs under a new generation.
    pub fn acquire(&self, key: &CacheKey, mode: IsolationMode) -> Result<CacheSlot, CacheError> {
        let dir = self.slot_dir(key, mode);
        std::fs::create_dir_all(&dir).map_err(|e| CacheError::io(&dir, e))?;
        let mut slot = CacheSlot {
            key: *key,
            mode,
            dir,
            status: SlotStatus::Empty,
            generation: 0,
            run_id: None,
            checksum: None,
            reason: None,
            lock: None,
        };
        self.refresh(&mut slot);
        if mode == IsolationMode::Isolated {
            slot.status = SlotStatus::Empty;
            slot.checksum = None;
            slot.reason = None;
            slot.lock = None;
        }
        tracing::debug!(key = %key, mode = %mode, status = %slot.status, "slot acquired");
        Ok(slot)
    }

    /// Re-reads the status marker and lock of a slot.
    ///
    /// Reads are fail-safe: an unreadable marker is treated as absent.
    pub fn refresh(&self, slot: &mut CacheSlot) {
        slot.lock = None;
        match StatusMarker::load(&slot.dir) {
            Some(marker) => slot.apply_marker(&marker),
            None => {
                slot.status = SlotStatus::Empty;
                slot.generation = highest_generation(&slot.dir);
                slot.run_id = None;
                slot.checksum = None;
                slot.reason = None;
            }
        }
        if slot.status == SlotStatus::Ready {
            return;
        }
        match lock::read(&slot.dir) {
            LockState::Held(record) => {
                slot.status = SlotStatus::Populating;
                slot.lock = Some(record);
            }
            LockState::Unreadable { .. } => slot.status = SlotStatus::Populating,
            LockState::Free => {
                if slot.status == SlotStatus::Populating {
                    slot.status = SlotStatus::Failed;
                    slot.reason = Some("populate interrupted".to_string());
                }
            }
        }
    }

    /// Moves a slot to `Populating` under a new generation.
    ///
    /// Fails with [`CacheError::AlreadyPopulating`] while a live owner holds
    /// the lock and with [`CacheError::InvalidTransition`] for `Ready` slots.
    /// Stale locks are reclaimed and their populate recorded as failed.
    pub fn begin_populate(&self, slot: &mut CacheSlot) -> Result<PopulateGuard<'_>, CacheError> {
        if slot.status == SlotStatus::Ready {
            return Err(self.invalid(slot, SlotStatus::Populating));
        }
        std::fs::create_dir_all(&slot.dir).map_err(|e| CacheError::io(&slot.dir, e))?;

        let mut last_owner = String::from("unknown");
        for _ in 0..RECLAIM_ATTEMPTS {
            let record = LockRecord {
                owner: self.owner.clone(),
                acquired_at: unix_now(),
            };
            if lock::try_create(&slot.dir, &record)? {
                if let Some(owner) = self.reset_holder() {
                    let _ = lock::remove(&slot.dir);
                    return Err(CacheError::ResetInProgress { owner });
                }
                return self.start_generation(slot, record);
            }

            let state = lock::read(&slot.dir);
            let stale = match &state {
                LockState::Free => continue,
                LockState::Held(held) => {
                    last_owner = held.owner.to_string();
                    held.is_stale(self.stale_after)
                }
                LockState::Unreadable { age_secs } => *age_secs > self.stale_after.as_secs(),
            };
            if !stale {
                slot.status = SlotStatus::Populating;
                slot.lock = match state {
                    LockState::Held(held) => Some(held),
                    _ => None,
                };
                return Err(CacheError::AlreadyPopulating {
                    key: slot.key.to_string(),
                    owner: last_owner,
                });
            }
            if lock::reclaim(&slot.dir, &state)? {
                tracing::warn!(key = %slot.key, owner = %last_owner, "reclaimed stale populate lock");
                self.record_reclaimed(&slot.dir, &last_owner)?;
            }
        }
        Err(CacheError::AlreadyPopulating {
            key: slot.key.to_string(),
            owner: last_owner,
        })
    }

    fn start_generation(
        &self,
        slot: &mut CacheSlot,
        record: LockRecord,
    ) -> Result<PopulateGuard<'_>, CacheError> {
        let marker = StatusMarker::load(&slot.dir);
        if slot.mode == IsolationMode::Shared {
            if let Some(m) = marker.as_ref().filter(|m| m.status == SlotStatus::Ready) {
                // Committed by another worker after this slot was acquired.
                lock::remove(&slot.dir)?;
                slot.apply_marker(m);
                slot.lock = None;
                return Err(self.invalid(slot, SlotStatus::Populating));
            }
        }

        let generation = marker
            .map_or(0, |m| m.generation)
            .max(highest_generation(&slot.dir))
            + 1;
        let populating = StatusMarker {
            status: SlotStatus::Populating,
            generation,
            run: self.owner.run.clone(),
            checksum: None,
            reason: None,
            updated_at: unix_now(),
        };
        slot.apply_marker(&populating);
        slot.lock = Some(record);

        let staging = slot.staging_dir();
        let prepared = remove_dir_if_exists(&staging)
            .and_then(|()| std::fs::create_dir_all(&staging).map_err(|e| CacheError::io(&staging, e)))
            .and_then(|()| populating.save(&slot.dir));
        if let Err(e) = prepared {
            let _ = lock::remove(&slot.dir);
            return Err(e);
        }

        tracing::info!(key = %slot.key, generation, mode = %slot.mode, "populate started");
        Ok(PopulateGuard {
            store: self,
            key: slot.key,
            dir: slot.dir.clone(),
            staging,
            generation,
        })
    }

    /// Records the populate of a reclaimed lock as failed.
    fn record_reclaimed(&self, dir: &Path, owner: &str) -> Result<(), CacheError> {
        if let Some(marker) = StatusMarker::load(dir).filter(|m| m.status == SlotStatus::Populating) {
            StatusMarker {
                status: SlotStatus::Failed,
                reason: Some(format!("stale lock reclaimed from {owner}")),
                updated_at: unix_now(),
                ..marker
            }
            .save(dir)?;
        }
        Ok(())
    }

    /// Moves a `Populating` slot to `Ready` with the given artifact.
    ///
    /// Committing a `Ready` slot again with an identical artifact checksum is
    /// a no-op; any other commit of a terminal slot is a
    /// [`CacheError::CacheCorruption`].
    pub fn commit(&self, slot: &mut CacheSlot, artifact: &BackendArtifact) -> Result<(), CacheError> {
        let checksum = artifact.checksum();
        self.settle(slot);
        match slot.status {
            SlotStatus::Ready if slot.checksum == Some(checksum) => {
                tracing::debug!(key = %slot.key, "commit repeated with identical checksum");
                return Ok(());
            }
            SlotStatus::Ready => {
                return Err(self.corruption(
                    slot,
                    format!(
                        "already committed with checksum {}, refusing {checksum}",
                        slot.checksum.map(|c| c.to_string()).unwrap_or_default()
                    ),
                ));
            }
            SlotStatus::Failed => {
                return Err(self.corruption(
                    slot,
                    format!(
                        "commit of a failed slot ({})",
                        slot.reason.as_deref().unwrap_or("no reason")
                    ),
                ));
            }
            SlotStatus::Empty => return Err(self.invalid(slot, SlotStatus::Ready)),
            SlotStatus::Populating => {}
        }
        self.ensure_lock_owner(slot)?;

        let staging = slot.staging_dir();
        if !staging.is_dir() {
            return Err(self.corruption(slot, "staging directory is missing".to_string()));
        }
        artifact.save(&staging)?;
        let generation_dir = slot.generation_dir();
        remove_dir_if_exists(&generation_dir)?;
        std::fs::rename(&staging, &generation_dir).map_err(|e| CacheError::io(&staging, e))?;

        let ready = StatusMarker {
            status: SlotStatus::Ready,
            generation: slot.generation,
            run: self.owner.run.clone(),
            checksum: Some(checksum),
            reason: None,
            updated_at: unix_now(),
        };
        ready.save(&slot.dir)?;
        lock::remove(&slot.dir)?;
        slot.apply_marker(&ready);
        slot.lock = None;
        tracing::info!(key = %slot.key, generation = slot.generation, checksum = %checksum, "slot ready");
        Ok(())
    }

    /// Moves a `Populating` slot to `Failed`.
    ///
    /// The staging tree is left in place for diagnosis and never becomes a
    /// committed generation.
    pub fn fail(&self, slot: &mut CacheSlot, reason: &str) -> Result<(), CacheError> {
        self.settle(slot);
        match slot.status {
            SlotStatus::Failed if slot.reason.as_deref() == Some(reason) => return Ok(()),
            SlotStatus::Failed => {
                return Err(self.corruption(
                    slot,
                    format!(
                        "already failed with '{}'",
                        slot.reason.as_deref().unwrap_or_default()
                    ),
                ));
            }
            SlotStatus::Ready => {
                return Err(self.corruption(slot, "failure reported for a ready slot".to_string()));
            }
            SlotStatus::Empty => return Err(self.invalid(slot, SlotStatus::Failed)),
            SlotStatus::Populating => {}
        }
        self.ensure_lock_owner(slot)?;

        let failed = StatusMarker {
            status: SlotStatus::Failed,
            generation: slot.generation,
            run: self.owner.run.clone(),
            checksum: None,
            reason: Some(reason.to_string()),
            updated_at: unix_now(),
        };
        failed.save(&slot.dir)?;
        lock::remove(&slot.dir)?;
        slot.apply_marker(&failed);
        slot.lock = None;
        tracing::warn!(key = %slot.key, generation = slot.generation, reason, "slot failed");
        Ok(())
    }

    /// Picks up a terminal marker written for the slot's current generation
    /// through another handle.
    fn settle(&self, slot: &mut CacheSlot) {
        if slot.status != SlotStatus::Populating {
            return;
        }
        if let Some(marker) = StatusMarker::load(&slot.dir) {
            if marker.generation == slot.generation && marker.status.is_terminal() {
                slot.apply_marker(&marker);
                slot.lock = None;
            }
        }
    }

    fn ensure_lock_owner(&self, slot: &CacheSlot) -> Result<(), CacheError> {
        match lock::read(&slot.dir) {
            LockState::Held(record) if record.owner == self.owner => Ok(()),
            LockState::Held(record) => Err(self.corruption(
                slot,
                format!("populate lock is held by {}", record.owner),
            )),
            _ => Err(self.corruption(slot, "populate lock was lost".to_string())),
        }
    }

    /// Blocks until a `Populating` slot settles, its lock goes stale, or
    /// `timeout` elapses, and returns the last observed status.
    pub fn wait_ready(&self, slot: &mut CacheSlot, timeout: Duration, poll: Duration) -> SlotStatus {
        let deadline = Instant::now() + timeout;
        loop {
            self.refresh(slot);
            if slot.status != SlotStatus::Populating {
                return slot.status;
            }
            if slot.lock.as_ref().is_some_and(|l| l.is_stale(self.stale_after)) {
                return slot.status;
            }
            let now = Instant::now();
            if now >= deadline {
                return slot.status;
            }
            let jitter_max = u64::try_from(poll.as_millis() / 4).unwrap_or(0);
            let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_max));
            std::thread::sleep((poll + jitter).min(deadline - now));
        }
    }

    /// Removes terminal slots whose status is older than `older_than`.
    ///
    /// Slots with a live lock are skipped. Returns the number of slots removed.
    pub fn evict(&self, older_than: Duration) -> Result<usize, CacheError> {
        let cutoff = unix_now().saturating_sub(older_than.as_secs());
        let mut removed = 0;
        for entry in self.slot_entries()? {
            if self.lock_is_live(&entry.dir) {
                tracing::debug!(dir = %entry.dir.display(), "evict skipped locked slot");
                continue;
            }
            let expired = match StatusMarker::load(&entry.dir) {
                Some(marker) => marker.status.is_terminal() && marker.updated_at <= cutoff,
                None => dir_age_secs(&entry.dir) >= older_than.as_secs(),
            };
            if expired {
                self.move_to_trash(&entry.dir)?;
                removed += 1;
            }
        }
        self.prune_namespaces();
        self.empty_trash();
        if removed > 0 {
            tracing::info!(removed, "evicted cache slots");
        }
        Ok(removed)
    }

    /// Removes every slot in the store.
    ///
    /// Refuses with [`CacheError::StoreBusy`] and leaves the store untouched
    /// if any slot holds a live populate lock, and with
    /// [`CacheError::ResetInProgress`] while another reset runs.
    pub fn reset(&self) -> Result<usize, CacheError> {
        let reset_lock = self.root.join(RESET_LOCK);
        self.take_reset_lock(&reset_lock)?;
        let cleared = self.stash_namespaces();
        if let Err(e) = lock::remove_file(&reset_lock) {
            tracing::warn!(error = %e, "could not release reset lock");
        }
        let slots = cleared?;
        self.empty_trash();
        tracing::info!(slots, root = %self.root.display(), "cache store reset");
        Ok(slots)
    }

    fn take_reset_lock(&self, path: &Path) -> Result<(), CacheError> {
        let record = LockRecord {
            owner: self.owner.clone(),
            acquired_at: unix_now(),
        };
        for _ in 0..RECLAIM_ATTEMPTS {
            if lock::try_create_file(path, &record)? {
                return Ok(());
            }
            if let Some(owner) = self.reset_holder() {
                return Err(CacheError::ResetInProgress { owner });
            }
            tracing::warn!(path = %path.display(), "removing stale reset lock");
            lock::remove_file(path)?;
        }
        Err(CacheError::ResetInProgress {
            owner: "unknown".to_string(),
        })
    }

    /// Moves both namespaces into the trash unless a slot is being populated.
    fn stash_namespaces(&self) -> Result<usize, CacheError> {
        let entries = self.slot_entries()?;
        if let Some(busy) = entries.iter().find(|e| self.lock_is_live(&e.dir)) {
            return Err(CacheError::StoreBusy {
                key: busy.key.clone(),
            });
        }
        for namespace in [SHARED_DIR, ISOLATED_DIR] {
            let dir = self.root.join(namespace);
            if dir.exists() {
                self.stash(&dir)?;
            }
        }
        Ok(entries.len())
    }

    /// The owner of a live reset lock, if any.
    fn reset_holder(&self) -> Option<String> {
        match lock::read_file(&self.root.join(RESET_LOCK)) {
            LockState::Free => None,
            LockState::Held(record) if record.is_stale(self.stale_after) => None,
            LockState::Held(record) => Some(record.owner.to_string()),
            LockState::Unreadable { age_secs } => {
                (age_secs <= self.stale_after.as_secs()).then(|| "unknown".to_string())
            }
        }
    }

    /// Marks every slot still being populated by `run` as failed
    /// (`cancelled`) and releases its lock. Returns the number of slots released.
    pub fn release_run(&self, run: &RunId) -> Result<usize, CacheError> {
        let mut released = 0;
        for entry in self.slot_entries()? {
            let LockState::Held(record) = lock::read(&entry.dir) else {
                continue;
            };
            if record.owner.run != *run {
                continue;
            }
            if let Some(marker) =
                StatusMarker::load(&entry.dir).filter(|m| m.status == SlotStatus::Populating)
            {
                StatusMarker {
                    status: SlotStatus::Failed,
                    reason: Some("cancelled".to_string()),
                    updated_at: unix_now(),
                    ..marker
                }
                .save(&entry.dir)?;
            }
            lock::remove(&entry.dir)?;
            released += 1;
        }
        if released > 0 {
            tracing::warn!(run = %run, released, "released populating slots of cancelled run");
        }
        Ok(released)
    }

    /// Lists every slot in the store.
    pub fn slots(&self) -> Result<Vec<SlotInfo>, CacheError> {
        let mut infos = Vec::new();
        for entry in self.slot_entries()? {
            let marker = StatusMarker::load(&entry.dir);
            let lock = match lock::read(&entry.dir) {
                LockState::Held(record) => Some(record),
                _ => None,
            };
            let mut status = marker.as_ref().map_or(SlotStatus::Empty, |m| m.status);
            if status != SlotStatus::Ready && lock.is_some() {
                status = SlotStatus::Populating;
            }
            infos.push(SlotInfo {
                key: entry.key,
                mode: entry.mode,
                worker: entry.worker,
                dir: entry.dir,
                status,
                generation: marker.as_ref().map_or(0, |m| m.generation),
                updated_at: marker.as_ref().map(|m| m.updated_at),
                reason: marker.and_then(|m| m.reason),
                lock,
            });
        }
        Ok(infos)
    }

    fn lock_is_live(&self, dir: &Path) -> bool {
        match lock::read(dir) {
            LockState::Free => false,
            LockState::Held(record) => !record.is_stale(self.stale_after),
            LockState::Unreadable { age_secs } => age_secs <= self.stale_after.as_secs(),
        }
    }

    fn slot_entries(&self) -> Result<Vec<SlotEntry>, CacheError> {
        let mut entries = Vec::new();
        for (key, dir) in subdirs(&self.root.join(SHARED_DIR))? {
            entries.push(SlotEntry {
                key,
                mode: IsolationMode::Shared,
                worker: None,
                dir,
            });
        }
        for (worker, namespace) in subdirs(&self.root.join(ISOLATED_DIR))? {
            for (key, dir) in subdirs(&namespace)? {
                entries.push(SlotEntry {
                    key,
                    mode: IsolationMode::Isolated,
                    worker: Some(worker.clone()),
                    dir,
                });
            }
        }
        Ok(entries)
    }

    fn move_to_trash(&self, dir: &Path) -> Result<(), CacheError> {
        let target = self.stash(dir)?;
        if let Err(e) = std::fs::remove_dir_all(&target) {
            tracing::warn!(path = %target.display(), error = %e, "could not delete evicted slot");
        }
        Ok(())
    }

    /// Renames `dir` into the trash and returns its new path.
    fn stash(&self, dir: &Path) -> Result<PathBuf, CacheError> {
        let trash = self.root.join(TRASH_DIR);
        std::fs::create_dir_all(&trash).map_err(|e| CacheError::io(&trash, e))?;
        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let target = trash.join(format!("{name}-{:08x}", rand::random::<u32>()));
        std::fs::rename(dir, &target).map_err(|e| CacheError::io(dir, e))?;
        Ok(target)
    }

    fn empty_trash(&self) {
        let trash = self.root.join(TRASH_DIR);
        if trash.exists() {
            let _ = std::fs::remove_dir_all(&trash);
        }
    }

    fn prune_namespaces(&self) {
        if let Ok(namespaces) = subdirs(&self.root.join(ISOLATED_DIR)) {
            for (_, dir) in namespaces {
                // Fails while the namespace still has slots.
                let _ = std::fs::remove_dir(&dir);
            }
        }
    }

    fn invalid(&self, slot: &CacheSlot, to: SlotStatus) -> CacheError {
        CacheError::InvalidTransition {
            key: slot.key.to_string(),
            from: slot.status,
            to,
        }
    }

    fn corruption(&self, slot: &CacheSlot, reason: String) -> CacheError {
        CacheError::CacheCorruption {
            key: slot.key.to_string(),
            reason,
        }
    }
}

/// Exclusive right to populate one slot generation.
///
/// Dropping the guard while the slot is still `Populating` under this owner
/// records the slot as failed (`abandoned`) and releases the lock.
#[derive(Debug)]
pub struct PopulateGuard<'a> {
    store: &'a CacheStore,
    key: CacheKey,
    dir: PathBuf,
    staging: PathBuf,
    generation: u64,
}

impl PopulateGuard<'_> {
    /// Directory the backend writes its output into.
    pub fn staging_dir(&self) -> &Path {
        &self.staging
    }

    /// Generation being populated.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Key of the slot being populated.
    pub fn key(&self) -> &CacheKey {
        &self.key
    }
}

impl Drop for PopulateGuard<'_> {
    fn drop(&mut self) {
        let owned = matches!(
            lock::read(&self.dir),
            LockState::Held(record) if record.owner == self.store.owner
        );
        let Some(marker) = StatusMarker::load(&self.dir) else {
            return;
        };
        if !owned || marker.status != SlotStatus::Populating || marker.generation != self.generation {
            return;
        }
        let abandoned = StatusMarker {
            status: SlotStatus::Failed,
            reason: Some("abandoned".to_string()),
            updated_at: unix_now(),
            ..marker
        };
        if let Err(e) = abandoned.save(&self.dir).and_then(|()| lock::remove(&self.dir)) {
            tracing::error!(key = %self.key, error = %e, "could not record abandoned populate");
        } else {
            tracing::warn!(key = %self.key, generation = self.generation, "populate abandoned");
        }
    }
}

struct SlotEntry {
    key: String,
    mode: IsolationMode,
    worker: Option<String>,
    dir: PathBuf,
}

/// Lists subdirectories of `dir` by name, sorted. A missing directory is empty.
fn subdirs(dir: &Path) -> Result<Vec<(String, PathBuf)>, CacheError> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(CacheError::io(dir, e)),
    };
    let mut dirs = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| CacheError::io(dir, e))?;
        if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            dirs.push((entry.file_name().to_string_lossy().into_owned(), entry.path()));
        }
    }
    dirs.sort();
    Ok(dirs)
}

/// Highest `gen-<n>` (committed or staging) present in a slot directory.
fn highest_generation(slot_dir: &Path) -> u64 {
    let Ok(entries) = std::fs::read_dir(slot_dir) else {
        return 0;
    };
    entries
        .filter_map(Result::ok)
        .filter_map(|e| {
            let name = e.file_name().to_string_lossy().into_owned();
            let rest = name.strip_prefix("gen-")?;
            rest.trim_end_matches(".staging").parse::<u64>().ok()
        })
        .max()
        .unwrap_or(0)
}

fn remove_dir_if_exists(dir: &Path) -> Result<(), CacheError> {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(CacheError::io(dir, e)),
    }
}

fn dir_age_secs(dir: &Path) -> u64 {
    std::fs::metadata(dir)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.elapsed().ok())
        .map_or(0, |d| d.as_secs())
}
