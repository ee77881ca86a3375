//! The build orchestrator.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use kiln_backend::{
    create_adapter, BackendAdapter, BackendError, CancelToken, ToolchainRunner, TransientPredicate,
};
use kiln_cache::{compute_key, BackendArtifact, CacheError, CacheSlot, CacheStore, SlotStatus};
use kiln_config::{IsolationMode, ProjectConfig, ToolchainPaths};
use rayon::prelude::*;

use crate::error::BuildError;
use crate::policy::{ContentionPolicy, OrchestratorOptions};
use crate::request::BuildRequest;
use crate::state::BuildState;
use crate::summary::{BuildOutcome, RunSummary};

/// Longest stretch a contention wait runs without checking for cancellation.
const CANCEL_CHECK: Duration = Duration::from_millis(250);

/// Drives build requests through the cache store and backend adapters.
#[derive(Debug)]
pub struct Orchestrator<'a> {
    store: &'a CacheStore,
    toolchains: ToolchainPaths,
    runner: ToolchainRunner,
    options: OrchestratorOptions,
    toolchain_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl<'a> Orchestrator<'a> {
    /// Creates an orchestrator. The runner's cancellation token becomes the
    /// run's token.
    pub fn new(
        store: &'a CacheStore,
        toolchains: ToolchainPaths,
        runner: ToolchainRunner,
        options: OrchestratorOptions,
    ) -> Self {
        Self {
            store,
            toolchains,
            runner,
            options,
            toolchain_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Creates an orchestrator from a loaded configuration.
    pub fn from_config(store: &'a CacheStore, config: &ProjectConfig) -> Result<Self, BuildError> {
        let transient = TransientPredicate::new(&config.retry.transient_patterns)?;
        let runner = ToolchainRunner::new(&config.timeouts).with_transient(transient);
        Ok(Self::new(
            store,
            config.toolchains.clone(),
            runner,
            OrchestratorOptions::from_config(config),
        ))
    }

    /// The run's cancellation token.
    pub fn cancel_token(&self) -> CancelToken {
        self.runner.cancel_token().clone()
    }

    /// Builds every request and returns their outcomes in request order.
    ///
    /// Requests of one rank sweep run one after another in request order;
    /// everything else runs in parallel. A failing build never stops its
    /// siblings. If the run is cancelled, slots this run still holds are
    /// released as failed.
    pub fn run(&self, requests: &[BuildRequest]) -> Result<RunSummary, BuildError> {
        let mut builder = rayon::ThreadPoolBuilder::new();
        if let Some(jobs) = self.options.jobs {
            builder = builder.num_threads(jobs.max(1));
        }
        let pool = builder.build().map_err(|e| BuildError::ThreadPool {
            reason: e.to_string(),
        })?;

        tracing::info!(
            requests = requests.len(),
            mode = %self.options.mode,
            run = %self.store.owner().run,
            "build run started"
        );
        let tasks = sequential_groups(requests);
        let mut done: Vec<(usize, BuildOutcome)> = pool.install(|| {
            tasks
                .par_iter()
                .flat_map_iter(|task| {
                    task.iter()
                        .map(|&i| (i, self.execute(&requests[i])))
                        .collect::<Vec<_>>()
                })
                .collect()
        });
        done.sort_by_key(|(i, _)| *i);
        let outcomes = done.into_iter().map(|(_, outcome)| outcome).collect();

        let cancelled = self.runner.cancel_token().is_cancelled();
        if cancelled {
            self.store.release_run(&self.store.owner().run)?;
        }
        let summary = RunSummary {
            outcomes,
            cancelled,
        };
        tracing::info!(
            built = summary.count(BuildState::Ready),
            reused = summary.count(BuildState::Skipped),
            failed = summary.count(BuildState::Failed),
            "build run finished"
        );
        Ok(summary)
    }

    fn execute(&self, request: &BuildRequest) -> BuildOutcome {
        let mut build = Tracker::new(request);
        if self.cancelled() {
            return build.fail("cancelled before start", Vec::new());
        }
        let key = match compute_key(&request.ir.identity, &request.config) {
            Ok(key) => key,
            Err(e) => return build.fail(e.to_string(), Vec::new()),
        };
        build.outcome.key = Some(key);
        let adapter = create_adapter(request.config.backend, &self.toolchains);

        let deadline = match self.options.contention {
            ContentionPolicy::Wait { timeout, .. } => Some(Instant::now() + timeout),
            ContentionPolicy::FailFast => None,
        };
        let mut transient_retry_left = true;
        let mut rebuilding = false;
        let mut store_retries = 0;

        loop {
            if self.cancelled() {
                return build.fail("cancelled", Vec::new());
            }
            let mut slot = match self.store_op(|| self.store.acquire(&key, self.options.mode)) {
                Ok(slot) => slot,
                Err(e) => return build.fail(e.to_string(), Vec::new()),
            };
            build.observe(&slot);
            build.transition(BuildState::SlotAcquired);

            if slot.status == SlotStatus::Populating {
                match self.options.contention {
                    ContentionPolicy::FailFast => {
                        let owner = slot
                            .lock
                            .as_ref()
                            .map_or_else(|| "unknown".to_string(), |l| l.owner.to_string());
                        let err = CacheError::AlreadyPopulating {
                            key: key.to_string(),
                            owner,
                        };
                        return build.fail(err.to_string(), Vec::new());
                    }
                    ContentionPolicy::Wait { poll, .. } => {
                        tracing::debug!(build = %build.outcome.label, key = %key, "waiting for slot owner");
                        self.wait_for_owner(&mut slot, deadline.unwrap_or_else(Instant::now), poll);
                        build.observe(&slot);
                        if self.cancelled() {
                            return build.fail("cancelled", Vec::new());
                        }
                    }
                }
            }
            if slot.status == SlotStatus::Ready {
                return build.finish(BuildState::Skipped);
            }
            if let Some(reason) = self.failed_in_this_run(&slot, rebuilding) {
                return build.fail(format!("failed earlier in this run: {reason}"), Vec::new());
            }

            let guard = match self.store.begin_populate(&mut slot) {
                Ok(guard) => guard,
                Err(CacheError::InvalidTransition { .. }) if slot.status == SlotStatus::Ready => {
                    build.observe(&slot);
                    return build.finish(BuildState::Skipped);
                }
                Err(e @ CacheError::AlreadyPopulating { .. }) => {
                    let (Some(deadline), ContentionPolicy::Wait { poll, .. }) =
                        (deadline, self.options.contention)
                    else {
                        return build.fail(e.to_string(), Vec::new());
                    };
                    if deadline <= Instant::now() {
                        return build.fail(e.to_string(), Vec::new());
                    }
                    self.wait_for_owner(&mut slot, deadline, poll);
                    continue;
                }
                Err(e) if e.is_retryable() && store_retries + 1 < self.options.store_attempts => {
                    store_retries += 1;
                    tracing::warn!(build = %build.outcome.label, error = %e, "retrying store operation");
                    std::thread::sleep(Duration::from_millis(25 * u64::from(store_retries)));
                    continue;
                }
                Err(e) => return build.fail(e.to_string(), Vec::new()),
            };
            build.observe(&slot);
            build.outcome.attempts += 1;
            build.transition(BuildState::Populating);

            match self.generate(adapter.as_ref(), request, guard.staging_dir()) {
                Ok(artifact) => {
                    return match self.store_op(|| self.store.commit(&mut slot, &artifact)) {
                        Ok(()) => {
                            build.observe(&slot);
                            build.finish(BuildState::Ready)
                        }
                        Err(e) => {
                            self.record_failure(&mut slot, &e.to_string());
                            build.fail(e.to_string(), Vec::new())
                        }
                    };
                }
                Err(e) if e.is_transient() && transient_retry_left => {
                    tracing::warn!(
                        build = %build.outcome.label,
                        key = %key,
                        generation = slot.generation,
                        error = %e,
                        "transient toolchain failure, retrying once"
                    );
                    self.record_failure(&mut slot, &e.to_string());
                    drop(guard);
                    transient_retry_left = false;
                    rebuilding = true;
                    std::thread::sleep(self.options.transient_backoff);
                }
                Err(e) => {
                    self.record_failure(&mut slot, &e.to_string());
                    build.observe(&slot);
                    return build.fail(e.to_string(), e.log_tail().to_vec());
                }
            }
        }
    }

    /// Runs the adapter, holding the toolchain's mutex when it is not
    /// reentrant.
    fn generate(
        &self,
        adapter: &dyn BackendAdapter,
        request: &BuildRequest,
        staging: &Path,
    ) -> Result<BackendArtifact, BackendError> {
        let serial = (!adapter.capabilities().reentrant)
            .then(|| self.toolchain_lock(&adapter.toolchain_id()));
        let _held = serial
            .as_ref()
            .map(|m| m.lock().unwrap_or_else(PoisonError::into_inner));
        if self.cancelled() {
            return Err(BackendError::Cancelled {
                tool: adapter.kind().name().to_string(),
            });
        }
        adapter.generate(&request.ir, &request.config, staging, &self.runner)
    }

    /// Waits for another worker's populate to settle, in slices short enough
    /// to notice cancellation. Returns early when the owner's lock goes stale.
    fn wait_for_owner(&self, slot: &mut CacheSlot, deadline: Instant, poll: Duration) {
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() || self.cancelled() {
                return;
            }
            let slice = remaining.min(CANCEL_CHECK);
            let started = Instant::now();
            if self.store.wait_ready(slot, slice, poll) != SlotStatus::Populating
                || started.elapsed() < slice
            {
                return;
            }
        }
    }

    fn toolchain_lock(&self, toolchain_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self
            .toolchain_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(toolchain_id.to_string()).or_default())
    }

    /// A shared slot that already failed under this run is reported instead
    /// of rebuilt, unless this request is retrying its own transient failure.
    fn failed_in_this_run(&self, slot: &CacheSlot, rebuilding: bool) -> Option<String> {
        let same_run = slot.run_id.as_ref() == Some(&self.store.owner().run);
        (slot.status == SlotStatus::Failed
            && slot.mode == IsolationMode::Shared
            && same_run
            && !rebuilding)
            .then(|| slot.reason.clone().unwrap_or_else(|| "unknown reason".to_string()))
    }

    fn record_failure(&self, slot: &mut CacheSlot, reason: &str) {
        if let Err(e) = self.store_op(|| self.store.fail(slot, reason)) {
            tracing::error!(key = %slot.key, error = %e, "could not record slot failure");
        }
    }

    /// Retries a store operation on I/O races, up to the configured attempts.
    fn store_op<T>(&self, mut op: impl FnMut() -> Result<T, CacheError>) -> Result<T, CacheError> {
        let mut attempt = 1;
        loop {
            match op() {
                Err(e) if e.is_retryable() && attempt < self.options.store_attempts => {
                    tracing::warn!(attempt, error = %e, "store operation failed, retrying");
                    std::thread::sleep(std::time::Duration::from_millis(25 * u64::from(attempt)));
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    fn cancelled(&self) -> bool {
        self.runner.cancel_token().is_cancelled()
    }
}

/// Splits requests into units of work. A rank sweep forms one unit, in
/// request order; every other request is a unit of its own.
fn sequential_groups(requests: &[BuildRequest]) -> Vec<Vec<usize>> {
    let mut tasks: Vec<Vec<usize>> = Vec::new();
    let mut sweeps: HashMap<&str, usize> = HashMap::new();
    for (i, request) in requests.iter().enumerate() {
        match request.sweep.as_deref() {
            Some(sweep) => {
                let task = *sweeps.entry(sweep).or_insert_with(|| {
                    tasks.push(Vec::new());
                    tasks.len() - 1
                });
                tasks[task].push(i);
            }
            None => tasks.push(vec![i]),
        }
    }
    tasks
}

/// Tracks one request's state and logs its transitions.
struct Tracker {
    state: BuildState,
    outcome: BuildOutcome,
}

impl Tracker {
    fn new(request: &BuildRequest) -> Self {
        Self {
            state: BuildState::Requested,
            outcome: BuildOutcome {
                label: request.label.clone(),
                kernel: request.ir.name().to_string(),
                backend: request.config.backend,
                key: None,
                state: BuildState::Requested,
                generation: 0,
                attempts: 0,
                slot_dir: None,
                error: None,
                log_tail: Vec::new(),
            },
        }
    }

    fn observe(&mut self, slot: &CacheSlot) {
        self.outcome.generation = slot.generation;
        self.outcome.slot_dir = Some(slot.dir.clone());
    }

    fn transition(&mut self, to: BuildState) {
        if self.state == to {
            return;
        }
        let key = self.outcome.key.map(|k| k.to_string()).unwrap_or_default();
        if to == BuildState::Failed {
            tracing::warn!(build = %self.outcome.label, key = %key, from = %self.state, to = %to, "build transition");
        } else {
            tracing::info!(build = %self.outcome.label, key = %key, from = %self.state, to = %to, "build transition");
        }
        self.state = to;
    }

    fn finish(mut self, state: BuildState) -> BuildOutcome {
        self.transition(state);
        self.outcome.state = state;
        self.outcome
    }

    fn fail(mut self, error: impl Into<String>, log_tail: Vec<String>) -> BuildOutcome {
        self.outcome.error = Some(error.into());
        self.outcome.log_tail = log_tail;
        self.finish(BuildState::Failed)
    }
}
