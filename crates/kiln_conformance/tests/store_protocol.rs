//! Store protocol guarantees seen from outside the cache crate.

#![cfg(unix)]

use kiln_build::{BuildState, Orchestrator};
use kiln_cache::{compute_key, hash_tree, BackendArtifact, CacheError, LockRecord, SlotStatus};
use kiln_common::{OwnerId, RunId, WorkerId};
use kiln_conformance::{fake_tool, kernel, options, request, runner, store, tool_calls, COMPILER};
use kiln_config::{BackendKind, BuildConfig, IsolationMode, ToolchainPaths};

fn artifact(dir: &std::path::Path, body: &str) -> BackendArtifact {
    std::fs::write(dir.join("libgemm.so"), body).unwrap();
    BackendArtifact {
        backend: BackendKind::Cpu,
        files: hash_tree(dir).unwrap(),
        success_artifact: "libgemm.so".to_string(),
        exit_code: 0,
        log_tail: Vec::new(),
    }
}

#[test]
fn reset_is_refused_while_a_slot_is_populating() {
    let cache = tempfile::tempdir().unwrap();
    let gemm = kernel("gemm", "r1");
    let req = request(&gemm, BuildConfig::new(BackendKind::Cpu));
    let key = compute_key(&req.ir.identity, &req.config).unwrap();

    let worker = store(cache.path(), "gw0", "ci-1");
    let mut slot = worker.acquire(&key, IsolationMode::Shared).unwrap();
    let guard = worker.begin_populate(&mut slot).unwrap();

    let admin = store(cache.path(), "admin", "maint");
    assert!(matches!(admin.reset(), Err(CacheError::StoreBusy { .. })));
    assert!(slot.dir.exists());

    let built = artifact(guard.staging_dir(), "lib");
    worker.commit(&mut slot, &built).unwrap();
    drop(guard);
    assert_eq!(admin.reset().unwrap(), 1);
    assert!(worker.slots().unwrap().is_empty());
}

#[test]
fn second_commit_never_overwrites_a_different_artifact() {
    let cache = tempfile::tempdir().unwrap();
    let gemm = kernel("gemm", "r1");
    let req = request(&gemm, BuildConfig::new(BackendKind::Cpu));
    let key = compute_key(&req.ir.identity, &req.config).unwrap();

    let worker = store(cache.path(), "gw0", "ci-1");
    let mut slot = worker.acquire(&key, IsolationMode::Shared).unwrap();
    let guard = worker.begin_populate(&mut slot).unwrap();
    let first = artifact(guard.staging_dir(), "lib-v1");
    worker.commit(&mut slot, &first).unwrap();
    drop(guard);

    worker.commit(&mut slot, &first).unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let other = artifact(scratch.path(), "lib-v2");
    assert!(matches!(
        worker.commit(&mut slot, &other),
        Err(CacheError::CacheCorruption { .. })
    ));
    assert_eq!(slot.artifact(), Some(first));
}

#[test]
fn crashed_owner_lock_is_reclaimed_by_the_next_build() {
    let tools = tempfile::tempdir().unwrap();
    let cache = tempfile::tempdir().unwrap();
    let cc = fake_tool(tools.path(), "cc", COMPILER);
    let gemm = kernel("gemm", "r1");
    let req = request(&gemm, BuildConfig::new(BackendKind::Cpu));
    let key = compute_key(&req.ir.identity, &req.config).unwrap();

    let worker = store(cache.path(), "gw1", "ci-1");
    let slot = worker.acquire(&key, IsolationMode::Shared).unwrap();
    let crashed = LockRecord {
        owner: OwnerId {
            host: "node-that-rebooted.invalid".to_string(),
            pid: 31337,
            worker: WorkerId::from_raw("gw0.31337.deadbeef"),
            run: RunId::new("ci-0"),
        },
        acquired_at: 1,
    };
    std::fs::write(
        slot.dir.join("populate.lock"),
        serde_json::to_vec(&crashed).unwrap(),
    )
    .unwrap();

    let toolchains = ToolchainPaths {
        cpu: cc,
        ..ToolchainPaths::default()
    };
    let summary = Orchestrator::new(&worker, toolchains, runner(), options(IsolationMode::Shared, 1))
        .run(&[req])
        .unwrap();
    assert_eq!(summary.outcomes[0].state, BuildState::Ready);
    assert_eq!(tool_calls(tools.path(), "cc"), 1);

    let slot = worker.acquire(&key, IsolationMode::Shared).unwrap();
    assert_eq!(slot.status, SlotStatus::Ready);
    assert!(slot.lock.is_none());
}
