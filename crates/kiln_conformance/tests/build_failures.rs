//! Toolchain failures, timeouts and transient retries through the
//! orchestrator.

#![cfg(unix)]

use std::time::Duration;

use kiln_backend::TimeoutClass;
use kiln_build::{BuildRequest, BuildState, Orchestrator};
use kiln_cache::SlotStatus;
use kiln_common::Frequency;
use kiln_conformance::{
    fake_tool, kernel, options, request, runner, store, tool_calls, COMPILER, HLS_TOOL,
};
use kiln_config::{BackendKind, BuildConfig, FlowTarget, IsolationMode, ToolchainPaths};

const LICENSE_ERROR: &str = "echo 'ERROR: unable to contact license server'; exit 1";

fn cpu_toolchain(cc: std::path::PathBuf) -> ToolchainPaths {
    ToolchainPaths {
        cpu: cc,
        ..ToolchainPaths::default()
    }
}

#[test]
fn timeout_fails_the_key_without_retry() {
    let tools = tempfile::tempdir().unwrap();
    let cache = tempfile::tempdir().unwrap();
    let cc = fake_tool(
        tools.path(),
        "cc",
        "echo 'ERROR: unable to contact license server'; sleep 30",
    );
    let store = store(cache.path(), "gw0", "ci-1");
    let runner = runner().with_limit(TimeoutClass::Compile, Duration::from_millis(300));
    let orch = Orchestrator::new(&store, cpu_toolchain(cc), runner, options(IsolationMode::Shared, 1));

    let summary = orch
        .run(&[request(&kernel("gemm", "r1"), BuildConfig::new(BackendKind::Cpu))])
        .unwrap();
    let outcome = &summary.outcomes[0];
    assert_eq!(outcome.state, BuildState::Failed);
    assert_eq!(outcome.attempts, 1);
    assert_eq!(tool_calls(tools.path(), "cc"), 1);
    assert!(outcome.error.as_deref().unwrap_or_default().contains("timed out"));
    assert!(outcome.log_tail.iter().any(|l| l.contains("license server")));

    let slots = store.slots().unwrap();
    assert_eq!(slots.len(), 1);
    assert_eq!(slots[0].status, SlotStatus::Failed);
    assert!(slots[0].lock.is_none());
}

#[test]
fn transient_failure_is_retried_once() {
    let tools = tempfile::tempdir().unwrap();
    let cache = tempfile::tempdir().unwrap();
    let flag = tools.path().join("licensed");
    let cc = fake_tool(
        tools.path(),
        "cc",
        &format!(
            "if [ ! -e '{flag}' ]; then touch '{flag}'; {LICENSE_ERROR}; fi\n{COMPILER}",
            flag = flag.display()
        ),
    );
    let store = store(cache.path(), "gw0", "ci-1");
    let orch = Orchestrator::new(&store, cpu_toolchain(cc), runner(), options(IsolationMode::Shared, 1));

    let summary = orch
        .run(&[request(&kernel("gemm", "r1"), BuildConfig::new(BackendKind::Cpu))])
        .unwrap();
    let outcome = &summary.outcomes[0];
    assert_eq!(outcome.state, BuildState::Ready);
    assert_eq!(outcome.attempts, 2);
    assert_eq!(outcome.generation, 2);
    assert_eq!(tool_calls(tools.path(), "cc"), 2);
}

#[test]
fn persistent_transient_failure_gives_up_after_one_retry() {
    let tools = tempfile::tempdir().unwrap();
    let cache = tempfile::tempdir().unwrap();
    let cc = fake_tool(tools.path(), "cc", LICENSE_ERROR);
    let store = store(cache.path(), "gw0", "ci-1");
    let orch = Orchestrator::new(&store, cpu_toolchain(cc), runner(), options(IsolationMode::Shared, 1));

    let summary = orch
        .run(&[request(&kernel("gemm", "r1"), BuildConfig::new(BackendKind::Cpu))])
        .unwrap();
    assert_eq!(summary.outcomes[0].state, BuildState::Failed);
    assert_eq!(summary.outcomes[0].attempts, 2);
    assert_eq!(tool_calls(tools.path(), "cc"), 2);
}

#[test]
fn failing_key_does_not_abort_independent_keys() {
    let tools = tempfile::tempdir().unwrap();
    let cache = tempfile::tempdir().unwrap();
    let cc = fake_tool(
        tools.path(),
        "cc",
        &format!("case \"$*\" in *broken*) echo 'broken.cpp:1: error: expected ;'; exit 1;; esac\n{COMPILER}"),
    );
    let store = store(cache.path(), "gw0", "ci-1");
    let orch = Orchestrator::new(&store, cpu_toolchain(cc), runner(), options(IsolationMode::Shared, 2));

    let cpu = BuildConfig::new(BackendKind::Cpu);
    let summary = orch
        .run(&[
            request(&kernel("broken", "r1"), cpu.clone()),
            request(&kernel("axpy", "r1"), cpu.clone()),
            request(&kernel("gemm", "r1"), cpu),
        ])
        .unwrap();
    assert_eq!(summary.count(BuildState::Failed), 1);
    assert_eq!(summary.count(BuildState::Ready), 2);
    assert_eq!(summary.exit_code(), 1);

    let failed = &summary.outcomes[0];
    let rendered = summary.render();
    assert!(rendered.contains(&failed.label));
    assert!(rendered.contains(&failed.key.map(|k| k.to_string()).unwrap_or_default()));
    assert!(rendered.contains("expected ;"));
}

#[test]
fn fpga_build_exports_ip_into_the_slot() {
    let tools = tempfile::tempdir().unwrap();
    let cache = tempfile::tempdir().unwrap();
    let hls = fake_tool(tools.path(), "vitis_hls", HLS_TOOL);
    let store = store(cache.path(), "gw0", "ci-1");
    let toolchains = ToolchainPaths {
        hls,
        ..ToolchainPaths::default()
    };
    let orch = Orchestrator::new(&store, toolchains, runner(), options(IsolationMode::Shared, 1));
    let config = BuildConfig::fpga(FlowTarget::Vitis, "xcu250-figd2104-2L-e", Frequency::from_mhz(300.0));

    let summary = orch.run(&[request(&kernel("vadd", "r1"), config)]).unwrap();
    let outcome = &summary.outcomes[0];
    assert_eq!(outcome.state, BuildState::Ready, "{:?}", outcome.error);
    let slot_dir = outcome.slot_dir.clone().unwrap();
    assert!(slot_dir.join("gen-1/kiln_vadd/solution/impl/ip/component.xml").is_file());
    assert!(slot_dir.join("gen-1/script.tcl").is_file());
}

#[test]
fn rank_sweep_builds_one_slot_per_rank_count() {
    let tools = tempfile::tempdir().unwrap();
    let cache = tempfile::tempdir().unwrap();
    let mpicxx = fake_tool(tools.path(), "mpicxx", COMPILER);
    let store = store(cache.path(), "rank0", "ci-1");
    let toolchains = ToolchainPaths {
        mpi: mpicxx,
        ..ToolchainPaths::default()
    };
    let orch = Orchestrator::new(&store, toolchains, runner(), options(IsolationMode::Shared, 1));

    let requests = BuildRequest::rank_sweep(kernel("pdgemm", "r1"), &BuildConfig::distributed(1), 3);
    let summary = orch.run(&requests).unwrap();
    assert_eq!(summary.count(BuildState::Ready), 3);
    let keys: std::collections::BTreeSet<_> = summary.outcomes.iter().map(|o| o.key).collect();
    assert_eq!(keys.len(), 3);
    // The distributed toolchain is not reentrant; builds ran one at a time.
    assert_eq!(tool_calls(tools.path(), "mpicxx"), 3);
}

#[test]
fn failure_from_this_run_is_reported_and_next_run_rebuilds() {
    let tools = tempfile::tempdir().unwrap();
    let cache = tempfile::tempdir().unwrap();
    let bad = fake_tool(tools.path(), "bad", "exit 1");
    let good = fake_tool(tools.path(), "good", COMPILER);
    let gemm = kernel("gemm", "r1");
    let cpu = BuildConfig::new(BackendKind::Cpu);

    let first = store(cache.path(), "gw0", "ci-1");
    Orchestrator::new(&first, cpu_toolchain(bad), runner(), options(IsolationMode::Shared, 1))
        .run(&[request(&gemm, cpu.clone())])
        .unwrap();

    let sibling = store(cache.path(), "gw1", "ci-1");
    let summary = Orchestrator::new(&sibling, cpu_toolchain(good.clone()), runner(), options(IsolationMode::Shared, 1))
        .run(&[request(&gemm, cpu.clone())])
        .unwrap();
    assert_eq!(summary.outcomes[0].state, BuildState::Failed);
    assert_eq!(tool_calls(tools.path(), "good"), 0);

    let next = store(cache.path(), "gw0", "ci-2");
    let summary = Orchestrator::new(&next, cpu_toolchain(good), runner(), options(IsolationMode::Shared, 1))
        .run(&[request(&gemm, cpu)])
        .unwrap();
    assert_eq!(summary.outcomes[0].state, BuildState::Ready);
    assert_eq!(summary.outcomes[0].generation, 2);
}
