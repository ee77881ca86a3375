//! Scenario helpers for the Kiln conformance tests.
//!
//! Provides fake toolchains written as shell scripts, kernel requests, and
//! orchestrator construction so that the integration tests read as
//! scenarios rather than setup.

#![warn(missing_docs)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use kiln_backend::{KernelIr, SourceUnit, ToolchainRunner, TransientPredicate};
use kiln_build::{BuildRequest, ContentionPolicy, OrchestratorOptions};
use kiln_cache::CacheStore;
use kiln_common::{RunId, WorkerId};
use kiln_config::{BuildConfig, IsolationMode, RetryConfig, TimeoutConfig};

/// Shell body of a compiler that creates the file named by `-o`.
pub const COMPILER: &str = r#"out=""
while [ $# -gt 0 ]; do
  if [ "$1" = "-o" ]; then out="$2"; fi
  shift
done
touch "$out""#;

/// Shell body of an HLS tool that exports the IP named in its Tcl script.
pub const HLS_TOOL: &str = r#"script="$2"
project=$(sed -n 's/^open_project -reset //p' "$script")
mkdir -p "$project/solution/impl/ip"
echo "ip" > "$project/solution/impl/ip/component.xml""#;

/// Writes an executable shell script named `name` into `dir`.
///
/// Every invocation appends a line to `<name>.calls` next to the script, so
/// tests can count toolchain runs.
#[cfg(unix)]
pub fn fake_tool(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    let calls = dir.join(format!("{name}.calls"));
    let script = format!("#!/bin/sh\necho run >> '{}'\n{body}\n", calls.display());
    std::fs::write(&path, script).expect("write fake tool");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
        .expect("chmod fake tool");
    path
}

/// Number of times the fake tool `name` in `dir` was run.
pub fn tool_calls(dir: &Path, name: &str) -> usize {
    std::fs::read_to_string(dir.join(format!("{name}.calls")))
        .map(|s| s.lines().count())
        .unwrap_or(0)
}

/// A single-source kernel.
pub fn kernel(name: &str, revision: &str) -> Arc<KernelIr> {
    Arc::new(KernelIr::new(
        name,
        revision,
        vec![SourceUnit::new(
            &format!("{name}.cpp"),
            &format!("extern \"C\" void {name}() {{}}"),
        )],
    ))
}

/// A request for `kernel` with `config`.
pub fn request(kernel: &Arc<KernelIr>, config: BuildConfig) -> BuildRequest {
    BuildRequest::new(Arc::clone(kernel), config)
}

/// Opens a store for a fresh worker labelled `label` in `run`.
pub fn store(root: &Path, label: &str, run: &str) -> CacheStore {
    CacheStore::open(root, WorkerId::new(label), RunId::new(run)).expect("open store")
}

/// Options for scenario runs: given mode, waiting contention, fast backoff.
pub fn options(mode: IsolationMode, jobs: usize) -> OrchestratorOptions {
    OrchestratorOptions {
        mode,
        contention: ContentionPolicy::Wait {
            timeout: Duration::from_secs(30),
            poll: Duration::from_millis(20),
        },
        store_attempts: 3,
        transient_backoff: Duration::from_millis(1),
        jobs: Some(jobs),
    }
}

/// A runner with the default transient signatures and a fast poll.
pub fn runner() -> ToolchainRunner {
    let transient = TransientPredicate::new(&RetryConfig::default().transient_patterns)
        .expect("default transient patterns compile");
    ToolchainRunner::new(&TimeoutConfig::default())
        .with_transient(transient)
        .with_poll_interval(Duration::from_millis(10))
}
