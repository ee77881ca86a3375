//! Configuration types deserialized from `kiln.toml`.

use kiln_common::Frequency;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// The top-level configuration parsed from `kiln.toml`.
///
/// Every section is optional; a missing file yields [`ProjectConfig::default`].
#[derive(Debug, Default, Clone, Deserialize)]
pub struct ProjectConfig {
    /// Cache location, isolation mode, and lock policy.
    #[serde(default)]
    pub cache: CacheConfig,
    /// Paths to the external toolchain executables.
    #[serde(default)]
    pub toolchains: ToolchainPaths,
    /// Per-class toolchain timeouts.
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// Transient-failure detection and retry settings.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Coverage aggregation and reporting settings.
    #[serde(default)]
    pub report: ReportConfig,
    /// Run-level settings (revision marker, backend filter).
    #[serde(default)]
    pub run: RunConfig,
    /// Named kernels whose lowered sources are built.
    #[serde(default)]
    pub kernels: BTreeMap<String, KernelSpec>,
    /// Named backend profiles (e.g. `cuda_v100`, `u250_vitis`).
    #[serde(default)]
    pub backends: BTreeMap<String, BuildConfig>,
}

/// Whether concurrent builds of one cache key share a slot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IsolationMode {
    /// One slot per key, reused by every worker of the run.
    #[default]
    #[serde(alias = "single")]
    Shared,
    /// Every worker gets its own slot, even for identical keys.
    #[serde(alias = "unique")]
    Isolated,
}

impl FromStr for IsolationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "shared" | "single" => Ok(Self::Shared),
            "isolated" | "unique" => Ok(Self::Isolated),
            other => Err(format!("unknown isolation mode '{other}'")),
        }
    }
}

impl fmt::Display for IsolationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shared => f.write_str("shared"),
            Self::Isolated => f.write_str("isolated"),
        }
    }
}

/// What a shared-mode worker does when another worker is populating its slot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentionMode {
    /// Wait (bounded) for the other worker to finish.
    #[default]
    Wait,
    /// Report `AlreadyPopulating` immediately.
    FailFast,
}

/// Cache store settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Root directory of the cache tree.
    pub root: PathBuf,
    /// Slot isolation mode.
    pub mode: IsolationMode,
    /// Behavior on populate contention in shared mode.
    pub contention: ContentionMode,
    /// Maximum time to wait for another worker's populate.
    pub wait_timeout_secs: u64,
    /// Poll interval while waiting.
    pub poll_interval_ms: u64,
    /// Age after which a populate lock is reclaimable regardless of owner liveness.
    pub stale_lock_secs: u64,
    /// Retention threshold used by `kiln evict` when none is given.
    pub retention_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(".kilncache"),
            mode: IsolationMode::Shared,
            contention: ContentionMode::Wait,
            wait_timeout_secs: 30 * 60,
            poll_interval_ms: 250,
            stale_lock_secs: 6 * 60 * 60,
            retention_secs: 7 * 24 * 60 * 60,
        }
    }
}

impl CacheConfig {
    /// Returns the populate-lock staleness bound.
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_lock_secs)
    }
}

/// Executables used by each backend adapter.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ToolchainPaths {
    /// Host C++ compiler.
    pub cpu: PathBuf,
    /// CUDA compiler driver.
    pub gpu: PathBuf,
    /// MPI compiler wrapper.
    pub mpi: PathBuf,
    /// High-level synthesis tool.
    pub hls: PathBuf,
}

impl Default for ToolchainPaths {
    fn default() -> Self {
        Self {
            cpu: PathBuf::from("c++"),
            gpu: PathBuf::from("nvcc"),
            mpi: PathBuf::from("mpicxx"),
            hls: PathBuf::from("vitis_hls"),
        }
    }
}

impl ToolchainPaths {
    /// Returns the executable configured for a backend kind.
    pub fn for_kind(&self, kind: BackendKind) -> &PathBuf {
        match kind {
            BackendKind::Cpu => &self.cpu,
            BackendKind::Gpu => &self.gpu,
            BackendKind::Distributed => &self.mpi,
            BackendKind::Fpga => &self.hls,
        }
    }
}

/// Timeout bounds per toolchain class.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Bound for compilation flows (CPU, GPU, distributed).
    pub compile_secs: u64,
    /// Bound for synthesis flows (FPGA HLS).
    pub synthesis_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            compile_secs: 10 * 60,
            synthesis_secs: 4 * 60 * 60,
        }
    }
}

/// Transient-failure detection and retry policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Regular expressions matched against the toolchain log tail. A match
    /// classifies a failure as transient.
    pub transient_patterns: Vec<String>,
    /// Delay before the single retry of a transient failure.
    pub backoff_ms: u64,
    /// Attempts for store-protocol operations (lock contention, I/O races).
    pub store_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            transient_patterns: vec![
                r"(?i)unable to (contact|connect to) (the )?license server".to_string(),
                r"(?i)license checkout failed".to_string(),
                r"(?i)FLEXnet Licensing error".to_string(),
                r"(?i)resource temporarily unavailable".to_string(),
            ],
            backoff_ms: 2_000,
            store_attempts: 3,
        }
    }
}

/// Coverage aggregation settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Directory scanned for coverage shards. Defaults to the cache root.
    pub dir: Option<PathBuf>,
    /// Number of shards the run expects, when known up front.
    pub expected_shards: Option<usize>,
    /// Reporting endpoint as `host:port`.
    pub endpoint: Option<String>,
    /// Reachability probe timeout.
    pub probe_timeout_ms: u64,
    /// Uploader command; the report path and the endpoint are appended.
    pub uploader: Vec<String>,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            dir: None,
            expected_shards: None,
            endpoint: None,
            probe_timeout_ms: 2_000,
            uploader: Vec::new(),
        }
    }
}

/// Run-level settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Source revision marker mixed into every kernel identity.
    pub revision: Option<String>,
    /// Backend kinds exercised in this run; empty means all.
    pub backends: Vec<BackendKind>,
    /// Worker threads for the orchestrator; `None` lets rayon decide.
    pub jobs: Option<usize>,
}

/// A kernel entry: the lowered sources handed to the backend adapters.
#[derive(Debug, Clone, Deserialize)]
pub struct KernelSpec {
    /// Source files, relative to the project directory.
    pub sources: Vec<PathBuf>,
    /// Top-level function name; defaults to the kernel name.
    #[serde(default)]
    pub top: Option<String>,
}

/// The backend families Kiln can build for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Host CPU shared library.
    Cpu,
    /// GPU / accelerator code via the CUDA compiler.
    #[serde(alias = "cuda")]
    Gpu,
    /// MPI-distributed code linked against ScaLAPACK.
    #[serde(alias = "mpi")]
    Distributed,
    /// FPGA high-level synthesis.
    #[serde(alias = "hls", alias = "xilinx")]
    Fpga,
}

impl BackendKind {
    /// All backend kinds, in a fixed order.
    pub const ALL: [BackendKind; 4] = [Self::Cpu, Self::Gpu, Self::Distributed, Self::Fpga];

    /// Returns the canonical lowercase name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Gpu => "gpu",
            Self::Distributed => "distributed",
            Self::Fpga => "fpga",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cpu" => Ok(Self::Cpu),
            "gpu" | "cuda" => Ok(Self::Gpu),
            "distributed" | "mpi" => Ok(Self::Distributed),
            "fpga" | "hls" | "xilinx" => Ok(Self::Fpga),
            other => Err(other.to_string()),
        }
    }
}

/// HLS flow target passed to `open_solution -flow_target`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowTarget {
    /// Vivado IP flow.
    Vivado,
    /// Vitis kernel flow.
    Vitis,
}

impl fmt::Display for FlowTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Vivado => f.write_str("vivado"),
            Self::Vitis => f.write_str("vitis"),
        }
    }
}

/// Build configuration for one backend: the kind plus every option that can
/// change generated output.
///
/// Options belonging to other backend kinds are rejected by
/// [`BuildConfig::check_compatibility`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Target backend.
    pub backend: BackendKind,
    /// Optimization level passed to the compiler (`-O<level>`).
    #[serde(default = "default_opt_level")]
    pub opt_level: String,
    /// Preprocessor defines.
    #[serde(default)]
    pub defines: BTreeMap<String, String>,
    /// Extra include directories.
    #[serde(default)]
    pub include_dirs: Vec<String>,
    /// GPU architecture (e.g. `sm_70`). GPU only.
    #[serde(default)]
    pub gpu_arch: Option<String>,
    /// MPI rank count. Distributed only.
    #[serde(default)]
    pub ranks: Option<u32>,
    /// ScaLAPACK library to link. Distributed only.
    #[serde(default)]
    pub scalapack_lib: Option<String>,
    /// HLS flow target. FPGA only, required.
    #[serde(default)]
    pub flow_target: Option<FlowTarget>,
    /// Synthesis part number. FPGA only, required.
    #[serde(default)]
    pub part: Option<String>,
    /// Target clock. FPGA only, required.
    #[serde(default)]
    pub clock: Option<Frequency>,
}

fn default_opt_level() -> String {
    "3".to_string()
}

impl BuildConfig {
    /// Creates a configuration for `backend` with no backend-specific options.
    pub fn new(backend: BackendKind) -> Self {
        Self {
            backend,
            opt_level: default_opt_level(),
            defines: BTreeMap::new(),
            include_dirs: Vec::new(),
            gpu_arch: None,
            ranks: None,
            scalapack_lib: None,
            flow_target: None,
            part: None,
            clock: None,
        }
    }

    /// Creates a complete FPGA configuration.
    pub fn fpga(flow_target: FlowTarget, part: &str, clock: Frequency) -> Self {
        Self {
            flow_target: Some(flow_target),
            part: Some(part.to_string()),
            clock: Some(clock),
            ..Self::new(BackendKind::Fpga)
        }
    }

    /// Creates a distributed configuration with the given rank count.
    pub fn distributed(ranks: u32) -> Self {
        Self {
            ranks: Some(ranks),
            ..Self::new(BackendKind::Distributed)
        }
    }

    /// Adds a preprocessor define.
    pub fn with_define(mut self, name: &str, value: &str) -> Self {
        self.defines.insert(name.to_string(), value.to_string());
        self
    }

    /// Checks that every option set belongs to the stated backend kind and
    /// that required options are present.
    pub fn check_compatibility(&self) -> Result<(), String> {
        let kind = self.backend;
        let foreign = |option: &str, owner: BackendKind| {
            format!("option '{option}' applies to the {owner} backend, not {kind}")
        };
        if kind != BackendKind::Gpu && self.gpu_arch.is_some() {
            return Err(foreign("gpu_arch", BackendKind::Gpu));
        }
        if kind != BackendKind::Distributed {
            if self.ranks.is_some() {
                return Err(foreign("ranks", BackendKind::Distributed));
            }
            if self.scalapack_lib.is_some() {
                return Err(foreign("scalapack_lib", BackendKind::Distributed));
            }
        }
        if kind != BackendKind::Fpga {
            if self.flow_target.is_some() {
                return Err(foreign("flow_target", BackendKind::Fpga));
            }
            if self.part.is_some() {
                return Err(foreign("part", BackendKind::Fpga));
            }
            if self.clock.is_some() {
                return Err(foreign("clock", BackendKind::Fpga));
            }
        }
        match kind {
            BackendKind::Fpga => {
                if self.flow_target.is_none() {
                    return Err("fpga backend requires 'flow_target'".to_string());
                }
                if self.part.as_deref().map_or(true, |p| p.trim().is_empty()) {
                    return Err("fpga backend requires 'part'".to_string());
                }
                match self.clock {
                    None => return Err("fpga backend requires 'clock'".to_string()),
                    Some(clock) if !clock.is_valid_clock() => {
                        return Err(format!("clock '{clock}' must be positive"));
                    }
                    Some(_) => {}
                }
            }
            BackendKind::Distributed => {
                if self.ranks == Some(0) {
                    return Err("ranks must be at least 1".to_string());
                }
            }
            BackendKind::Cpu | BackendKind::Gpu => {}
        }
        if self.opt_level.trim().is_empty() {
            return Err("opt_level must not be empty".to_string());
        }
        Ok(())
    }
}
