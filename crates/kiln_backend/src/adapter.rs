//! The backend adapter trait, its factory, and staging helpers shared by
//! the adapters.

use std::fmt::Debug;
use std::path::Path;

use kiln_cache::{hash_tree, BackendArtifact};
use kiln_config::{BackendKind, BuildConfig, ToolchainPaths};

use crate::cpu::CpuAdapter;
use crate::distributed::DistributedAdapter;
use crate::error::BackendError;
use crate::fpga::FpgaAdapter;
use crate::gpu::GpuAdapter;
use crate::ir::KernelIr;
use crate::runner::{Invocation, RunOutput, TimeoutClass, ToolchainRunner};

/// Subdirectory of the staging tree that receives the lowered sources.
pub const SOURCE_DIR: &str = "src";

/// Scheduling facts about an adapter's toolchain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Hardware group the backend targets. Builds for different groups
    /// never contend for the same toolchain.
    pub hardware: &'static str,
    /// Whether several builds may run the toolchain concurrently.
    pub reentrant: bool,
    /// Timeout bound the toolchain runs under.
    pub timeout_class: TimeoutClass,
}

/// A backend that can populate a cache slot for a kernel.
pub trait BackendAdapter: Send + Sync + Debug {
    /// The backend family this adapter builds for.
    fn kind(&self) -> BackendKind;

    /// Scheduling facts about the toolchain.
    fn capabilities(&self) -> Capabilities;

    /// Identifies the toolchain installation; builds sharing an id are
    /// serialized when the toolchain is not reentrant.
    fn toolchain_id(&self) -> String;

    /// Writes sources and build scripts into `staging`, runs the toolchain,
    /// and describes what it produced.
    ///
    /// Partial output stays in `staging`; the caller decides whether the
    /// slot is committed or failed.
    fn generate(
        &self,
        ir: &KernelIr,
        config: &BuildConfig,
        staging: &Path,
        runner: &ToolchainRunner,
    ) -> Result<BackendArtifact, BackendError>;
}

/// Creates the adapter for a backend kind, using the configured toolchains.
pub fn create_adapter(kind: BackendKind, toolchains: &ToolchainPaths) -> Box<dyn BackendAdapter> {
    let program = toolchains.for_kind(kind).clone();
    match kind {
        BackendKind::Cpu => Box::new(CpuAdapter::new(program)),
        BackendKind::Gpu => Box::new(GpuAdapter::new(program)),
        BackendKind::Distributed => Box::new(DistributedAdapter::new(program)),
        BackendKind::Fpga => Box::new(FpgaAdapter::new(program)),
    }
}

/// Writes every source unit below `staging/src`, returning the relative
/// paths in order. `extension` replaces C++ extensions when set.
pub(crate) fn write_sources(
    ir: &KernelIr,
    staging: &Path,
    extension: Option<&str>,
) -> Result<Vec<String>, BackendError> {
    let src_dir = staging.join(SOURCE_DIR);
    std::fs::create_dir_all(&src_dir).map_err(|e| BackendError::io(&src_dir, e))?;
    let mut written = Vec::with_capacity(ir.sources.len());
    for unit in &ir.sources {
        let file_name = match extension {
            Some(ext) => with_extension(&unit.file_name, ext),
            None => unit.file_name.clone(),
        };
        let path = src_dir.join(&file_name);
        std::fs::write(&path, &unit.code).map_err(|e| BackendError::io(&path, e))?;
        written.push(format!("{SOURCE_DIR}/{file_name}"));
    }
    Ok(written)
}

fn with_extension(file_name: &str, ext: &str) -> String {
    match file_name.rsplit_once('.') {
        Some((stem, "cpp" | "cc" | "cxx")) => format!("{stem}.{ext}"),
        _ => file_name.to_string(),
    }
}

/// Returns the sources handed to the compiler; headers are only written.
pub(crate) fn translation_units(sources: &[String]) -> Vec<String> {
    sources
        .iter()
        .filter(|s| !matches!(s.rsplit_once('.'), Some((_, "h" | "hpp" | "hh" | "inl"))))
        .cloned()
        .collect()
}

/// Shared-library name produced for a kernel by the compiler backends.
pub(crate) fn library_name(ir: &KernelIr) -> String {
    format!("lib{}.so", ir.name())
}

/// `-I` and `-D` flags from a build configuration.
pub(crate) fn preprocessor_flags(config: &BuildConfig) -> Vec<String> {
    let includes = config.include_dirs.iter().map(|d| format!("-I{d}"));
    let defines = config.defines.iter().map(|(name, value)| {
        if value.is_empty() {
            format!("-D{name}")
        } else {
            format!("-D{name}={value}")
        }
    });
    includes.chain(defines).collect()
}

/// Writes an executable `build.sh` that reproduces `invocation` by hand.
pub(crate) fn write_build_script(staging: &Path, invocation: &Invocation) -> Result<(), BackendError> {
    let path = staging.join("build.sh");
    let script = format!(
        "#!/bin/sh\nset -e\ncd \"$(dirname \"$0\")\"\n{}\n",
        invocation.shell_line()
    );
    std::fs::write(&path, script).map_err(|e| BackendError::io(&path, e))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
            .map_err(|e| BackendError::io(&path, e))?;
    }
    Ok(())
}

/// Checks the success artifact exists and hashes the staging tree.
pub(crate) fn collect_artifact(
    kind: BackendKind,
    staging: &Path,
    success_artifact: &str,
    output: RunOutput,
) -> Result<BackendArtifact, BackendError> {
    if !staging.join(success_artifact).exists() {
        return Err(BackendError::ToolchainFailure {
            tool: kind.name().to_string(),
            reason: format!("expected output '{success_artifact}' was not produced"),
            exit_code: Some(output.exit_code),
            log_tail: output.log_tail,
        });
    }
    Ok(BackendArtifact {
        backend: kind,
        files: hash_tree(staging)?,
        success_artifact: success_artifact.to_string(),
        exit_code: output.exit_code,
        log_tail: output.log_tail,
    })
}

/// Toolchain id shared by the host compiler adapters: the program path.
pub(crate) fn program_id(kind: BackendKind, program: &Path) -> String {
    format!("{kind}:{}", program.display())
}

#[cfg(all(test, unix))]
pub(crate) mod testing {
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};
    use std::time::Duration;

    use kiln_config::TimeoutConfig;

    use crate::runner::ToolchainRunner;

    /// Writes an executable shell script standing in for a toolchain.
    pub(crate) fn fake_tool(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    /// A compiler stand-in that echoes its arguments and creates the `-o`
    /// output.
    pub(crate) fn fake_compiler(dir: &Path) -> PathBuf {
        fake_tool(
            dir,
            "fake-cc",
            r#"echo "fake-cc $*"
out=""
while [ $# -gt 0 ]; do
  if [ "$1" = "-o" ]; then out="$2"; fi
  shift
done
[ -n "$out" ] && touch "$out""#,
        )
    }

    pub(crate) fn runner() -> ToolchainRunner {
        ToolchainRunner::new(&TimeoutConfig::default()).with_poll_interval(Duration::from_millis(10))
    }
}
