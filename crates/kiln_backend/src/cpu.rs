//! Host CPU backend: a position-independent shared library built with the
//! configured C++ compiler.

use std::path::{Path, PathBuf};

use kiln_cache::BackendArtifact;
use kiln_config::{BackendKind, BuildConfig};

use crate::adapter::{
    collect_artifact, library_name, preprocessor_flags, program_id, translation_units,
    write_build_script, write_sources, BackendAdapter, Capabilities,
};
use crate::error::BackendError;
use crate::ir::KernelIr;
use crate::runner::{Invocation, TimeoutClass, ToolchainRunner};

/// Builds kernels into `lib<name>.so` with `c++ -O<level> -shared -fPIC`.
#[derive(Debug, Clone)]
pub struct CpuAdapter {
    program: PathBuf,
}

impl CpuAdapter {
    /// Creates the adapter for the given compiler executable.
    pub fn new(program: PathBuf) -> Self {
        Self { program }
    }

    /// The compiler command line for already-written `sources`.
    pub fn invocation(&self, ir: &KernelIr, config: &BuildConfig, sources: &[String]) -> Invocation {
        Invocation::new(&self.program)
            .arg(format!("-O{}", config.opt_level.trim()))
            .args(["-std=c++14", "-shared", "-fPIC"])
            .args(preprocessor_flags(config))
            .args(translation_units(sources))
            .args(["-o".to_string(), library_name(ir)])
    }
}

impl BackendAdapter for CpuAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::Cpu
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            hardware: "host",
            reentrant: true,
            timeout_class: TimeoutClass::Compile,
        }
    }

    fn toolchain_id(&self) -> String {
        program_id(BackendKind::Cpu, &self.program)
    }

    fn generate(
        &self,
        ir: &KernelIr,
        config: &BuildConfig,
        staging: &Path,
        runner: &ToolchainRunner,
    ) -> Result<BackendArtifact, BackendError> {
        let sources = write_sources(ir, staging, None)?;
        let invocation = self.invocation(ir, config, &sources);
        write_build_script(staging, &invocation)?;
        let output = runner.run(
            BackendKind::Cpu.name(),
            &invocation,
            staging,
            self.capabilities().timeout_class,
        )?;
        collect_artifact(BackendKind::Cpu, staging, &library_name(ir), output)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::adapter::testing::{fake_compiler, fake_tool, runner};
    use crate::ir::SourceUnit;

    fn axpy() -> KernelIr {
        KernelIr::new(
            "axpy",
            "r1",
            vec![
                SourceUnit::new("axpy.cpp", "void axpy() {}"),
                SourceUnit::new("axpy.h", "void axpy();"),
            ],
        )
    }

    #[test]
    fn invocation_flags() {
        let adapter = CpuAdapter::new(PathBuf::from("c++"));
        let config = BuildConfig::new(BackendKind::Cpu).with_define("N", "8");
        let inv = adapter.invocation(&axpy(), &config, &["src/axpy.cpp".to_string()]);
        assert_eq!(
            inv.args,
            vec!["-O3", "-std=c++14", "-shared", "-fPIC", "-DN=8", "src/axpy.cpp", "-o", "libaxpy.so"]
        );
    }

    #[test]
    fn generate_builds_library() {
        let tools = tempfile::tempdir().unwrap();
        let staging = tempfile::tempdir().unwrap();
        let adapter = CpuAdapter::new(fake_compiler(tools.path()));
        let artifact = adapter
            .generate(&axpy(), &BuildConfig::new(BackendKind::Cpu), staging.path(), &runner())
            .unwrap();

        assert_eq!(artifact.success_artifact, "libaxpy.so");
        assert_eq!(artifact.exit_code, 0);
        assert!(artifact.files.contains_key("src/axpy.cpp"));
        assert!(artifact.files.contains_key("src/axpy.h"));
        assert!(artifact.files.contains_key("build.sh"));
        assert!(!artifact.files.contains_key("toolchain.log"));
        assert!(artifact.log_tail.iter().any(|l| l.contains("-shared -fPIC")));
    }

    #[test]
    fn compiler_error_is_reported_with_log() {
        let tools = tempfile::tempdir().unwrap();
        let staging = tempfile::tempdir().unwrap();
        let cc = fake_tool(tools.path(), "bad-cc", "echo 'axpy.cpp:1: error: boom' >&2; exit 1");
        let err = CpuAdapter::new(cc)
            .generate(&axpy(), &BuildConfig::new(BackendKind::Cpu), staging.path(), &runner())
            .unwrap_err();
        assert!(matches!(err, BackendError::ToolchainFailure { exit_code: Some(1), .. }));
        assert!(err.log_tail().iter().any(|l| l.contains("boom")));
        assert!(staging.path().join("src/axpy.cpp").exists());
    }
}
