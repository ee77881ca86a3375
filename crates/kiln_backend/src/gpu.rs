//! GPU backend: CUDA sources compiled into a shared library with `nvcc`.

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

/// Builds CUDA kernels into `lib<name>.so` with `nvcc --shared`.
#[derive(Debug, Clone)]
pub struct GpuAdapter {
    program: PathBuf,
}

impl GpuAdapter {
    /// Creates the adapter for the given CUDA compiler.
    pub fn new(program: PathBuf) -> Self {
        Self { program }
    }

    /// The `nvcc` command line for already-written `sources`.
    pub fn invocation(&self, ir: &KernelIr, config: &BuildConfig, sources: &[String]) -> Invocation {
        let mut inv = Invocation::new(&self.program)
            .arg(format!("-O{}", config.opt_level.trim()))
            .args(["-std=c++14", "--shared", "-Xcompiler", "-fPIC"]);
        if let Some(arch) = config.gpu_arch.as_deref() {
            inv = inv.arg(format!("-arch={arch}"));
        }
        inv.args(preprocessor_flags(config))
            .args(translation_units(sources))
            .args(["-o".to_string(), library_name(ir)])
    }
}

impl BackendAdapter for GpuAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::Gpu
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            hardware: "gpu",
            reentrant: true,
            timeout_class: TimeoutClass::Compile,
        }
    }

    fn toolchain_id(&self) -> String {
        program_id(BackendKind::Gpu, &self.program)
    }

    fn generate(
        &self,
        ir: &KernelIr,
        config: &BuildConfig,
        staging: &Path,
        runner: &ToolchainRunner,
    ) -> Result<BackendArtifact, BackendError> {
        let sources = write_sources(ir, staging, Some("cu"))?;
        let invocation = self.invocation(ir, config, &sources);
        write_build_script(staging, &invocation)?;
        let output = runner.run(
            BackendKind::Gpu.name(),
            &invocation,
            staging,
            self.capabilities().timeout_class,
        )?;
        collect_artifact(BackendKind::Gpu, staging, &library_name(ir), output)
    }
}
