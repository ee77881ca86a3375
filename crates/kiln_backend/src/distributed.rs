//! Distributed backend: MPI programs linked against ScaLAPACK.

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

/// Library linked when the configuration names none.
const DEFAULT_SCALAPACK: &str = "scalapack";

/// Builds MPI kernels with `mpicxx`.
///
/// The rank count is compiled in as `KILN_NUM_RANKS`. The MPI runtime is not
/// safe to drive from several builds at once on one host, so the toolchain
/// is marked non-reentrant.
#[derive(Debug, Clone)]
pub struct DistributedAdapter {
    program: PathBuf,
}

impl DistributedAdapter {
    /// Creates the adapter for the given MPI compiler wrapper.
    pub fn new(program: PathBuf) -> Self {
        Self { program }
    }

    /// The `mpicxx` command line for already-written `sources`.
    pub fn invocation(&self, ir: &KernelIr, config: &BuildConfig, sources: &[String]) -> Invocation {
        let ranks = config.ranks.unwrap_or(1);
        let scalapack = config.scalapack_lib.as_deref().unwrap_or(DEFAULT_SCALAPACK);
        Invocation::new(&self.program)
            .arg(format!("-O{}", config.opt_level.trim()))
            .args(["-std=c++14", "-shared", "-fPIC"])
            .arg(format!("-DKILN_NUM_RANKS={ranks}"))
            .args(preprocessor_flags(config))
            .args(translation_units(sources))
            .args(["-o".to_string(), library_name(ir)])
            .arg(format!("-l{scalapack}"))
    }
}

impl BackendAdapter for DistributedAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::Distributed
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            hardware: "mpi",
            reentrant: false,
            timeout_class: TimeoutClass::Compile,
        }
    }

    fn toolchain_id(&self) -> String {
        program_id(BackendKind::Distributed, &self.program)
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
            BackendKind::Distributed.name(),
            &invocation,
            staging,
            self.capabilities().timeout_class,
        )?;
        collect_artifact(BackendKind::Distributed, staging, &library_name(ir), output)
    }
}
