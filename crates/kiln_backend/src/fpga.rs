//! FPGA backend: Vivado/Vitis HLS synthesis exported as packaged IP.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use kiln_cache::BackendArtifact;
use kiln_config::{BackendKind, BuildConfig};

use crate::adapter::{
    collect_artifact, preprocessor_flags, translation_units, write_build_script, write_sources,
    BackendAdapter, Capabilities,
};
use crate::error::BackendError;
use crate::ir::KernelIr;
use crate::runner::{Invocation, TimeoutClass, ToolchainRunner};

/// Name of the generated HLS script.
pub const SCRIPT_FILE: &str = "script.tcl";

/// Name of the HLS solution.
const SOLUTION: &str = "solution";

/// Flags every synthesized source is compiled with.
const SYNTHESIS_CFLAGS: &[&str] = &[
    "-std=c++14",
    "-DKILN_SYNTHESIS",
    "-DKILN_XILINX",
    "-DHLSLIB_SYNTHESIS",
    "-DHLSLIB_XILINX",
];

/// Synthesizes kernels with the HLS tool driven by a generated Tcl script.
#[derive(Debug, Clone)]
pub struct FpgaAdapter {
    program: PathBuf,
}

impl FpgaAdapter {
    /// Creates the adapter for the given HLS executable (`vitis_hls`,
    /// `vivado_hls`).
    pub fn new(program: PathBuf) -> Self {
        Self { program }
    }

    /// HLS project directory for a kernel.
    pub fn project_name(ir: &KernelIr) -> String {
        format!("kiln_{}", ir.name())
    }

    /// Relative path of the exported IP directory.
    pub fn ip_dir(ir: &KernelIr) -> String {
        format!("{}/{SOLUTION}/impl/ip", Self::project_name(ir))
    }

    /// Renders `script.tcl`.
    ///
    /// Fails with [`BackendError::ToolchainFailure`] if a synthesis option is
    /// missing; key computation rejects such configurations earlier.
    pub fn render_script(
        ir: &KernelIr,
        config: &BuildConfig,
        sources: &[String],
    ) -> Result<String, BackendError> {
        let missing = |option: &str| BackendError::ToolchainFailure {
            tool: BackendKind::Fpga.name().to_string(),
            reason: format!("missing synthesis option '{option}'"),
            exit_code: None,
            log_tail: Vec::new(),
        };
        let flow_target = config.flow_target.ok_or_else(|| missing("flow_target"))?;
        let part = config.part.as_deref().ok_or_else(|| missing("part"))?;
        let clock = config.clock.ok_or_else(|| missing("clock"))?;

        let mut cflags: Vec<String> = SYNTHESIS_CFLAGS.iter().map(|f| f.to_string()).collect();
        cflags.push(format!("-O{}", config.opt_level.trim()));
        cflags.extend(preprocessor_flags(config));
        let cflags = cflags.join(" ");

        let mut tcl = String::new();
        let _ = writeln!(tcl, "open_project -reset {}", Self::project_name(ir));
        let _ = writeln!(tcl, "set_top {}", ir.top());
        for source in translation_units(sources) {
            let _ = writeln!(tcl, "add_files -cflags \"{cflags}\" \"{source}\"");
        }
        let _ = writeln!(tcl, "open_solution -reset -flow_target {flow_target} {SOLUTION}");
        let _ = writeln!(tcl, "set_part {part}");
        let _ = writeln!(tcl, "create_clock -period {} -name default", format_period(clock.period_ns()));
        let _ = writeln!(tcl, "csynth_design");
        let _ = writeln!(tcl, "export_design -format ip_catalog");
        let _ = writeln!(tcl, "exit");
        Ok(tcl)
    }
}

/// Formats a clock period in nanoseconds without trailing zeros.
fn format_period(ns: f64) -> String {
    let s = format!("{ns:.3}");
    s.trim_end_matches('0').trim_end_matches('.').to_string()
}

impl BackendAdapter for FpgaAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::Fpga
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            hardware: "fpga",
            reentrant: false,
            timeout_class: TimeoutClass::Synthesis,
        }
    }

    fn toolchain_id(&self) -> String {
        // One license pool per host, whichever HLS binary is used.
        "fpga:hls".to_string()
    }

    fn generate(
        &self,
        ir: &KernelIr,
        config: &BuildConfig,
        staging: &Path,
        runner: &ToolchainRunner,
    ) -> Result<BackendArtifact, BackendError> {
        let sources = write_sources(ir, staging, None)?;
        let script = Self::render_script(ir, config, &sources)?;
        let script_path = staging.join(SCRIPT_FILE);
        std::fs::write(&script_path, script).map_err(|e| BackendError::io(&script_path, e))?;

        let invocation = Invocation::new(&self.program).args(["-f", SCRIPT_FILE]);
        write_build_script(staging, &invocation)?;
        let output = runner.run(
            BackendKind::Fpga.name(),
            &invocation,
            staging,
            self.capabilities().timeout_class,
        )?;
        collect_artifact(BackendKind::Fpga, staging, &Self::ip_dir(ir), output)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::adapter::testing::{fake_tool, runner};
    use crate::ir::SourceUnit;
    use kiln_common::Frequency;
    use kiln_config::FlowTarget;

    fn vadd() -> KernelIr {
        KernelIr::new("vadd", "r1", vec![SourceUnit::new("vadd.cpp", "void vadd() {}")])
    }

    fn u250() -> BuildConfig {
        BuildConfig::fpga(
            FlowTarget::Vitis,
            "xcu250-figd2104-2L-e",
            Frequency::from_mhz(300.0),
        )
        .with_define("W", "16")
    }

    #[test]
    fn script_follows_hls_flow() {
        let tcl = FpgaAdapter::render_script(&vadd(), &u250(), &["src/vadd.cpp".to_string()]).unwrap();
        let lines: Vec<&str> = tcl.lines().collect();
        assert_eq!(lines[0], "open_project -reset kiln_vadd");
        assert_eq!(lines[1], "set_top vadd");
        assert_eq!(
            lines[2],
            "add_files -cflags \"-std=c++14 -DKILN_SYNTHESIS -DKILN_XILINX -DHLSLIB_SYNTHESIS \
             -DHLSLIB_XILINX -O3 -DW=16\" \"src/vadd.cpp\""
        );
        assert_eq!(lines[3], "open_solution -reset -flow_target vitis solution");
        assert_eq!(lines[4], "set_part xcu250-figd2104-2L-e");
        assert_eq!(lines[5], "create_clock -period 3.333 -name default");
        assert_eq!(lines[6], "csynth_design");
        assert_eq!(lines[7], "export_design -format ip_catalog");
    }

    #[test]
    fn period_formatting() {
        assert_eq!(format_period(4.0), "4");
        assert_eq!(format_period(3.3333333), "3.333");
        assert_eq!(format_period(2.5), "2.5");
    }

    #[test]
    fn missing_part_is_rejected() {
        let mut config = u250();
        config.part = None;
        let err = FpgaAdapter::render_script(&vadd(), &config, &[]).unwrap_err();
        assert!(err.to_string().contains("part"));
    }

    #[test]
    fn success_requires_exported_ip() {
        let tools = tempfile::tempdir().unwrap();
        let hls = fake_tool(
            tools.path(),
            "fake-hls",
            "echo \"INFO: [HLS 200-10] Running $1 $2\"\nmkdir -p kiln_vadd/solution/impl/ip && touch kiln_vadd/solution/impl/ip/component.xml",
        );
        let staging = tempfile::tempdir().unwrap();
        let artifact = FpgaAdapter::new(hls)
            .generate(&vadd(), &u250(), staging.path(), &runner())
            .unwrap();
        assert_eq!(artifact.success_artifact, "kiln_vadd/solution/impl/ip");
        assert!(artifact.files.contains_key("kiln_vadd/solution/impl/ip/component.xml"));
        assert!(artifact.files.contains_key("script.tcl"));
    }

    #[test]
    fn synthesis_without_ip_fails() {
        let tools = tempfile::tempdir().unwrap();
        let hls = fake_tool(tools.path(), "fake-hls", "echo 'csynth done'");
        let staging = tempfile::tempdir().unwrap();
        let err = FpgaAdapter::new(hls)
            .generate(&vadd(), &u250(), staging.path(), &runner())
            .unwrap_err();
        assert!(matches!(err, BackendError::ToolchainFailure { exit_code: Some(0), .. }));
    }
}
