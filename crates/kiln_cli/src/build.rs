//! `kiln build`: build kernels for the selected backends through the cache.

use std::sync::Arc;

use kiln_backend::KernelIr;
use kiln_build::{BuildRequest, Orchestrator};
use kiln_config::{selected_backends, BackendKind, ContentionMode};

use crate::interrupt;
use crate::project::{load_project, Project};
use crate::{BuildArgs, GlobalArgs};

/// Runs the `kiln build` command.
///
/// Returns exit code 0 if every request was built or reused, 1 if any
/// failed or the run was cancelled.
pub fn run(args: &BuildArgs, global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let mut project = load_project(global)?;
    apply_overrides(&mut project, args);

    let requests = plan(&project, &args.kernels, args.rank_sweep)?;
    if requests.is_empty() {
        if !global.quiet {
            eprintln!("warning: nothing to build (no kernels or backends selected)");
        }
        return Ok(0);
    }
    if !global.quiet {
        eprintln!(
            "   Building {} request(s) in {} mode",
            requests.len(),
            project.config.cache.mode
        );
    }

    let store = project.open_store(&args.worker, args.run_id.as_deref())?;
    let orchestrator = Orchestrator::from_config(&store, &project.config)?;
    if let Err(e) = interrupt::cancel_on_signal(orchestrator.cancel_token()) {
        tracing::warn!(error = %e, "could not install signal handlers; cancellation will not release slots");
    }
    let summary = orchestrator.run(&requests)?;
    if summary.cancelled && !global.quiet {
        eprintln!("warning: run cancelled; slots held by this run were released");
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else if !global.quiet || summary.exit_code() != 0 {
        eprint!("{}", summary.render());
    }
    Ok(summary.exit_code())
}

/// Applies command-line overrides on top of file and environment settings.
fn apply_overrides(project: &mut Project, args: &BuildArgs) {
    let config = &mut project.config;
    if !args.backend.is_empty() {
        config.run.backends = args.backend.clone();
    }
    if let Some(mode) = args.mode {
        config.cache.mode = mode;
    }
    if args.fail_fast {
        config.cache.contention = ContentionMode::FailFast;
    }
    if args.jobs.is_some() {
        config.run.jobs = args.jobs;
    }
}

/// Expands the selected kernels and backend profiles into build requests.
///
/// Requests are ordered by kernel, then profile name. With `rank_sweep`,
/// each distributed profile expands into one request per rank count.
fn plan(
    project: &Project,
    kernels: &[String],
    rank_sweep: Option<u32>,
) -> Result<Vec<BuildRequest>, Box<dyn std::error::Error>> {
    for name in kernels {
        if !project.config.kernels.contains_key(name) {
            return Err(format!("unknown kernel '{name}'").into());
        }
    }
    let profiles = selected_backends(&project.config);
    let mut requests = Vec::new();
    for (name, spec) in &project.config.kernels {
        if !kernels.is_empty() && !kernels.contains(name) {
            continue;
        }
        let mut ir = KernelIr::load(name, project.revision(), &project.root, &spec.sources)?;
        if let Some(ref top) = spec.top {
            ir = ir.with_top(top);
        }
        let ir = Arc::new(ir);
        for profile in &profiles {
            match rank_sweep {
                Some(max) if profile.config.backend == BackendKind::Distributed => {
                    requests.extend(BuildRequest::rank_sweep(Arc::clone(&ir), &profile.config, max));
                }
                _ => requests.push(
                    BuildRequest::new(Arc::clone(&ir), profile.config.clone())
                        .with_label(format!("{name}@{}", profile.name)),
                ),
            }
        }
    }
    Ok(requests)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_config::load_config_from_str;
    use std::path::Path;

    const CONFIG: &str = r#"
[kernels.gemm]
sources = ["gemm.cpp"]

[kernels.axpy]
sources = ["axpy.cpp"]
top = "axpy_kernel"

[backends.host]
backend = "cpu"

[backends.cluster]
backend = "distributed"
ranks = 2
"#;

    fn project(dir: &Path) -> Project {
        std::fs::write(dir.join("gemm.cpp"), "void gemm() {}").unwrap();
        std::fs::write(dir.join("axpy.cpp"), "void axpy() {}").unwrap();
        Project {
            root: dir.to_path_buf(),
            config: load_config_from_str(CONFIG).unwrap(),
        }
    }

    #[test]
    fn plans_every_kernel_for_every_profile() {
        let dir = tempfile::tempdir().unwrap();
        let requests = plan(&project(dir.path()), &[], None).unwrap();
        let labels: Vec<_> = requests.iter().map(|r| r.label.as_str()).collect();
        assert_eq!(
            labels,
            vec!["axpy@cluster", "axpy@host", "gemm@cluster", "gemm@host"]
        );
        assert_eq!(requests[0].ir.top(), "axpy_kernel");
    }

    #[test]
    fn kernel_filter_and_rank_sweep() {
        let dir = tempfile::tempdir().unwrap();
        let requests = plan(&project(dir.path()), &["gemm".to_string()], Some(3)).unwrap();
        let labels: Vec<_> = requests.iter().map(|r| r.label.as_str()).collect();
        assert_eq!(
            labels,
            vec![
                "gemm@distributed[ranks=1]",
                "gemm@distributed[ranks=2]",
                "gemm@distributed[ranks=3]",
                "gemm@host"
            ]
        );
    }

    #[test]
    fn backend_override_filters_profiles() {
        let dir = tempfile::tempdir().unwrap();
        let mut project = project(dir.path());
        project.config.run.backends = vec![BackendKind::Cpu];
        let requests = plan(&project, &[], None).unwrap();
        assert!(requests.iter().all(|r| r.config.backend == BackendKind::Cpu));
        assert_eq!(requests.len(), 2);
    }

    #[test]
    fn unknown_kernel_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(plan(&project(dir.path()), &["nope".to_string()], None).is_err());
    }
}
