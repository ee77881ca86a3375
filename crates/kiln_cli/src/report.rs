//! `kiln report`: merge coverage shards and publish the report.

use kiln_backend::ToolchainRunner;
use kiln_report::{aggregate, publish, render_summary, write_report, Publication};

use std::path::PathBuf;

use crate::project::{load_project, resolve, Project};
use crate::{GlobalArgs, ReportArgs};

/// Runs the `kiln report` command.
///
/// Missing shards and an unreachable endpoint are warnings; the report is
/// always written and the exit code is 0.
pub fn run(args: &ReportArgs, global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let mut project = load_project(global)?;
    if args.expected.is_some() {
        project.config.report.expected_shards = args.expected;
    }
    let (root, out) = locations(&project, args);

    if !global.quiet {
        eprintln!("   Aggregating shards under {}", root.display());
    }
    let mut aggregation = aggregate(&root, &project.config.report)?;
    let report_path = write_report(&out, &aggregation.report, &aggregation.warnings)?;

    if !args.no_upload {
        let runner = ToolchainRunner::new(&project.config.timeouts);
        match publish(&report_path, &project.config.report, &runner) {
            Publication::Uploaded { endpoint } => {
                if !global.quiet {
                    eprintln!("   Uploaded report to {endpoint}");
                }
            }
            Publication::LocalOnly { warning } => {
                if let Some(warning) = warning {
                    aggregation.warnings.push(warning);
                    write_report(&out, &aggregation.report, &aggregation.warnings)?;
                }
            }
        }
    }

    if !global.quiet {
        eprint!("{}", render_summary(&aggregation.report, &aggregation.warnings));
        eprintln!("   Report written to {}", report_path.display());
    }
    Ok(0)
}

/// Picks the shard scan root and the output directory.
///
/// The scan root is `--root`, else `report.dir`, else the cache root. The
/// report lands in `--out`, else the scan root.
fn locations(project: &Project, args: &ReportArgs) -> (PathBuf, PathBuf) {
    let root = match (&args.root, &project.config.report.dir) {
        (Some(root), _) => resolve(&project.root, root),
        (None, Some(dir)) => resolve(&project.root, dir),
        (None, None) => project.cache_root(),
    };
    let out = args
        .out
        .as_ref()
        .map_or_else(|| root.clone(), |out| resolve(&project.root, out));
    (root, out)
}
