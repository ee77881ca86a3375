//! Kiln CLI: builds kernels through the shared artifact cache.
//!
//! Provides `kiln build` for cached multi-backend builds, `kiln report` for
//! merging coverage shards, `kiln status` for inspecting slots, and
//! `kiln evict`/`kiln reset` for cache maintenance.

#![warn(missing_docs)]

mod build;
mod interrupt;
mod maintain;
mod project;
mod report;
mod status;

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use kiln_config::{BackendKind, IsolationMode};
use tracing_subscriber::EnvFilter;

/// Environment variable holding a tracing filter directive.
const LOG_ENV: &str = "KILN_LOG";

/// Kiln: cached multi-backend kernel builds.
#[derive(Parser, Debug)]
#[command(name = "kiln", version, about = "Kiln kernel build cache")]
pub struct Cli {
    /// Suppress all output except errors.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Enable verbose (debug-level) output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to a custom `kiln.toml` configuration file.
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// The subcommand to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Build kernels for the selected backends.
    Build(BuildArgs),
    /// Merge coverage shards into one report.
    Report(ReportArgs),
    /// List cache slots and their state.
    Status(StatusArgs),
    /// Remove terminal slots older than a threshold.
    Evict(EvictArgs),
    /// Remove every slot, unless one is being populated.
    Reset,
}

/// Arguments for `kiln build`.
#[derive(Parser, Debug)]
pub struct BuildArgs {
    /// Kernels to build (default: all configured kernels).
    pub kernels: Vec<String>,

    /// Restrict to these backends (repeatable).
    #[arg(short, long)]
    pub backend: Vec<BackendKind>,

    /// Slot isolation mode (`shared`/`single` or `isolated`/`unique`).
    #[arg(long)]
    pub mode: Option<IsolationMode>,

    /// Fail immediately when another worker is populating a shared slot.
    #[arg(long)]
    pub fail_fast: bool,

    /// Number of parallel builds.
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Worker label embedded in the worker id (e.g. `gw3`, `rank0`).
    #[arg(long, default_value = "main")]
    pub worker: String,

    /// Run id; builds that failed under the same run are not retried.
    #[arg(long)]
    pub run_id: Option<String>,

    /// Also build distributed variants for 1..=N ranks.
    #[arg(long)]
    pub rank_sweep: Option<u32>,

    /// Print the run summary as JSON on stdout.
    #[arg(long)]
    pub json: bool,
}

/// Arguments for `kiln report`.
#[derive(Parser, Debug)]
pub struct ReportArgs {
    /// Run root to search for shards (default: `report.dir`, else the
    /// cache root).
    #[arg(long)]
    pub root: Option<PathBuf>,

    /// Output directory for `report.json` and `summary.txt` (default: the
    /// run root).
    #[arg(short, long)]
    pub out: Option<PathBuf>,

    /// Number of shards the run was expected to produce.
    #[arg(long)]
    pub expected: Option<usize>,

    /// Skip the endpoint probe and upload.
    #[arg(long)]
    pub no_upload: bool,
}

/// Arguments for `kiln status`.
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Print slots as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Arguments for `kiln evict`.
#[derive(Parser, Debug)]
pub struct EvictArgs {
    /// Age threshold in seconds (default: `cache.retention_secs`).
    #[arg(long)]
    pub older_than: Option<u64>,
}

/// Global settings derived from CLI flags.
pub struct GlobalArgs {
    /// Whether to suppress non-error output.
    pub quiet: bool,
    /// Whether to print verbose/debug information.
    pub verbose: bool,
    /// Optional path to a custom config file.
    pub config: Option<String>,
}

fn main() {
    let cli = Cli::parse();

    let global = GlobalArgs {
        quiet: cli.quiet,
        verbose: cli.verbose,
        config: cli.config,
    };
    init_tracing(&global);

    let result = match cli.command {
        Command::Build(ref args) => build::run(args, &global),
        Command::Report(ref args) => report::run(args, &global),
        Command::Status(ref args) => status::run(args, &global),
        Command::Evict(ref args) => maintain::evict(args, &global),
        Command::Reset => maintain::reset(&global),
    };

    match result {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("error: {e}");
            process::exit(1);
        }
    }
}

/// Installs the stderr log subscriber. `KILN_LOG` overrides the level chosen
/// by `--quiet`/`--verbose`.
fn init_tracing(global: &GlobalArgs) {
    let default = if global.quiet {
        "error"
    } else if global.verbose {
        "debug"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn parse_build_defaults() {
        let cli = Cli::parse_from(["kiln", "build"]);
        match cli.command {
            Command::Build(ref args) => {
                assert!(args.kernels.is_empty());
                assert!(args.backend.is_empty());
                assert!(args.mode.is_none());
                assert!(!args.fail_fast);
                assert_eq!(args.worker, "main");
            }
            _ => panic!("expected Build command"),
        }
    }

    #[test]
    fn parse_build_with_args() {
        let cli = Cli::parse_from([
            "kiln",
            "build",
            "gemm",
            "--backend",
            "fpga",
            "--backend",
            "cpu",
            "--mode",
            "unique",
            "--jobs",
            "4",
            "--rank-sweep",
            "3",
        ]);
        match cli.command {
            Command::Build(ref args) => {
                assert_eq!(args.kernels, vec!["gemm".to_string()]);
                assert_eq!(args.backend, vec![BackendKind::Fpga, BackendKind::Cpu]);
                assert_eq!(args.mode, Some(IsolationMode::Isolated));
                assert_eq!(args.jobs, Some(4));
                assert_eq!(args.rank_sweep, Some(3));
            }
            _ => panic!("expected Build command"),
        }
    }

    #[test]
    fn parse_unknown_backend_fails() {
        assert!(Cli::try_parse_from(["kiln", "build", "--backend", "tpu"]).is_err());
    }

    #[test]
    fn parse_report_args() {
        let cli = Cli::parse_from(["kiln", "report", "--expected", "4", "--no-upload"]);
        match cli.command {
            Command::Report(ref args) => {
                assert_eq!(args.expected, Some(4));
                assert!(args.no_upload);
            }
            _ => panic!("expected Report command"),
        }
    }

    #[test]
    fn parse_global_flags() {
        let cli = Cli::parse_from(["kiln", "-q", "--config", "ci/kiln.toml", "reset"]);
        assert!(cli.quiet);
        assert_eq!(cli.config.as_deref(), Some("ci/kiln.toml"));
        assert!(matches!(cli.command, Command::Reset));
    }
}
