//! Best-effort delivery of the report to an external endpoint.

use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;

use kiln_backend::{Invocation, TimeoutClass, ToolchainRunner};
use kiln_config::ReportConfig;

use crate::error::ReportWarning;

/// Log file of the uploader command, next to the report.
pub const UPLOAD_LOG: &str = "upload.log";

/// What happened to the report after it was written locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Publication {
    /// The uploader accepted the report.
    Uploaded {
        /// The endpoint it was sent to.
        endpoint: String,
    },
    /// The report stays local. `warning` is set when an endpoint was
    /// configured but could not be used.
    LocalOnly {
        /// Why the upload did not happen.
        warning: Option<ReportWarning>,
    },
}

/// Checks that `endpoint` (`host:port`) accepts TCP connections within
/// `timeout`.
pub fn probe(endpoint: &str, timeout: Duration) -> Result<(), String> {
    let addrs = endpoint
        .to_socket_addrs()
        .map_err(|e| format!("cannot resolve: {e}"))?;
    let mut last = "no addresses".to_string();
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(_) => return Ok(()),
            Err(e) => last = e.to_string(),
        }
    }
    Err(last)
}

/// Offers the report at `report_path` to the configured endpoint.
///
/// Never fails: an unset endpoint, an unreachable endpoint, a missing
/// uploader or a failing upload all leave the report local.
pub fn publish(report_path: &Path, config: &ReportConfig, runner: &ToolchainRunner) -> Publication {
    let Some(endpoint) = config.endpoint.as_deref().filter(|e| !e.trim().is_empty()) else {
        return Publication::LocalOnly { warning: None };
    };
    let local_only = |warning: ReportWarning| {
        tracing::warn!("{warning}; report kept local");
        Publication::LocalOnly {
            warning: Some(warning),
        }
    };

    if let Err(reason) = probe(endpoint, Duration::from_millis(config.probe_timeout_ms)) {
        return local_only(ReportWarning::EndpointUnreachable {
            endpoint: endpoint.to_string(),
            reason,
        });
    }
    let Some((program, args)) = config.uploader.split_first() else {
        tracing::info!(endpoint, "endpoint reachable but no uploader configured");
        return Publication::LocalOnly { warning: None };
    };

    let workdir = report_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let invocation = Invocation::new(program)
        .args(args.iter().cloned())
        .arg(report_path.display().to_string())
        .arg(endpoint)
        .log_to(UPLOAD_LOG);
    match runner.run("uploader", &invocation, workdir, TimeoutClass::Compile) {
        Ok(_) => {
            tracing::info!(endpoint, "report uploaded");
            Publication::Uploaded {
                endpoint: endpoint.to_string(),
            }
        }
        Err(e) => local_only(ReportWarning::UploadFailed {
            reason: e.to_string(),
        }),
    }
}
