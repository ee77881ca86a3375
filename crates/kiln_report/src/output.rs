//! Report files: `report.json` for machines, `summary.txt` for people.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use kiln_common::atomic_write;

use crate::error::{ReportError, ReportWarning};
use crate::merge::AggregatedReport;

/// File name of the merged report.
pub const REPORT_FILE: &str = "report.json";
/// File name of the human-readable summary.
pub const SUMMARY_FILE: &str = "summary.txt";

/// Writes `report.json` and `summary.txt` into `dir` and returns the path of
/// the report.
pub fn write_report(
    dir: &Path,
    report: &AggregatedReport,
    warnings: &[ReportWarning],
) -> Result<PathBuf, ReportError> {
    let report_path = dir.join(REPORT_FILE);
    let mut json = serde_json::to_vec_pretty(report)?;
    json.push(b'\n');
    atomic_write(&report_path, &json).map_err(|e| ReportError::io(&report_path, e))?;

    let summary_path = dir.join(SUMMARY_FILE);
    let summary = render_summary(report, warnings);
    atomic_write(&summary_path, summary.as_bytes())
        .map_err(|e| ReportError::io(&summary_path, e))?;

    tracing::info!(path = %report_path.display(), "report written");
    Ok(report_path)
}

/// Renders the human-readable summary.
pub fn render_summary(report: &AggregatedReport, warnings: &[ReportWarning]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "shards: {}", report.completeness());
    if !report.missing.is_empty() {
        let _ = writeln!(out, "missing: {}", report.missing.join(", "));
    }
    let _ = writeln!(
        out,
        "lines: {} covered of {} across {} files",
        report.covered_lines(),
        report.known_lines(),
        report.files.len()
    );
    for (file, hits) in &report.files {
        let covered = hits.values().filter(|&&n| n > 0).count();
        let _ = writeln!(out, "  {file}: {covered}/{}", hits.len());
    }
    for warning in warnings {
        let _ = writeln!(out, "warning: {warning}");
    }
    out
}
