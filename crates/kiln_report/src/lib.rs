//! Merging of per-worker coverage shards into one run report.
//!
//! Every worker registers the shard it intends to write and later writes it
//! under a collision-free name. After the run, [`discover`] finds whatever
//! shards exist below the run root, [`merge`] folds them into an
//! order-independent [`AggregatedReport`], and [`publish`] offers the result
//! to an optional reporting endpoint without ever failing the run.

#![warn(missing_docs)]

pub mod discover;
pub mod endpoint;
pub mod error;
pub mod merge;
pub mod output;
pub mod shard;

pub use discover::{discover, Discovery};
pub use endpoint::{probe, publish, Publication};
pub use error::{ReportError, ReportWarning};
pub use merge::{merge, AggregatedReport};
pub use output::{render_summary, write_report, REPORT_FILE, SUMMARY_FILE};
pub use shard::{CoverageShard, LineHits, ShardWriter};

use std::path::Path;

use kiln_config::ReportConfig;

/// The result of aggregating one run.
#[derive(Debug)]
pub struct Aggregation {
    /// The merged report.
    pub report: AggregatedReport,
    /// Non-fatal problems found while aggregating.
    pub warnings: Vec<ReportWarning>,
}

/// Discovers and merges every shard below `root`.
///
/// The expected shard count is the larger of the configured count and the
/// number of registered shards.
pub fn aggregate(root: &Path, config: &ReportConfig) -> Result<Aggregation, ReportError> {
    let discovery = discover(root)?;
    let mut warnings = discovery.warnings;
    let report = merge(&discovery.shards).expecting(&discovery.expected, config.expected_shards);
    if report.is_partial() {
        let warning = ReportWarning::PartialAggregation {
            found: report.found,
            expected: report.expected,
            missing: report.missing.clone(),
        };
        tracing::warn!("{warning}");
        warnings.push(warning);
    }
    tracing::info!(
        found = report.found,
        expected = report.expected,
        files = report.files.len(),
        "coverage aggregated"
    );
    Ok(Aggregation { report, warnings })
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_common::WorkerId;

    #[test]
    fn missing_shard_yields_partial_report() {
        let root = tempfile::tempdir().unwrap();
        for (i, label) in ["gw0", "gw1", "gw2", "gw3"].iter().enumerate() {
            let writer = ShardWriter::new(root.path(), &WorkerId::new(label));
            writer.register().unwrap();
            if i == 3 {
                continue;
            }
            let mut shard = writer.shard();
            shard.record("kernels/gemm.py", 10, 1);
            writer.write(&shard).unwrap();
        }

        let aggregation = aggregate(root.path(), &ReportConfig::default()).unwrap();
        assert_eq!(aggregation.report.completeness(), "3/4");
        assert_eq!(aggregation.report.files["kernels/gemm.py"][&10], 3);
        assert!(aggregation
            .warnings
            .iter()
            .any(|w| matches!(w, ReportWarning::PartialAggregation { found: 3, expected: 4, .. })));
    }

    #[test]
    fn configured_count_raises_expectation() {
        let root = tempfile::tempdir().unwrap();
        let writer = ShardWriter::new(root.path(), &WorkerId::new("rank0"));
        writer.register().unwrap();
        writer.write(&writer.shard()).unwrap();

        let config = ReportConfig {
            expected_shards: Some(2),
            ..ReportConfig::default()
        };
        let aggregation = aggregate(root.path(), &config).unwrap();
        assert_eq!(aggregation.report.completeness(), "1/2");
    }

    #[test]
    fn complete_run_has_no_warnings() {
        let root = tempfile::tempdir().unwrap();
        let writer = ShardWriter::new(root.path(), &WorkerId::new("gw0"));
        writer.register().unwrap();
        writer.write(&writer.shard()).unwrap();
        let aggregation = aggregate(root.path(), &ReportConfig::default()).unwrap();
        assert!(aggregation.warnings.is_empty());
        assert!(!aggregation.report.is_partial());
    }
}
