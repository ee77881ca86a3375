//! Order-independent merging of coverage shards.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::shard::{CoverageShard, LineHits};

/// The merged coverage of one run.
///
/// Every map is ordered, so the serialized report is byte-identical for any
/// permutation or duplication of the same shard set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatedReport {
    /// Shards the run was expected to produce.
    pub expected: usize,
    /// Distinct shards merged.
    pub found: usize,
    /// Ids of the merged shards, sorted.
    pub shard_ids: Vec<String>,
    /// Registered shard ids with no readable shard, sorted.
    pub missing: Vec<String>,
    /// Summed line hits per source file.
    pub files: BTreeMap<String, LineHits>,
}

impl AggregatedReport {
    /// Applies the run's expectations: registered shard ids and an optional
    /// configured count. The expected count never drops below `found`.
    pub fn expecting(mut self, registered: &BTreeSet<String>, configured: Option<usize>) -> Self {
        let found: BTreeSet<&str> = self.shard_ids.iter().map(String::as_str).collect();
        self.missing = registered
            .iter()
            .filter(|id| !found.contains(id.as_str()))
            .cloned()
            .collect();
        let known = self.found + self.missing.len();
        self.expected = known.max(configured.unwrap_or(0));
        self
    }

    /// Completeness as `found/expected`.
    pub fn completeness(&self) -> String {
        format!("{}/{}", self.found, self.expected)
    }

    /// Whether fewer shards were found than expected.
    pub fn is_partial(&self) -> bool {
        self.found < self.expected
    }

    /// Number of distinct lines with at least one hit.
    pub fn covered_lines(&self) -> usize {
        self.files
            .values()
            .map(|hits| hits.values().filter(|&&n| n > 0).count())
            .sum()
    }

    /// Number of distinct lines seen in any shard.
    pub fn known_lines(&self) -> usize {
        self.files.values().map(BTreeMap::len).sum()
    }
}

/// Merges a set of shards.
///
/// Shards are deduplicated by id; when two different shards claim the same
/// id, the one with the smaller content hash wins. Hits of distinct shards
/// are summed.
pub fn merge(shards: &[CoverageShard]) -> AggregatedReport {
    let mut by_id: BTreeMap<&str, &CoverageShard> = BTreeMap::new();
    for shard in shards {
        by_id
            .entry(shard.shard_id.as_str())
            .and_modify(|kept| {
                if shard.content_hash() < kept.content_hash() {
                    tracing::warn!(shard = %shard.shard_id, "conflicting shards share an id");
                    *kept = shard;
                }
            })
            .or_insert(shard);
    }

    let mut files: BTreeMap<String, LineHits> = BTreeMap::new();
    for shard in by_id.values() {
        for (file, hits) in &shard.lines {
            let merged = files.entry(file.clone()).or_default();
            for (&line, &count) in hits {
                let total = merged.entry(line).or_insert(0);
                *total = total.saturating_add(count);
            }
        }
    }

    AggregatedReport {
        expected: by_id.len(),
        found: by_id.len(),
        shard_ids: by_id.keys().map(|id| id.to_string()).collect(),
        missing: Vec::new(),
        files,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn shard(id: &str, hits: &[(&str, u32, u64)]) -> CoverageShard {
        let mut shard = CoverageShard::new(id, id);
        for &(file, line, count) in hits {
            shard.record(file, line, count);
        }
        shard
    }

    #[test]
    fn hits_are_summed_across_shards() {
        let report = merge(&[
            shard("a", &[("k.py", 1, 2), ("k.py", 2, 0)]),
            shard("b", &[("k.py", 1, 3), ("m.py", 7, 1)]),
        ]);
        assert_eq!(report.found, 2);
        assert_eq!(report.files["k.py"][&1], 5);
        assert_eq!(report.known_lines(), 3);
        assert_eq!(report.covered_lines(), 2);
    }

    #[test]
    fn same_shard_twice_counts_once() {
        let a = shard("a", &[("k.py", 1, 2)]);
        assert_eq!(merge(&[a.clone(), a.clone()]), merge(&[a]));
    }

    #[test]
    fn conflicting_ids_resolve_independent_of_order() {
        let x = shard("a", &[("k.py", 1, 2)]);
        let y = shard("a", &[("k.py", 1, 9)]);
        let forward = merge(&[x.clone(), y.clone()]);
        let backward = merge(&[y, x]);
        assert_eq!(forward, backward);
        assert_eq!(forward.found, 1);
    }

    #[test]
    fn empty_merge() {
        let report = merge(&[]);
        assert_eq!(report.completeness(), "0/0");
        assert!(!report.is_partial());
    }

    #[test]
    fn expectations_list_missing_shards() {
        let registered: BTreeSet<String> =
            ["a", "b", "c", "d"].iter().map(|s| s.to_string()).collect();
        let report = merge(&[shard("a", &[]), shard("b", &[]), shard("c", &[])])
            .expecting(&registered, None);
        assert_eq!(report.completeness(), "3/4");
        assert_eq!(report.missing, vec!["d".to_string()]);
    }

    #[test]
    fn unregistered_shards_still_count() {
        let registered: BTreeSet<String> = ["a"].iter().map(|s| s.to_string()).collect();
        let report = merge(&[shard("a", &[]), shard("z", &[])]).expecting(&registered, Some(1));
        assert_eq!(report.completeness(), "2/2");
    }

    fn arb_shard() -> impl Strategy<Value = CoverageShard> {
        (
            prop::sample::select(vec!["a", "b", "c", "d"]),
            prop::collection::vec(
                (prop::sample::select(vec!["x.py", "y.py"]), 1u32..20, 0u64..5),
                0..6,
            ),
        )
            .prop_map(|(id, hits)| {
                let mut shard = CoverageShard::new(id, id);
                for (file, line, count) in hits {
                    shard.record(file, line, count);
                }
                shard
            })
    }

    proptest! {
        #[test]
        fn merge_is_order_independent(
            shards in prop::collection::vec(arb_shard(), 0..8),
            seed in any::<u64>(),
        ) {
            let mut shuffled = shards.clone();
            let len = shuffled.len();
            if len > 1 {
                shuffled.rotate_left((seed as usize) % len);
                shuffled.reverse();
            }
            let a = serde_json::to_vec(&merge(&shards)).unwrap();
            let b = serde_json::to_vec(&merge(&shuffled)).unwrap();
            prop_assert_eq!(a, b);
        }

        #[test]
        fn merge_is_idempotent(shards in prop::collection::vec(arb_shard(), 0..8)) {
            let mut doubled = shards.clone();
            doubled.extend(shards.iter().cloned());
            prop_assert_eq!(merge(&doubled), merge(&shards));
        }
    }
}
