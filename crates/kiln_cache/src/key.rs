//! Cache key computation from kernel identity and build configuration.
//!
//! The key is an XXH3-128 hash over a canonical, versioned encoding of every
//! input that can change generated output. Two requests with equal keys are
//! interchangeable.

use std::fmt;
use std::str::FromStr;

use kiln_common::{ContentHash, ContentHasher, ParseHashError};
use kiln_config::BuildConfig;
use serde::{Deserialize, Serialize};

use crate::error::CacheError;

/// Version tag of the key encoding. Bumped whenever the encoding changes so
/// that keys from older layouts never alias new ones.
const KEY_ENCODING: &str = "kiln-key/v2";

/// The identity of a generated kernel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KernelIdentity {
    /// Kernel (program) name.
    pub name: String,
    /// Hash of the lowered source units.
    pub signature_hash: ContentHash,
    /// Source revision marker.
    pub revision: String,
    /// Top-level function the toolchain is pointed at.
    pub top: String,
}

impl KernelIdentity {
    /// Creates an identity with an explicit signature hash. The top-level
    /// function defaults to the kernel name.
    pub fn new(name: &str, signature_hash: ContentHash, revision: &str) -> Self {
        Self {
            name: name.to_string(),
            signature_hash,
            revision: revision.to_string(),
            top: name.to_string(),
        }
    }

    /// Overrides the top-level function.
    pub fn with_top(mut self, top: &str) -> Self {
        self.top = top.to_string();
        self
    }

    /// Derives the identity from lowered source units given as
    /// `(file_name, code)` pairs. Unit order is significant.
    pub fn from_sources<'a, I>(name: &str, revision: &str, units: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut hasher = ContentHasher::new();
        for (file_name, code) in units {
            hasher.str_part(file_name).str_part(code);
        }
        Self::new(name, hasher.finish(), revision)
    }
}

/// Content-derived address of a cache slot.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CacheKey(ContentHash);

impl CacheKey {
    /// Returns the underlying content hash.
    pub fn as_hash(&self) -> &ContentHash {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CacheKey({})", self.0)
    }
}

impl FromStr for CacheKey {
    type Err = ParseHashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

/// Computes the cache key for a kernel built with `config`.
///
/// Fails with [`CacheError::InvalidConfig`] when the configuration carries an
/// option of another backend kind or lacks a required synthesis option.
pub fn compute_key(identity: &KernelIdentity, config: &BuildConfig) -> Result<CacheKey, CacheError> {
    config
        .check_compatibility()
        .map_err(|reason| CacheError::InvalidConfig { reason })?;

    let mut h = ContentHasher::new();
    h.str_part(KEY_ENCODING)
        .str_part(&identity.name)
        .part(identity.signature_hash.as_bytes())
        .str_part(&identity.revision)
        .str_part(&identity.top)
        .str_part(config.backend.name())
        .str_part(config.opt_level.trim());

    h.part(&(config.defines.len() as u64).to_le_bytes());
    for (name, value) in &config.defines {
        h.str_part(name).str_part(value);
    }
    h.part(&(config.include_dirs.len() as u64).to_le_bytes());
    for dir in &config.include_dirs {
        h.str_part(dir);
    }

    optional(&mut h, config.gpu_arch.as_deref().map(str::as_bytes));
    let ranks = config.ranks.map(u32::to_le_bytes);
    optional(&mut h, ranks.as_ref().map(|r| &r[..]));
    optional(&mut h, config.scalapack_lib.as_deref().map(str::as_bytes));
    let flow = config.flow_target.map(|f| f.to_string());
    optional(&mut h, flow.as_deref().map(str::as_bytes));
    optional(&mut h, config.part.as_deref().map(str::as_bytes));
    let clock = config.clock.map(|c| c.to_bits().to_le_bytes());
    optional(&mut h, clock.as_ref().map(|c| &c[..]));

    Ok(CacheKey(h.finish()))
}

/// Encodes an optional field with a presence tag so that `None` and an empty
/// value hash differently.
fn optional(h: &mut ContentHasher, value: Option<&[u8]>) {
    match value {
        Some(bytes) => {
            h.part(&[1]).part(bytes);
        }
        None => {
            h.part(&[0]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_common::Frequency;
    use kiln_config::{BackendKind, FlowTarget};
    use proptest::prelude::*;

    fn gemm() -> KernelIdentity {
        KernelIdentity::from_sources("gemm", "r1", [("gemm.cpp", "void gemm() {}")])
    }

    fn u250() -> BuildConfig {
        BuildConfig::fpga(
            FlowTarget::Vitis,
            "xcu250-figd2104-2L-e",
            Frequency::from_mhz(300.0),
        )
    }

    #[test]
    fn deterministic() {
        let cfg = BuildConfig::new(BackendKind::Cpu);
        assert_eq!(
            compute_key(&gemm(), &cfg).unwrap(),
            compute_key(&gemm(), &cfg).unwrap()
        );
    }

    #[test]
    fn backend_kind_changes_key() {
        let cpu = compute_key(&gemm(), &BuildConfig::new(BackendKind::Cpu)).unwrap();
        let gpu = compute_key(&gemm(), &BuildConfig::new(BackendKind::Gpu)).unwrap();
        assert_ne!(cpu, gpu);
    }

    #[test]
    fn clock_changes_key() {
        let a = compute_key(&gemm(), &u250()).unwrap();
        let mut cfg = u250();
        cfg.clock = Some(Frequency::from_mhz(250.0));
        let b = compute_key(&gemm(), &cfg).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn revision_and_signature_change_key() {
        let cfg = BuildConfig::new(BackendKind::Cpu);
        let base = compute_key(&gemm(), &cfg).unwrap();
        let rev2 = KernelIdentity::from_sources("gemm", "r2", [("gemm.cpp", "void gemm() {}")]);
        let body2 = KernelIdentity::from_sources("gemm", "r1", [("gemm.cpp", "void gemm() { }")]);
        assert_ne!(base, compute_key(&rev2, &cfg).unwrap());
        assert_ne!(base, compute_key(&body2, &cfg).unwrap());
    }

    #[test]
    fn top_function_changes_key() {
        let cfg = u250();
        let default_top = compute_key(&gemm(), &cfg).unwrap();
        let renamed = compute_key(&gemm().with_top("gemm_top"), &cfg).unwrap();
        assert_eq!(gemm().top, "gemm");
        assert_ne!(default_top, renamed);
    }

    #[test]
    fn defines_change_key() {
        let plain = BuildConfig::new(BackendKind::Cpu);
        let defined = plain.clone().with_define("N", "64");
        assert_ne!(
            compute_key(&gemm(), &plain).unwrap(),
            compute_key(&gemm(), &defined).unwrap()
        );
    }

    #[test]
    fn empty_option_differs_from_absent() {
        let mut a = BuildConfig::new(BackendKind::Gpu);
        a.gpu_arch = Some(String::new());
        let b = BuildConfig::new(BackendKind::Gpu);
        assert_ne!(
            compute_key(&gemm(), &a).unwrap(),
            compute_key(&gemm(), &b).unwrap()
        );
    }

    #[test]
    fn fpga_without_part_is_invalid() {
        let mut cfg = u250();
        cfg.part = None;
        let err = compute_key(&gemm(), &cfg).unwrap_err();
        assert!(matches!(err, CacheError::InvalidConfig { .. }));
    }

    #[test]
    fn clock_on_cpu_is_invalid() {
        let mut cfg = BuildConfig::new(BackendKind::Cpu);
        cfg.clock = Some(Frequency::from_mhz(100.0));
        let err = compute_key(&gemm(), &cfg).unwrap_err();
        assert!(err.to_string().contains("clock"));
    }

    #[test]
    fn zero_ranks_is_invalid() {
        let err = compute_key(&gemm(), &BuildConfig::distributed(0)).unwrap_err();
        assert!(matches!(err, CacheError::InvalidConfig { .. }));
    }

    #[test]
    fn key_parses_from_display() {
        let key = compute_key(&gemm(), &BuildConfig::new(BackendKind::Cpu)).unwrap();
        let parsed: CacheKey = key.to_string().parse().unwrap();
        assert_eq!(key, parsed);
    }

    proptest! {
        #[test]
        fn distinct_rank_counts_give_distinct_keys(a in 1u32..512, b in 1u32..512) {
            let ka = compute_key(&gemm(), &BuildConfig::distributed(a)).unwrap();
            let kb = compute_key(&gemm(), &BuildConfig::distributed(b)).unwrap();
            prop_assert_eq!(a == b, ka == kb);
        }

        #[test]
        fn key_is_stable_under_recomputation(name in "[a-z_]{1,16}", rev in "[0-9a-f]{0,12}", mhz in 1.0f64..1000.0) {
            let id = KernelIdentity::from_sources(&name, &rev, [("k.cpp", name.as_str())]);
            let mut cfg = u250();
            cfg.clock = Some(Frequency::from_mhz(mhz));
            prop_assert_eq!(compute_key(&id, &cfg).unwrap(), compute_key(&id, &cfg).unwrap());
        }
    }
}
