//! Environment overlay applied on top of `kiln.toml`.
//!
//! CI jobs select the isolation mode, cache root, toolchains, and backend
//! subset through environment variables without editing the project file.

use std::path::PathBuf;

use crate::error::ConfigError;
use crate::types::{BackendKind, IsolationMode, ProjectConfig};

/// Isolation mode: `shared`, `isolated`, or the aliases `single` / `unique`.
pub const ENV_CACHE_MODE: &str = "KILN_CACHE";
/// Cache root override.
pub const ENV_CACHE_ROOT: &str = "KILN_CACHE_ROOT";
/// Comma-separated backend kinds to exercise in this run.
pub const ENV_BACKENDS: &str = "KILN_BACKENDS";
/// Revision marker mixed into kernel identities.
pub const ENV_REVISION: &str = "KILN_REVISION";
/// Reporting endpoint override.
pub const ENV_REPORT_ENDPOINT: &str = "KILN_REPORT_ENDPOINT";

/// Applies `KILN_*` overrides read through `lookup`.
///
/// Taking a lookup function keeps the overlay testable without touching the
/// process environment.
pub fn apply_env<F>(config: &mut ProjectConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = lookup(ENV_CACHE_MODE) {
        config.cache.mode = value
            .parse::<IsolationMode>()
            .map_err(|_| ConfigError::InvalidEnv {
                var: ENV_CACHE_MODE.to_string(),
                value: value.clone(),
            })?;
    }
    if let Some(value) = lookup(ENV_CACHE_ROOT).filter(|v| !v.trim().is_empty()) {
        config.cache.root = PathBuf::from(value);
    }
    if let Some(value) = lookup(ENV_BACKENDS) {
        let mut kinds = Vec::new();
        for name in value.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let kind = name
                .parse::<BackendKind>()
                .map_err(ConfigError::UnknownBackend)?;
            if !kinds.contains(&kind) {
                kinds.push(kind);
            }
        }
        config.run.backends = kinds;
    }
    for kind in BackendKind::ALL {
        let var = toolchain_var(kind);
        if let Some(path) = lookup(&var).filter(|v| !v.trim().is_empty()) {
            let slot = match kind {
                BackendKind::Cpu => &mut config.toolchains.cpu,
                BackendKind::Gpu => &mut config.toolchains.gpu,
                BackendKind::Distributed => &mut config.toolchains.mpi,
                BackendKind::Fpga => &mut config.toolchains.hls,
            };
            *slot = PathBuf::from(path);
        }
    }
    if let Some(value) = lookup(ENV_REVISION).filter(|v| !v.trim().is_empty()) {
        config.run.revision = Some(value);
    }
    if let Some(value) = lookup(ENV_REPORT_ENDPOINT) {
        config.report.endpoint = Some(value).filter(|v| !v.trim().is_empty());
    }
    Ok(())
}

/// Applies overrides from the process environment.
pub fn apply_process_env(config: &mut ProjectConfig) -> Result<(), ConfigError> {
    apply_env(config, |name| std::env::var(name).ok())
}

/// Returns the toolchain override variable for a backend kind.
pub fn toolchain_var(kind: BackendKind) -> String {
    let suffix = match kind {
        BackendKind::Cpu => "CPU",
        BackendKind::Gpu => "GPU",
        BackendKind::Distributed => "MPI",
        BackendKind::Fpga => "HLS",
    };
    format!("KILN_TOOLCHAIN_{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn legacy_mode_aliases() {
        let mut config = ProjectConfig::default();
        apply_env(&mut config, lookup(&[("KILN_CACHE", "unique")])).unwrap();
        assert_eq!(config.cache.mode, IsolationMode::Isolated);
        apply_env(&mut config, lookup(&[("KILN_CACHE", "single")])).unwrap();
        assert_eq!(config.cache.mode, IsolationMode::Shared);
    }

    #[test]
    fn invalid_mode_is_rejected() {
        let mut config = ProjectConfig::default();
        let err = apply_env(&mut config, lookup(&[("KILN_CACHE", "sometimes")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { .. }));
    }

    #[test]
    fn cache_root_and_toolchains() {
        let mut config = ProjectConfig::default();
        apply_env(
            &mut config,
            lookup(&[
                ("KILN_CACHE_ROOT", "/scratch/kc"),
                ("KILN_TOOLCHAIN_GPU", "/opt/cuda/bin/nvcc"),
                ("KILN_TOOLCHAIN_HLS", "vivado_hls"),
            ]),
        )
        .unwrap();
        assert_eq!(config.cache.root, PathBuf::from("/scratch/kc"));
        assert_eq!(config.toolchains.gpu, PathBuf::from("/opt/cuda/bin/nvcc"));
        assert_eq!(config.toolchains.hls, PathBuf::from("vivado_hls"));
        assert_eq!(config.toolchains.cpu, PathBuf::from("c++"));
    }

    #[test]
    fn backend_filter_dedups_and_accepts_aliases() {
        let mut config = ProjectConfig::default();
        apply_env(&mut config, lookup(&[("KILN_BACKENDS", "mpi, cuda,mpi")])).unwrap();
        assert_eq!(
            config.run.backends,
            vec![BackendKind::Distributed, BackendKind::Gpu]
        );
    }

    #[test]
    fn unknown_backend_in_filter() {
        let mut config = ProjectConfig::default();
        let err = apply_env(&mut config, lookup(&[("KILN_BACKENDS", "cpu,tpu")])).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownBackend(ref b) if b == "tpu"));
    }

    #[test]
    fn empty_environment_changes_nothing() {
        let mut config = ProjectConfig::default();
        apply_env(&mut config, lookup(&[])).unwrap();
        assert_eq!(config.cache.root, PathBuf::from(".kilncache"));
        assert!(config.run.backends.is_empty());
        assert!(config.run.revision.is_none());
    }
}
