//! Backend profile selection for a run.

use crate::types::{BuildConfig, ProjectConfig};

/// A backend profile selected for the current run.
#[derive(Debug, Clone)]
pub struct SelectedBackend {
    /// Profile name from `[backends.<name>]`.
    pub name: String,
    /// The profile's build configuration.
    pub config: BuildConfig,
}

/// Returns the backend profiles exercised by this run.
///
/// When `run.backends` is non-empty only profiles of those kinds are
/// selected; profiles are returned in name order.
pub fn selected_backends(config: &ProjectConfig) -> Vec<SelectedBackend> {
    config
        .backends
        .iter()
        .filter(|(_, build)| {
            config.run.backends.is_empty() || config.run.backends.contains(&build.backend)
        })
        .map(|(name, build)| SelectedBackend {
            name: name.clone(),
            config: build.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::load_config_from_str;
    use crate::types::BackendKind;

    const PROFILES: &str = r#"
[backends.host]
backend = "cpu"

[backends.v100]
backend = "gpu"
gpu_arch = "sm_70"

[backends.mpi2]
backend = "distributed"
ranks = 2
"#;

    #[test]
    fn no_filter_selects_everything() {
        let config = load_config_from_str(PROFILES).unwrap();
        let names: Vec<_> = selected_backends(&config)
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, vec!["host", "mpi2", "v100"]);
    }

    #[test]
    fn filter_by_kind() {
        let mut config = load_config_from_str(PROFILES).unwrap();
        config.run.backends = vec![BackendKind::Gpu];
        let selected = selected_backends(&config);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].name, "v100");
        assert_eq!(selected[0].config.gpu_arch.as_deref(), Some("sm_70"));
    }
}
