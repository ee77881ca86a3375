//! Configuration file loading and validation.

use crate::error::ConfigError;
use crate::types::ProjectConfig;
use std::path::Path;

/// Name of the project configuration file.
pub const CONFIG_FILE: &str = "kiln.toml";

/// Loads and validates `kiln.toml` from a project directory.
///
/// A missing file is not an error: the defaults are returned so that a run
/// can be configured entirely through the environment.
pub fn load_config(project_dir: &Path) -> Result<ProjectConfig, ConfigError> {
    let config_path = project_dir.join(CONFIG_FILE);
    if !config_path.exists() {
        tracing::debug!(path = %config_path.display(), "no configuration file, using defaults");
        return Ok(ProjectConfig::default());
    }
    let content = std::fs::read_to_string(&config_path)?;
    load_config_from_str(&content)
}

/// Parses and validates a `kiln.toml` configuration from a string.
pub fn load_config_from_str(content: &str) -> Result<ProjectConfig, ConfigError> {
    let config: ProjectConfig =
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
    validate_config(&config)?;
    Ok(config)
}

/// Validates kernels and backend profiles.
pub(crate) fn validate_config(config: &ProjectConfig) -> Result<(), ConfigError> {
    for (name, kernel) in &config.kernels {
        if kernel.sources.is_empty() {
            return Err(ConfigError::MissingField(format!("kernels.{name}.sources")));
        }
    }
    for (name, backend) in &config.backends {
        backend
            .check_compatibility()
            .map_err(|reason| ConfigError::ValidationError(format!("backends.{name}: {reason}")))?;
    }
    if config.cache.root.as_os_str().is_empty() {
        return Err(ConfigError::MissingField("cache.root".to_string()));
    }
    Ok(())
}
