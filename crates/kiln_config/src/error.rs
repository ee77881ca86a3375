//! Error types for configuration loading and validation.

/// Errors that can occur when loading or validating a `kiln.toml` configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An I/O error occurred while reading the configuration file.
    #[error("failed to read configuration: {0}")]
    IoError(#[from] std::io::Error),

    /// The TOML content could not be parsed.
    #[error("failed to parse configuration: {0}")]
    ParseError(String),

    /// A backend name or kind is not known.
    #[error("unknown backend '{0}'")]
    UnknownBackend(String),

    /// A required field is missing from the configuration.
    #[error("missing required field: {0}")]
    MissingField(String),

    /// An environment variable holds a value that cannot be interpreted.
    #[error("invalid value '{value}' for {var}")]
    InvalidEnv {
        /// The environment variable name.
        var: String,
        /// The rejected value.
        value: String,
    },

    /// A configuration value failed validation.
    #[error("validation error: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_unknown_backend() {
        let err = ConfigError::UnknownBackend("quantum".to_string());
        assert_eq!(format!("{err}"), "unknown backend 'quantum'");
    }

    #[test]
    fn display_missing_field() {
        let err = ConfigError::MissingField("kernels.gemm.sources".to_string());
        assert_eq!(
            format!("{err}"),
            "missing required field: kernels.gemm.sources"
        );
    }

    #[test]
    fn display_invalid_env() {
        let err = ConfigError::InvalidEnv {
            var: "KILN_CACHE".to_string(),
            value: "sometimes".to_string(),
        };
        assert_eq!(format!("{err}"), "invalid value 'sometimes' for KILN_CACHE");
    }

    #[test]
    fn display_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = ConfigError::IoError(io_err);
        assert!(format!("{err}").starts_with("failed to read configuration:"));
    }
}
