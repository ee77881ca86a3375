//! Classification of toolchain failures as transient.

use regex::Regex;

use crate::error::BackendError;

/// Decides whether a failed toolchain run is worth one retry, by matching
/// known signatures (license server unreachable, resource exhaustion)
/// against the log tail.
#[derive(Debug, Clone, Default)]
pub struct TransientPredicate {
    patterns: Vec<Regex>,
}

impl TransientPredicate {
    /// Compiles the given signatures.
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self, BackendError> {
        let patterns = patterns
            .iter()
            .map(|p| {
                Regex::new(p.as_ref()).map_err(|e| BackendError::InvalidPattern {
                    pattern: p.as_ref().to_string(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    /// A predicate that never classifies a failure as transient.
    pub fn never() -> Self {
        Self::default()
    }

    /// Returns `true` if any log line matches a transient signature.
    pub fn matches(&self, log_tail: &[String]) -> bool {
        log_tail
            .iter()
            .any(|line| self.patterns.iter().any(|re| re.is_match(line)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_signatures_match_license_errors() {
        let defaults = kiln_config::RetryConfig::default();
        let predicate = TransientPredicate::new(&defaults.transient_patterns).unwrap();
        let tail = vec![
            "INFO: [HLS 200-10] Setting target device".to_string(),
            "ERROR: Unable to contact license server".to_string(),
        ];
        assert!(predicate.matches(&tail));
        assert!(!predicate.matches(&["error: expected ';'".to_string()]));
    }

    #[test]
    fn never_matches_nothing() {
        assert!(!TransientPredicate::never().matches(&["license server".to_string()]));
    }

    #[test]
    fn invalid_pattern_is_reported() {
        let err = TransientPredicate::new(&["(unclosed"]).unwrap_err();
        assert!(matches!(err, BackendError::InvalidPattern { .. }));
    }
}
