//! Schema-driven config validation.

use super::schema::{Config, ValidationError, CURRENT_VERSION};

/// Validate `config` against its documented invariants. Blocking
/// failures cause `ErrConfigInvalid` at the call site (see `config::load`);
/// non-blocking ones are returned alongside for the caller to surface as
/// warnings (e.g. in `ddx doctor`).
pub fn validate(config: &Config) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if config.version != CURRENT_VERSION {
        errors.push(ValidationError {
            path: "version".to_string(),
            rule: "version must equal \"1.0\"".to_string(),
            expected: CURRENT_VERSION.to_string(),
            observed: config.version.clone(),
            blocking: true,
        });
    }

    let safe_word = &config.workflows.safe_word;
    if safe_word.trim().is_empty() {
        errors.push(ValidationError {
            path: "workflows.safe_word".to_string(),
            rule: "safe word must be non-empty".to_string(),
            expected: "non-empty string".to_string(),
            observed: "\"\"".to_string(),
            blocking: true,
        });
    } else if safe_word.chars().any(char::is_whitespace) {
        errors.push(ValidationError {
            path: "workflows.safe_word".to_string(),
            rule: "safe word must not contain whitespace".to_string(),
            expected: "whitespace-free string".to_string(),
            observed: safe_word.clone(),
            blocking: true,
        });
    }

    let mut seen = std::collections::HashSet::new();
    for name in &config.workflows.active {
        if !seen.insert(name) {
            errors.push(ValidationError {
                path: "workflows.active".to_string(),
                rule: "active workflow list must not contain duplicates".to_string(),
                expected: "unique names".to_string(),
                observed: name.clone(),
                blocking: true,
            });
        }
    }

    if config.library.path.trim().is_empty() {
        errors.push(ValidationError {
            path: "library.path".to_string(),
            rule: "library path must be non-empty".to_string(),
            expected: "non-empty path".to_string(),
            observed: "\"\"".to_string(),
            blocking: true,
        });
    }

    errors
}

/// True iff `errors` contains no blocking entries.
pub fn is_blocking(errors: &[ValidationError]) -> bool {
    errors.iter().any(|e| e.blocking)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        let errors = validate(&config);
        assert!(!is_blocking(&errors), "{:?}", errors);
    }

    #[test]
    fn whitespace_safe_word_is_blocking() {
        let mut config = Config::default();
        config.workflows.safe_word = "NO DDX".to_string();
        let errors = validate(&config);
        assert!(is_blocking(&errors));
    }

    #[test]
    fn duplicate_active_workflow_is_blocking() {
        let mut config = Config::default();
        config.workflows.active = vec!["helix".to_string(), "helix".to_string()];
        let errors = validate(&config);
        assert!(is_blocking(&errors));
    }
}
