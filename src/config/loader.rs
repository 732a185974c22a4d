//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::DistributorConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<DistributorConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<DistributorConfig, ConfigError> {
    let config: DistributorConfig = toml::from_str(content)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn loads_file_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            key = "edge"

            [listener]
            address = "127.0.0.1"
            port = 0
            max_pending = 64

            [workers]
            count = 2
            reject_every = 3
            "#
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.distributor_key(), "edge");
        assert_eq!(config.listener.max_pending, 64);
        assert_eq!(config.workers.reject_every, 3);
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = load_config(Path::new("/nonexistent/distributor.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn validation_errors_are_joined() {
        let err = parse_config("[listener]\nmax_pending = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(ref errors) if errors.len() == 1));
        assert_eq!(
            err.to_string(),
            "Validation failed: listener.max_pending must be greater than zero"
        );
    }

    #[test]
    fn every_validation_error_is_listed() {
        let err = parse_config("key = \"\"\n[listener]\nmax_pending = 0\n[workers]\ncount = 0\n").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Validation failed: listener.max_pending must be greater than zero, \
             key must not be empty, workers.count must be greater than zero"
        );
    }

    #[test]
    fn bad_toml_is_parse_error() {
        assert!(matches!(parse_config("listener = ["), Err(ConfigError::Parse(_))));
    }
}
