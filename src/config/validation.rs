//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Require a bind target (address and port, or fd)
//! - Validate value ranges
//!
//! Returns all validation errors, not just the first.

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::DistributorConfig;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("listener needs both address and port, or an fd")]
    MissingBindTarget,

    #[error("listener.max_pending must be greater than zero")]
    ZeroMaxPending,

    #[error("key must not be empty")]
    EmptyKey,

    #[error("workers.count must be greater than zero")]
    NoWorkers,

    #[error("invalid metrics address: {0}")]
    InvalidMetricsAddress(String),
}

/// Check `config`, collecting every problem.
pub fn validate_config(config: &DistributorConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_target().is_none() {
        errors.push(ValidationError::MissingBindTarget);
    }
    if config.listener.max_pending == 0 {
        errors.push(ValidationError::ZeroMaxPending);
    }
    if config.key.as_deref().is_some_and(str::is_empty) {
        errors.push(ValidationError::EmptyKey);
    }
    if config.workers.count == 0 {
        errors.push(ValidationError::NoWorkers);
    }
    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidMetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert_eq!(validate_config(&DistributorConfig::default()), Ok(()));
    }

    #[test]
    fn reports_every_problem() {
        let mut config = DistributorConfig::default();
        config.listener.port = None;
        config.listener.max_pending = 0;
        config.key = Some(String::new());
        config.workers.count = 0;
        config.observability.metrics_enabled = true;
        config.observability.metrics_address = "nowhere".to_string();

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(
            errors,
            vec![
                ValidationError::MissingBindTarget,
                ValidationError::ZeroMaxPending,
                ValidationError::EmptyKey,
                ValidationError::NoWorkers,
                ValidationError::InvalidMetricsAddress("nowhere".to_string()),
            ]
        );
    }

    #[test]
    fn fd_alone_is_a_bind_target() {
        let mut config = DistributorConfig::default();
        config.listener.address = None;
        config.listener.port = None;
        config.listener.fd = Some(3);
        assert_eq!(validate_config(&config), Ok(()));
    }
}
