//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Require a backend address and check it is a usable authority
//! - Check CORS origins are valid header values
//! - Check the metrics address when metrics are enabled
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use axum::http::uri::Authority;
use axum::http::HeaderValue;

use crate::config::schema::ProxyConfig;

/// A single semantic problem with the configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("backend address is required")]
    MissingBackend,

    #[error("backend address {0:?} is not a valid host[:port]")]
    InvalidBackend(String),

    #[error("CORS origin {0:?} is not a valid header value")]
    InvalidOrigin(String),

    #[error("metrics address {0:?} is not a socket address")]
    InvalidMetricsAddress(String),
}

/// Validate a loaded configuration.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let address = config.backend.address.trim();
    if address.is_empty() {
        errors.push(ValidationError::MissingBackend);
    } else if address.parse::<Authority>().is_err() {
        errors.push(ValidationError::InvalidBackend(address.to_string()));
    }

    for origin in &config.cors.allowed_origins {
        if HeaderValue::from_str(origin).is_err() {
            errors.push(ValidationError::InvalidOrigin(origin.clone()));
        }
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
    fn missing_backend_is_rejected() {
        let config = ProxyConfig::default();
        assert_eq!(
            validate_config(&config),
            Err(vec![ValidationError::MissingBackend])
        );
    }

    #[test]
    fn collects_every_error() {
        let mut config = ProxyConfig::default();
        config.backend.address = "not a host/with path".into();
        config.cors.allowed_origins = vec!["https://ok.example".into(), "bad\norigin".into()];
        config.observability.metrics_enabled = true;
        config.observability.metrics_address = "nowhere".into();

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(matches!(errors[0], ValidationError::InvalidBackend(_)));
        assert!(matches!(errors[1], ValidationError::InvalidOrigin(_)));
        assert!(matches!(errors[2], ValidationError::InvalidMetricsAddress(_)));
    }

    #[test]
    fn valid_config_passes() {
        let mut config = ProxyConfig::default();
        config.backend.address = "localhost:50051".into();
        assert!(validate_config(&config).is_ok());
    }
}
