//! Configuration loading from disk and command-line overrides.

use std::fs;
use std::path::Path;

use crate::config::schema::ProxyConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Values supplied on the command line. They win over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub backend: Option<String>,
    pub port: Option<u16>,
    pub log_level: Option<String>,
}

impl Overrides {
    fn apply(self, config: &mut ProxyConfig) {
        if let Some(backend) = self.backend {
            config.backend.address = backend;
        }
        if let Some(port) = self.port {
            config.listener.port = port;
        }
        if let Some(level) = self.log_level {
            config.observability.log_level = level;
        }
    }
}

/// Parse a TOML file into a config without validating it.
pub fn read_config(path: &Path) -> Result<ProxyConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    Ok(toml::from_str(&content)?)
}

/// Load the optional config file, apply overrides, then validate.
pub fn load_config(path: Option<&Path>, overrides: Overrides) -> Result<ProxyConfig, ConfigError> {
    let mut config = match path {
        Some(path) => read_config(path)?,
        None => ProxyConfig::default(),
    };
    overrides.apply(&mut config);

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}
