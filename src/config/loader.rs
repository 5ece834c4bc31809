//! Configuration loading from disk and the environment.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::TunnelConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Environment variable overriding `client.endpoint`.
pub const ENDPOINT_ENV: &str = "TUNNEL_ENDPOINT";

/// Environment variable overriding `client.tls`.
pub const TLS_ENV: &str = "TUNNEL_TLS";

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),

    #[error("Invalid value {value:?} for {name}")]
    Env { name: &'static str, value: String },
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load, override from the environment, and validate a TOML file.
pub fn load_config(path: &Path) -> Result<TunnelConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let mut config: TunnelConfig = toml::from_str(&content)?;

    apply_env_overrides(&mut config)?;
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Apply `TUNNEL_ENDPOINT` / `TUNNEL_TLS` from the process environment.
pub fn apply_env_overrides(config: &mut TunnelConfig) -> Result<(), ConfigError> {
    apply_overrides(config, |name| std::env::var(name).ok())
}

/// Apply overrides from an arbitrary lookup.
pub fn apply_overrides<F>(config: &mut TunnelConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(endpoint) = lookup(ENDPOINT_ENV) {
        tracing::debug!(endpoint = %endpoint, "Tunnel endpoint overridden from environment");
        config.client.endpoint = endpoint;
    }
    if let Some(value) = lookup(TLS_ENV) {
        config.client.tls = match value.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => true,
            "false" | "0" | "no" => false,
            _ => return Err(ConfigError::Env { name: TLS_ENV, value }),
        };
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn overrides_endpoint_and_tls() {
        let mut config = TunnelConfig::default();
        apply_overrides(&mut config, lookup(&[(ENDPOINT_ENV, "gw.internal:443"), (TLS_ENV, "TRUE")])).unwrap();
        assert_eq!(config.client.endpoint, "gw.internal:443");
        assert!(config.client.tls);
    }

    #[test]
    fn rejects_unknown_tls_flag() {
        let mut config = TunnelConfig::default();
        let err = apply_overrides(&mut config, lookup(&[(TLS_ENV, "maybe")])).unwrap_err();
        assert!(matches!(err, ConfigError::Env { name: TLS_ENV, .. }));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = load_config(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
