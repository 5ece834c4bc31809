//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, limits > 0)
//! - Check addresses parse before anything binds or dials
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: TunnelConfig → Result<(), Vec<ValidationError>>

use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::TunnelConfig;
use crate::protocol::Endpoint;

/// A single failed check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Check a parsed configuration.
pub fn validate_config(config: &TunnelConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let mut check = |ok: bool, field: &'static str, message: String| {
        if !ok {
            errors.push(ValidationError { field, message });
        }
    };

    let listener = &config.listener;
    check(
        listener.bind_address.parse::<SocketAddr>().is_ok(),
        "listener.bind_address",
        format!("{:?} is not a socket address", listener.bind_address),
    );
    check(
        listener.max_body_bytes > 0,
        "listener.max_body_bytes",
        "must be greater than zero".into(),
    );
    if let Some(tls) = &listener.tls {
        check(!tls.cert_path.is_empty(), "listener.tls.cert_path", "must not be empty".into());
        check(!tls.key_path.is_empty(), "listener.tls.key_path", "must not be empty".into());
    }

    let pool = &config.pool;
    check(pool.connect_timeout_secs > 0, "pool.connect_timeout_secs", "must be greater than zero".into());
    check(pool.request_timeout_secs > 0, "pool.request_timeout_secs", "must be greater than zero".into());
    check(pool.max_connections > 0, "pool.max_connections", "must be greater than zero".into());
    check(
        pool.max_frame_bytes >= crate::protocol::LENGTH_PREFIX_LEN,
        "pool.max_frame_bytes",
        "must hold at least a length prefix".into(),
    );

    let client = &config.client;
    check(
        client.endpoint.parse::<Endpoint>().is_ok(),
        "client.endpoint",
        format!("{:?} is not host:port", client.endpoint),
    );
    check(client.connect_timeout_secs > 0, "client.connect_timeout_secs", "must be greater than zero".into());
    check(
        !client.tls || client.insecure_skip_verify || !client.ca_file.is_empty(),
        "client.ca_file",
        "TLS requires a CA bundle unless insecure_skip_verify is set".into(),
    );

    let observability = &config.observability;
    if observability.metrics_enabled {
        check(
            observability.metrics_address.parse::<SocketAddr>().is_ok(),
            "observability.metrics_address",
            format!("{:?} is not a socket address", observability.metrics_address),
        );
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
    use crate::config::schema::TlsConfig;

    #[test]
    fn defaults_are_valid() {
        assert!(validate_config(&TunnelConfig::default()).is_ok());
    }

    #[test]
    fn reports_every_problem() {
        let mut config = TunnelConfig::default();
        config.listener.bind_address = "nowhere".into();
        config.pool.request_timeout_secs = 0;
        config.client.endpoint = "missing-port".into();

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert_eq!(
            fields,
            ["listener.bind_address", "pool.request_timeout_secs", "client.endpoint"]
        );
    }

    #[test]
    fn client_tls_needs_trust_anchors() {
        let mut config = TunnelConfig::default();
        config.client.tls = true;
        assert!(validate_config(&config).is_err());

        config.client.insecure_skip_verify = true;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn listener_tls_paths_required() {
        let mut config = TunnelConfig::default();
        config.listener.tls = Some(TlsConfig {
            cert_path: String::new(),
            key_path: "key.pem".into(),
        });
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].field, "listener.tls.cert_path");
    }
}
