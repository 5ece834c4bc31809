//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from TOML files and
//! every field has a default, so an empty file is a valid configuration.

use serde::{Deserialize, Serialize};

/// Root configuration for the tunnel.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct TunnelConfig {
    /// Server listener (bind address, body limit, TLS).
    pub listener: ListenerConfig,

    /// Destination connection pool.
    pub pool: PoolConfig,

    /// Client side of the tunnel hop.
    pub client: ClientConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Optional TLS configuration.
    pub tls: Option<TlsConfig>,

    /// Largest request body accepted, in bytes.
    pub max_body_bytes: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            tls: None,
            max_body_bytes: 100 * 1024 * 1024,
        }
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

/// Pooled destination connections.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Destination dial timeout in seconds.
    pub connect_timeout_secs: u64,

    /// How long a request waits for its reply, in seconds.
    pub request_timeout_secs: u64,

    /// Idle connections older than this are closed. 0 disables eviction.
    pub idle_timeout_secs: u64,

    /// Maximum number of pooled connections.
    pub max_connections: usize,

    /// Largest reply frame accepted from a destination, in bytes.
    pub max_frame_bytes: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 5,
            request_timeout_secs: 30,
            idle_timeout_secs: 300,
            max_connections: 10_000,
            max_frame_bytes: 100 * 1024 * 1024,
        }
    }
}

/// Client side of the tunnel hop.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Tunnel endpoint (`host:port`).
    pub endpoint: String,

    /// Whether the tunnel hop uses TLS.
    pub tls: bool,

    /// Name to verify the server certificate against. Empty means the endpoint host.
    pub server_name: String,

    /// PEM bundle of trusted roots.
    pub ca_file: String,

    /// Accept any server certificate.
    pub insecure_skip_verify: bool,

    /// Tunnel endpoint dial timeout in seconds.
    pub connect_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: "127.0.0.1:8080".to_string(),
            tls: false,
            server_name: String::new(),
            ca_file: String::new(),
            insecure_skip_verify: false,
            connect_timeout_secs: 5,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Default log filter when `RUST_LOG` is unset.
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config: TunnelConfig = toml::from_str("").unwrap();
        assert_eq!(config.listener.bind_address, "0.0.0.0:8080");
        assert_eq!(config.pool.request_timeout_secs, 30);
        assert!(!config.client.tls);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config: TunnelConfig = toml::from_str(
            r#"
            [listener]
            bind_address = "127.0.0.1:9000"

            [listener.tls]
            cert_path = "cert.pem"
            key_path = "key.pem"

            [pool]
            idle_timeout_secs = 0

            [client]
            endpoint = "tunnel.example.com:443"
            tls = true
            "#,
        )
        .unwrap();

        assert_eq!(config.listener.bind_address, "127.0.0.1:9000");
        assert_eq!(config.listener.tls.unwrap().key_path, "key.pem");
        assert_eq!(config.pool.idle_timeout_secs, 0);
        assert_eq!(config.pool.max_connections, 10_000);
        assert_eq!(config.client.endpoint, "tunnel.example.com:443");
        assert_eq!(config.client.connect_timeout_secs, 5);
    }
}
