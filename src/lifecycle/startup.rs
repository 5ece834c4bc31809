//! Startup orchestration.
//!
//! # Responsibilities
//! - Initialize subsystems in dependency order (metrics, listener, server)
//! - Install the signal handler
//! - Run the server until shutdown
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Listener binds last among the fallible steps, so traffic only arrives when ready

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::TunnelConfig;
use crate::http::TunnelServer;
use crate::lifecycle::shutdown::Shutdown;
use crate::lifecycle::signals::spawn_signal_handler;
use crate::net::listener::{self, ListenerError};
use crate::observability::metrics;

/// Error type for startup and serving.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error("invalid metrics address {0:?}")]
    MetricsAddress(String),

    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),
}

/// Run the tunnel server with a validated configuration until a termination signal.
pub async fn run(config: TunnelConfig) -> Result<(), StartupError> {
    let shutdown = Shutdown::new();
    let signals = spawn_signal_handler(shutdown.clone());
    let result = serve(config, shutdown).await;
    signals.abort();
    result
}

/// Run the tunnel server until `shutdown` fires.
pub async fn serve(config: TunnelConfig, shutdown: Shutdown) -> Result<(), StartupError> {
    if config.observability.metrics_enabled {
        let addr: SocketAddr = config
            .observability
            .metrics_address
            .parse()
            .map_err(|_| StartupError::MetricsAddress(config.observability.metrics_address.clone()))?;
        metrics::init_metrics(addr);
    }

    let listener = listener::bind(&config.listener).await?;

    tracing::info!(
        request_timeout_secs = config.pool.request_timeout_secs,
        idle_timeout_secs = config.pool.idle_timeout_secs,
        max_connections = config.pool.max_connections,
        "Configuration loaded"
    );

    TunnelServer::new(config).run(listener, shutdown).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bad_bind_address_fails_fast() {
        let mut config = TunnelConfig::default();
        config.listener.bind_address = "not an address".into();
        let err = serve(config, Shutdown::new()).await.unwrap_err();
        assert!(matches!(err, StartupError::Listener(ListenerError::Address(_))));
    }

    #[tokio::test]
    async fn bad_metrics_address_fails_fast() {
        let mut config = TunnelConfig::default();
        config.observability.metrics_enabled = true;
        config.observability.metrics_address = "metrics".into();
        let err = serve(config, Shutdown::new()).await.unwrap_err();
        assert!(matches!(err, StartupError::MetricsAddress(_)));
    }
}
