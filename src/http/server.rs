//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router with the single tunnel route
//! - Wire up middleware (tracing, body limit, request ID)
//! - Serve plain HTTP or TLS on a bound listener
//! - Run the idle sweeper and close the pool on shutdown

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use axum::{extract::DefaultBodyLimit, routing::post, Router};
use tokio::net::TcpListener;
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::config::TunnelConfig;
use crate::http::terminator::{proxy_handler, AppState};
use crate::lifecycle::shutdown::{wait as shutdown_signal, Shutdown};
use crate::net::tls::load_tls_config;
use crate::pool::ConnectionMultiplexer;
use crate::protocol::PROXY_PATH;

/// How long in-flight exchanges get to finish once shutdown starts.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP server for the tunnel endpoint.
pub struct TunnelServer {
    router: Router,
    config: TunnelConfig,
    multiplexer: ConnectionMultiplexer,
}

impl TunnelServer {
    /// Create a new server with the given configuration.
    pub fn new(config: TunnelConfig) -> Self {
        let multiplexer = ConnectionMultiplexer::from_config(&config.pool);
        let state = AppState {
            multiplexer: multiplexer.clone(),
        };
        let router = Self::build_router(&config, state);
        Self {
            router,
            config,
            multiplexer,
        }
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(config: &TunnelConfig, state: AppState) -> Router {
        Router::new()
            .route(PROXY_PATH, post(proxy_handler))
            .with_state(state)
            .layer(DefaultBodyLimit::disable())
            .layer(RequestBodyLimitLayer::new(config.listener.max_body_bytes))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    /// The router, for driving the server without a socket.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn multiplexer(&self) -> &ConnectionMultiplexer {
        &self.multiplexer
    }

    pub fn config(&self) -> &TunnelConfig {
        &self.config
    }

    /// Serve on `listener` until `shutdown` fires, then close the pool.
    pub async fn run(self, listener: TcpListener, shutdown: Shutdown) -> std::io::Result<()> {
        let addr = listener.local_addr()?;
        let idle = Duration::from_secs(self.config.pool.idle_timeout_secs);
        let sweeper = (!idle.is_zero())
            .then(|| self.multiplexer.spawn_idle_sweeper(idle, shutdown.subscribe()));

        let app = self
            .router
            .into_make_service_with_connect_info::<SocketAddr>();

        match &self.config.listener.tls {
            None => {
                tracing::info!(address = %addr, "Tunnel server starting");
                axum::serve(listener, app)
                    .with_graceful_shutdown(shutdown_signal(shutdown.subscribe()))
                    .await?;
            }
            Some(tls) => {
                let rustls = load_tls_config(Path::new(&tls.cert_path), Path::new(&tls.key_path)).await?;
                let handle = axum_server::Handle::new();
                let stop = handle.clone();
                let signal = shutdown.subscribe();
                tokio::spawn(async move {
                    shutdown_signal(signal).await;
                    stop.graceful_shutdown(Some(DRAIN_TIMEOUT));
                });

                tracing::info!(address = %addr, "Tunnel server starting (TLS)");
                axum_server::tls_rustls::from_tcp_rustls(listener.into_std()?, rustls)
                    .handle(handle)
                    .serve(app)
                    .await?;
            }
        }

        if let Some(sweeper) = sweeper {
            sweeper.abort();
        }
        self.multiplexer.close_all();
        tracing::info!("Tunnel server stopped");
        Ok(())
    }
}
