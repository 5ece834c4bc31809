//! HTTP tunnel for length-prefixed binary protocols.
//!
//! The client wraps each message in a `POST /proxy` request addressed (via
//! the Host header) to the real destination; the server terminates those
//! requests and relays the frames over pooled TCP connections.

pub mod error;
pub mod protocol;

// Client side
pub mod client;

// Server side
pub mod http;
pub mod net;
pub mod pool;

// Cross-cutting concerns
pub mod config;
pub mod lifecycle;
pub mod observability;

pub use client::TunnelChannel;
pub use config::TunnelConfig;
pub use error::{Result, TunnelError};
pub use http::TunnelServer;
pub use lifecycle::Shutdown;
pub use pool::ConnectionMultiplexer;
pub use protocol::Endpoint;
