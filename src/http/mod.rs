//! HTTP side of the tunnel endpoint.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (Axum setup, middleware, graceful shutdown)
//!     → terminator.rs (Host → destination, frame check, pool send)
//!     → 200 + reply frame, or an empty error status
//! ```

pub mod server;
pub mod terminator;

pub use server::TunnelServer;
pub use terminator::{proxy_handler, status_for, AppState};
