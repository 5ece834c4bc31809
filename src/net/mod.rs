//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! listener.rs (bind the configured address)
//!     → tls.rs (optional server certificate for the tunnel hop)
//!     → http::server (axum / axum-server serving)
//! ```

pub mod listener;
pub mod tls;

pub use listener::{bind, ListenerError};
pub use tls::load_tls_config;
