//! Error taxonomy shared by the client transport and the server terminator.

use std::time::Duration;
use thiserror::Error;

/// Errors produced anywhere along the tunnel path.
#[derive(Debug, Error)]
pub enum TunnelError {
    /// Malformed status line, header or framing. The stream cannot resynchronize.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A second request was issued while one is outstanding on the same connection.
    #[error("request is already in progress on {connection}")]
    ConcurrencyViolation { connection: String },

    /// Dial, write or read failure towards the real destination.
    #[error("connection failure: {0}")]
    ConnectionFailure(String),

    /// Handshake or record failure on the secure transport.
    #[error("TLS failure: {0}")]
    Tls(String),

    /// No reply arrived within the configured request timeout.
    #[error("no reply within {0:?}")]
    Timeout(Duration),

    /// The pool refused to open another destination connection.
    #[error("connection pool exhausted ({0} connections)")]
    PoolExhausted(usize),

    /// The HTTP request could not be turned into a tunnel exchange.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Address string that is not `host:port`.
    #[error("invalid endpoint {0:?}, expected host:port")]
    InvalidEndpoint(String),

    /// The transport was closed locally or the peer hung up.
    #[error("transport closed")]
    Closed,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl TunnelError {
    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        TunnelError::Protocol(message.into())
    }

    pub(crate) fn tls(message: impl std::fmt::Display) -> Self {
        TunnelError::Tls(message.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TunnelError>;
