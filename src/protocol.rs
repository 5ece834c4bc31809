//! Wire-level constants and the frame format carried through the tunnel.
//!
//! ```text
//! Frame:    [u32 big-endian length n][n bytes of opaque payload]
//! Envelope: POST /proxy HTTP/1.1, Host = destination, body = one Frame
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;
use std::str::FromStr;

use crate::error::{Result, TunnelError};

/// Fixed request path of the tunnel endpoint.
pub const PROXY_PATH: &str = "/proxy";

/// Content type of both request and response bodies.
pub const CONTENT_TYPE: &str = "application/octet-stream";

/// Size of the big-endian length prefix that starts every frame.
pub const LENGTH_PREFIX_LEN: usize = 4;

/// A `host:port` destination or tunnel address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Host without IPv6 brackets, suitable for name resolution.
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl FromStr for Endpoint {
    type Err = TunnelError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || TunnelError::InvalidEndpoint(s.to_string());
        let (host, port) = s.trim().rsplit_once(':').ok_or_else(invalid)?;

        let host = match host.strip_prefix('[') {
            Some(rest) => rest.strip_suffix(']').ok_or_else(invalid)?,
            // Unbracketed IPv6 literals are ambiguous
            None if host.contains(':') => return Err(invalid()),
            None => host,
        };
        if host.is_empty() {
            return Err(invalid());
        }

        let port = port.parse::<u16>().map_err(|_| invalid())?;
        Ok(Self::new(host, port))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Read the length prefix at the start of `buf`, if present.
pub fn length_prefix(buf: &[u8]) -> Option<u32> {
    let head: [u8; LENGTH_PREFIX_LEN] = buf.get(..LENGTH_PREFIX_LEN)?.try_into().ok()?;
    Some(u32::from_be_bytes(head))
}

/// Check that `body` is exactly one frame: a prefix followed by that many bytes.
pub fn validate_frame(body: &[u8]) -> Result<()> {
    let declared = length_prefix(body).ok_or_else(|| {
        TunnelError::InvalidRequest(format!(
            "body of {} bytes is shorter than the length prefix",
            body.len()
        ))
    })?;

    let actual = body.len() - LENGTH_PREFIX_LEN;
    if declared as usize != actual {
        return Err(TunnelError::InvalidRequest(format!(
            "frame declares {declared} payload bytes but carries {actual}"
        )));
    }
    Ok(())
}

/// Prefix `payload` with its length.
pub fn encode_frame(payload: &[u8]) -> Bytes {
    let mut frame = BytesMut::with_capacity(LENGTH_PREFIX_LEN + payload.len());
    frame.put_u32(payload.len() as u32);
    frame.put_slice(payload);
    frame.freeze()
}
