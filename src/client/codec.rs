//! Outbound envelope encoder.
//!
//! Wraps one length-prefixed message in a `POST /proxy` request. The request
//! head and the 4-byte prefix are staged together and must reach the
//! transport in full before any payload byte is written.
//!
//! ```text
//! write(src) ──▶ [request head + prefix] ──flush──▶ [payload bytes] ──▶ transport
//! ```

use crate::client::transport::Transport;
use crate::error::{Result, TunnelError};
use crate::protocol::{Endpoint, CONTENT_TYPE, LENGTH_PREFIX_LEN, PROXY_PATH};

/// Encodes a single message. Discard once [`has_remaining`](Self::has_remaining) is false.
#[derive(Debug)]
pub struct FrameCodec {
    destination: Endpoint,
    head: Vec<u8>,
    head_written: usize,
    payload_remaining: usize,
    started: bool,
}

impl FrameCodec {
    pub fn new(destination: Endpoint) -> Self {
        Self {
            destination,
            head: Vec::new(),
            head_written: 0,
            payload_remaining: 0,
            started: false,
        }
    }

    /// Feed message bytes, returning how many were consumed on this call.
    ///
    /// The first call must carry the whole length prefix. Request head bytes
    /// are not counted; zero is returned while the transport is not accepting.
    pub fn write<T: Transport + ?Sized>(&mut self, transport: &mut T, src: &[u8]) -> Result<usize> {
        let mut consumed = 0;

        if !self.started {
            if src.len() < LENGTH_PREFIX_LEN {
                return Err(TunnelError::protocol(format!(
                    "message must start with a whole {LENGTH_PREFIX_LEN}-byte length prefix, got {} bytes",
                    src.len()
                )));
            }
            let prefix = &src[..LENGTH_PREFIX_LEN];
            let size = u32::from_be_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;
            self.head = self.request_head(size);
            self.head.extend_from_slice(prefix);
            self.payload_remaining = size;
            self.started = true;
            consumed = LENGTH_PREFIX_LEN;
        }

        while self.head_written < self.head.len() {
            let n = transport.write(&self.head[self.head_written..])?;
            if n == 0 {
                return Ok(consumed);
            }
            self.head_written += n;
        }

        while self.payload_remaining > 0 && consumed < src.len() {
            let end = src.len().min(consumed + self.payload_remaining);
            let n = transport.write(&src[consumed..end])?;
            if n == 0 {
                break;
            }
            consumed += n;
            self.payload_remaining -= n;
        }

        Ok(consumed)
    }

    /// True while head bytes are unflushed or payload bytes are still expected.
    pub fn has_remaining(&self) -> bool {
        !self.started || self.head_written < self.head.len() || self.payload_remaining > 0
    }

    fn request_head(&self, size: usize) -> Vec<u8> {
        format!(
            "POST {PROXY_PATH} HTTP/1.1\r\nHost: {}\r\nContent-Type: {CONTENT_TYPE}\r\nContent-Length: {}\r\n\r\n",
            self.destination,
            size + LENGTH_PREFIX_LEN
        )
        .into_bytes()
    }
}
