//! Tunnel-backed replacement for a raw protocol socket.
//!
//! The integration layer drives a [`TunnelChannel`] exactly like the native
//! connection it stands in for: non-blocking `read`/`write` plus readiness
//! flags. Each outbound message gets a fresh [`FrameCodec`], each inbound
//! response a fresh [`ResponseParser`]; both are dropped once complete.

use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::path::Path;
use std::time::{Duration, Instant};

use crate::client::codec::FrameCodec;
use crate::client::engine::{client_config, ClientTlsOptions, RustlsEngine};
use crate::client::parser::ResponseParser;
use crate::client::secure::SecureTransport;
use crate::client::transport::{PlainTransport, Transport};
use crate::config::ClientConfig;
use crate::error::{Result, TunnelError};
use crate::protocol::Endpoint;

/// One logical connection to `destination`, carried over the tunnel endpoint.
pub struct TunnelChannel<T = Box<dyn Transport + Send>> {
    transport: T,
    destination: Endpoint,
    codec: Option<FrameCodec>,
    parser: Option<ResponseParser>,
}

impl TunnelChannel {
    /// Dial the tunnel endpoint and pick the transport variant from `config`.
    pub fn connect(config: &ClientConfig, destination: Endpoint) -> Result<Self> {
        let endpoint: Endpoint = config.endpoint.parse()?;
        let stream = dial(&endpoint, Duration::from_secs(config.connect_timeout_secs))?;
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true)?;

        let transport: Box<dyn Transport + Send> = if config.tls {
            let ca_file = (!config.ca_file.is_empty()).then(|| Path::new(&config.ca_file));
            let tls = client_config(&ClientTlsOptions {
                ca_file,
                insecure_skip_verify: config.insecure_skip_verify,
            })?;
            let server_name = if config.server_name.is_empty() {
                endpoint.host()
            } else {
                config.server_name.as_str()
            };
            let engine = RustlsEngine::new(tls, server_name)?;
            Box::new(SecureTransport::new(stream, engine))
        } else {
            Box::new(PlainTransport::new(stream))
        };

        tracing::debug!(
            endpoint = %endpoint,
            destination = %destination,
            tls = config.tls,
            "Tunnel channel connected"
        );
        Ok(Self::new(transport, destination))
    }
}

impl<T: Transport> TunnelChannel<T> {
    pub fn new(transport: T, destination: Endpoint) -> Self {
        Self {
            transport,
            destination,
            codec: None,
            parser: None,
        }
    }

    pub fn destination(&self) -> &Endpoint {
        &self.destination
    }

    /// Send message bytes. The first call for a message must carry its whole length prefix.
    pub fn write(&mut self, src: &[u8]) -> Result<usize> {
        if !self.transport.ready() {
            self.transport.handshake()?;
            if !self.transport.ready() {
                return Ok(0);
            }
        }
        if src.is_empty() && self.codec.is_none() {
            return Ok(0);
        }

        let destination = &self.destination;
        let codec = self
            .codec
            .get_or_insert_with(|| FrameCodec::new(destination.clone()));
        let n = codec.write(&mut self.transport, src)?;
        if !codec.has_remaining() {
            self.codec = None;
        }
        Ok(n)
    }

    /// Receive reply bytes into `dst`.
    pub fn read(&mut self, dst: &mut [u8]) -> Result<usize> {
        if !self.transport.ready() {
            self.transport.handshake()?;
            if !self.transport.ready() {
                return Ok(0);
            }
        }

        let parser = self.parser.get_or_insert_with(ResponseParser::new);
        let n = parser.read(&mut self.transport, dst)?;
        if !parser.has_remaining() {
            self.parser = None;
        }
        Ok(n)
    }

    pub fn ready(&self) -> bool {
        self.transport.ready()
    }

    /// Advance connection setup; the event loop calls this on readiness until [`ready`](Self::ready).
    pub fn handshake(&mut self) -> Result<()> {
        if self.transport.ready() {
            return Ok(());
        }
        self.transport.handshake()
    }

    /// A message is part-way through being sent.
    pub fn is_writing(&self) -> bool {
        self.codec.is_some()
    }

    /// A response is part-way through being received.
    pub fn is_reading(&self) -> bool {
        self.parser.is_some()
    }

    pub fn wants_write(&self) -> bool {
        self.transport.wants_write()
    }

    pub fn has_buffered_read(&self) -> bool {
        self.transport.has_buffered_read()
    }

    pub fn close(&mut self) {
        self.codec = None;
        self.parser = None;
        self.transport.close();
    }

    /// Send one message and collect its reply by polling, for callers without
    /// an event loop. Fails with [`TunnelError::Timeout`] once `timeout` passes.
    pub fn exchange(&mut self, message: &[u8], timeout: Duration) -> Result<Vec<u8>> {
        let deadline = Instant::now() + timeout;
        let idle = |progress: usize| -> Result<()> {
            if progress == 0 {
                if Instant::now() >= deadline {
                    return Err(TunnelError::Timeout(timeout));
                }
                std::thread::sleep(POLL_INTERVAL);
            }
            Ok(())
        };

        let mut sent = 0;
        while sent < message.len() || self.is_writing() {
            let n = self.write(&message[sent..])?;
            sent += n;
            idle(n)?;
        }

        let mut reply = Vec::new();
        let mut buf = vec![0u8; 16 * 1024];
        loop {
            let n = self.read(&mut buf)?;
            reply.extend_from_slice(&buf[..n]);
            // An empty body completes on a zero-byte read
            if self.ready() && !self.is_reading() {
                return Ok(reply);
            }
            idle(n)?;
        }
    }
}

const POLL_INTERVAL: Duration = Duration::from_millis(2);

fn dial(endpoint: &Endpoint, timeout: Duration) -> Result<TcpStream> {
    let addrs: Vec<SocketAddr> = (endpoint.host(), endpoint.port()).to_socket_addrs()?.collect();
    let mut last_error = None;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_error = Some(e),
        }
    }
    Err(TunnelError::ConnectionFailure(match last_error {
        Some(e) => format!("connect to {endpoint}: {e}"),
        None => format!("{endpoint} did not resolve to any address"),
    }))
}
