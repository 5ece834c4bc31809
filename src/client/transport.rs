//! Byte-stream transport abstraction used by the client side of the tunnel.
//!
//! # Responsibilities
//! - Define the non-blocking [`Transport`] contract driven by an external poller
//! - Provide the cleartext variant ([`PlainTransport`])
//! - Normalise socket readiness: `WouldBlock` is zero progress, not an error
//!
//! # Design Decisions
//! - Selected once at connection setup; the secure variant lives in `secure.rs`
//! - Every call returns promptly with partial progress

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};

use crate::error::{Result, TunnelError};

/// A non-blocking byte stream the client transports run on.
pub trait Socket: Read + Write {
    /// Whether the peer is still attached.
    fn is_connected(&self) -> bool;

    /// Tear the stream down in both directions.
    fn shutdown(&mut self) -> io::Result<()>;
}

impl Socket for TcpStream {
    fn is_connected(&self) -> bool {
        self.peer_addr().is_ok()
    }

    fn shutdown(&mut self) -> io::Result<()> {
        TcpStream::shutdown(self, Shutdown::Both)
    }
}

/// The read/write/handshake capability set the event loop drives.
pub trait Transport {
    /// Read into `dst`, returning how many bytes were delivered. Zero means "try later".
    fn read(&mut self, dst: &mut [u8]) -> Result<usize>;

    /// Write from `src`, returning how many bytes were accepted. Zero means "try later".
    fn write(&mut self, src: &[u8]) -> Result<usize>;

    /// Whether application data may flow.
    fn ready(&self) -> bool;

    /// Advance connection setup. A no-op once ready.
    fn handshake(&mut self) -> Result<()>;

    /// Whether decoded bytes are waiting that the socket will not signal for.
    fn has_buffered_read(&self) -> bool;

    /// Whether the transport needs write-readiness to make progress.
    fn wants_write(&self) -> bool;

    /// Release the socket. Safe to call in any state, more than once.
    fn close(&mut self);
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn read(&mut self, dst: &mut [u8]) -> Result<usize> {
        (**self).read(dst)
    }

    fn write(&mut self, src: &[u8]) -> Result<usize> {
        (**self).write(src)
    }

    fn ready(&self) -> bool {
        (**self).ready()
    }

    fn handshake(&mut self) -> Result<()> {
        (**self).handshake()
    }

    fn has_buffered_read(&self) -> bool {
        (**self).has_buffered_read()
    }

    fn wants_write(&self) -> bool {
        (**self).wants_write()
    }

    fn close(&mut self) {
        (**self).close()
    }
}

/// Read whatever is available. End of stream on a non-empty buffer is [`TunnelError::Closed`].
pub(crate) fn read_available<R: Read + ?Sized>(io: &mut R, buf: &mut [u8]) -> Result<usize> {
    if buf.is_empty() {
        return Ok(0);
    }
    loop {
        match io.read(buf) {
            Ok(0) => return Err(TunnelError::Closed),
            Ok(n) => return Ok(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(0),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
}

/// Write whatever the socket accepts right now.
pub(crate) fn write_available<W: Write + ?Sized>(io: &mut W, buf: &[u8]) -> Result<usize> {
    if buf.is_empty() {
        return Ok(0);
    }
    loop {
        match io.write(buf) {
            Ok(0) => return Err(TunnelError::Closed),
            Ok(n) => return Ok(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(0),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
}

/// Cleartext transport: bytes go straight to the socket.
#[derive(Debug)]
pub struct PlainTransport<S> {
    socket: Option<S>,
}

impl<S: Socket> PlainTransport<S> {
    pub fn new(socket: S) -> Self {
        Self {
            socket: Some(socket),
        }
    }

    fn socket(&mut self) -> Result<&mut S> {
        self.socket.as_mut().ok_or(TunnelError::Closed)
    }
}

impl<S: Socket> Transport for PlainTransport<S> {
    fn read(&mut self, dst: &mut [u8]) -> Result<usize> {
        read_available(self.socket()?, dst)
    }

    fn write(&mut self, src: &[u8]) -> Result<usize> {
        write_available(self.socket()?, src)
    }

    fn ready(&self) -> bool {
        self.socket.is_some()
    }

    fn handshake(&mut self) -> Result<()> {
        Ok(())
    }

    fn has_buffered_read(&self) -> bool {
        false
    }

    fn wants_write(&self) -> bool {
        false
    }

    fn close(&mut self) {
        if let Some(mut socket) = self.socket.take() {
            if let Err(e) = socket.shutdown() {
                tracing::debug!(error = %e, "Socket shutdown failed");
            }
        }
    }
}
