//! Encrypted transport over a non-blocking socket.
//!
//! # Responsibilities
//! - Drive the secure engine's handshake from an external readiness loop
//! - Encrypt outbound and decrypt inbound application bytes
//! - Send a best-effort close notification on shutdown
//!
//! # Session States
//! ```text
//! Initial ──handshake()──▶ Handshaking ──finished──▶ Ready
//!                              │   └──finished (post-handshake msgs)──▶ PostHandshake ──first app I/O──▶ Ready
//!                              └──engine error──▶ HandshakeFailed
//! any ──close()──▶ Closing
//! ```
//!
//! # Design Decisions
//! - Four buffers (network read/write, application read/write) that only grow
//! - Queued ciphertext is always flushed before the engine is consulted again
//! - `write` reports progress only once its bytes are encrypted and on the wire

use std::fmt;

use crate::client::buffer::NetBuffer;
use crate::client::transport::{read_available, write_available, Socket, Transport};
use crate::error::{Result, TunnelError};

/// What the engine needs next to make handshake progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStatus {
    /// Run delegated computation (e.g. certificate validation).
    NeedTask,
    /// Produce handshake bytes for the peer.
    NeedOutput,
    /// Consume handshake bytes from the peer.
    NeedInput,
    /// The handshake just completed.
    Finished,
    NotHandshaking,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStatus {
    Ok,
    /// Destination too small for the next record.
    BufferOverflow,
    /// Source does not yet hold a complete record.
    BufferUnderflow,
    /// The engine has shut down in this direction.
    Closed,
}

/// Outcome of one encrypt or decrypt call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineResult {
    pub status: EngineStatus,
    pub consumed: usize,
    pub produced: usize,
}

impl EngineResult {
    pub fn ok(consumed: usize, produced: usize) -> Self {
        Self {
            status: EngineStatus::Ok,
            consumed,
            produced,
        }
    }

    pub fn status(status: EngineStatus) -> Self {
        Self {
            status,
            consumed: 0,
            produced: 0,
        }
    }
}

/// Blocking-free computation handed back by the engine during the handshake.
pub type DelegatedTask = Box<dyn FnOnce() + Send>;

/// A TLS state machine that never touches the socket itself.
pub trait SecureEngine {
    /// Advertised size of one network record.
    fn packet_buffer_size(&self) -> usize;

    /// Advertised size of one decrypted record.
    fn application_buffer_size(&self) -> usize;

    fn begin_handshake(&mut self) -> Result<()>;

    fn handshake_status(&self) -> HandshakeStatus;

    fn delegated_task(&mut self) -> Option<DelegatedTask>;

    /// Encrypt bytes from `src` into `dst`.
    fn encrypt(&mut self, src: &[u8], dst: &mut [u8]) -> Result<EngineResult>;

    /// Decrypt bytes from `src` into `dst`.
    fn decrypt(&mut self, src: &[u8], dst: &mut [u8]) -> Result<EngineResult>;

    /// Queue a close notification; later `encrypt` calls emit it.
    fn close_outbound(&mut self);

    /// Whether the engine still holds ciphertext not yet handed out by `encrypt`.
    fn has_pending_output(&self) -> bool {
        false
    }

    /// Whether the negotiated protocol allows control messages after the handshake.
    fn allows_post_handshake_messages(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Initial,
    Handshaking,
    HandshakeFailed,
    PostHandshake,
    Ready,
    Closing,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Secure variant of [`Transport`].
pub struct SecureTransport<S, E> {
    socket: Option<S>,
    engine: E,
    state: SessionState,
    net_read: NetBuffer,
    net_write: NetBuffer,
    app_read: NetBuffer,
    app_write: NetBuffer,
    /// Length of the caller buffer captured by an unfinished `write`.
    pending_write: Option<usize>,
    write_interest: bool,
    inbound_closed: bool,
    failure: Option<String>,
}

impl<S: Socket, E: SecureEngine> SecureTransport<S, E> {
    pub fn new(socket: S, engine: E) -> Self {
        Self {
            socket: Some(socket),
            engine,
            state: SessionState::Initial,
            net_read: NetBuffer::default(),
            net_write: NetBuffer::default(),
            app_read: NetBuffer::default(),
            app_write: NetBuffer::default(),
            pending_write: None,
            write_interest: false,
            inbound_closed: false,
            failure: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    fn socket(&mut self) -> Result<&mut S> {
        self.socket.as_mut().ok_or(TunnelError::Closed)
    }

    /// Push queued ciphertext to the socket. True once nothing is left.
    fn flush(&mut self) -> Result<bool> {
        while !self.net_write.is_empty() {
            let socket = self.socket.as_mut().ok_or(TunnelError::Closed)?;
            let n = write_available(socket, self.net_write.filled())?;
            if n == 0 {
                return Ok(false);
            }
            self.net_write.consume(n);
        }
        Ok(true)
    }

    /// Pull ciphertext from the socket into the network read buffer.
    fn fill(&mut self) -> Result<usize> {
        self.net_read.compact();
        if self.net_read.spare_len() == 0 {
            self.net_read.grow(self.engine.packet_buffer_size());
        }
        let socket = self.socket.as_mut().ok_or(TunnelError::Closed)?;
        let n = read_available(socket, self.net_read.spare_mut())?;
        self.net_read.commit(n);
        Ok(n)
    }

    /// Encrypt `app_write` into `net_write`, growing on overflow.
    fn encrypt_pending(&mut self) -> Result<EngineResult> {
        loop {
            self.net_write.compact();
            let result = self
                .engine
                .encrypt(self.app_write.filled(), self.net_write.spare_mut())?;
            self.app_write.consume(result.consumed);
            self.net_write.commit(result.produced);

            match result.status {
                EngineStatus::BufferOverflow => {
                    tracing::trace!(capacity = self.net_write.capacity(), "Network write buffer overflow");
                    self.net_write.grow(self.engine.packet_buffer_size());
                }
                EngineStatus::BufferUnderflow => {
                    return Err(TunnelError::tls("secure engine reported underflow while encrypting"));
                }
                _ => return Ok(result),
            }
        }
    }

    /// Decrypt from `net_read` into `app_read`, growing on overflow.
    fn decrypt_pending(&mut self) -> Result<EngineResult> {
        loop {
            self.app_read.compact();
            let result = self
                .engine
                .decrypt(self.net_read.filled(), self.app_read.spare_mut())?;
            self.net_read.consume(result.consumed);
            self.app_read.commit(result.produced);

            if result.status == EngineStatus::BufferOverflow {
                tracing::trace!(capacity = self.app_read.capacity(), "Application read buffer overflow");
                self.app_read.grow(self.engine.application_buffer_size());
                continue;
            }
            if result.status == EngineStatus::BufferUnderflow
                && self.net_read.capacity() < self.engine.packet_buffer_size()
            {
                self.net_read.grow(self.engine.packet_buffer_size());
            }
            return Ok(result);
        }
    }

    fn drive_handshake(&mut self) -> Result<()> {
        loop {
            match self.engine.handshake_status() {
                HandshakeStatus::NeedTask => {
                    while let Some(task) = self.engine.delegated_task() {
                        task();
                    }
                }
                HandshakeStatus::NeedOutput => {
                    let result = self.encrypt_pending()?;
                    if result.status == EngineStatus::Closed {
                        return Err(TunnelError::tls("engine closed during handshake"));
                    }
                    self.write_interest = true;
                    if !self.flush()? {
                        return Ok(());
                    }
                    if result.produced == 0 && self.engine.handshake_status() == HandshakeStatus::NeedOutput {
                        return Err(TunnelError::tls("secure engine produced no handshake output"));
                    }
                }
                HandshakeStatus::NeedInput => {
                    let result = self.decrypt_pending()?;
                    match result.status {
                        EngineStatus::Closed => {
                            return Err(TunnelError::tls("peer closed the connection during handshake"));
                        }
                        EngineStatus::BufferUnderflow => {
                            if self.fill()? == 0 {
                                return Ok(());
                            }
                        }
                        _ if result.consumed == 0 && result.produced == 0 => {
                            if self.fill()? == 0 {
                                return Ok(());
                            }
                        }
                        _ => {}
                    }
                }
                HandshakeStatus::Finished | HandshakeStatus::NotHandshaking => {
                    self.finish_handshake()?;
                    return Ok(());
                }
            }
        }
    }

    fn finish_handshake(&mut self) -> Result<()> {
        // The final handshake flight may still sit inside the engine
        while self.engine.has_pending_output() {
            let result = self.encrypt_pending()?;
            if result.produced == 0 {
                break;
            }
        }
        self.app_read.reserve(self.engine.application_buffer_size());
        self.state = if self.engine.allows_post_handshake_messages() {
            SessionState::PostHandshake
        } else {
            SessionState::Ready
        };
        self.write_interest = !self.flush()?;
        tracing::debug!(state = %self.state, "Secure handshake complete");
        Ok(())
    }

    fn fail_handshake(&mut self, error: TunnelError) -> Result<()> {
        tracing::debug!(error = %error, "Secure handshake failed");
        self.state = SessionState::HandshakeFailed;
        let message = match error {
            TunnelError::Tls(message) => message,
            other => other.to_string(),
        };
        self.failure = Some(message.clone());
        // Alerts queued by the engine go out before the failure is reported
        match self.flush() {
            Ok(true) => Err(TunnelError::Tls(message)),
            Ok(false) => {
                self.write_interest = true;
                Ok(())
            }
            Err(_) => Err(TunnelError::Tls(message)),
        }
    }

    fn check_app_io(&self) -> Result<()> {
        match self.state {
            SessionState::Ready | SessionState::PostHandshake => Ok(()),
            SessionState::Closing => Err(TunnelError::Closed),
            state => Err(TunnelError::tls(format!("application I/O attempted in state {state}"))),
        }
    }

    fn mark_app_io(&mut self) {
        if self.state == SessionState::PostHandshake {
            self.state = SessionState::Ready;
        }
    }
}

impl<S: Socket, E: SecureEngine> Transport for SecureTransport<S, E> {
    fn read(&mut self, dst: &mut [u8]) -> Result<usize> {
        self.check_app_io()?;
        let mut copied = self.app_read.drain_into(dst);
        if self.inbound_closed {
            return if copied == 0 && !dst.is_empty() {
                Err(TunnelError::Closed)
            } else {
                Ok(copied)
            };
        }

        while copied < dst.len() {
            let result = self.decrypt_pending()?;
            copied += self.app_read.drain_into(&mut dst[copied..]);

            match result.status {
                EngineStatus::Closed => {
                    self.inbound_closed = true;
                    if copied == 0 && self.app_read.is_empty() {
                        return Err(TunnelError::Closed);
                    }
                    break;
                }
                EngineStatus::BufferUnderflow => {
                    if self.fill()? == 0 {
                        break;
                    }
                }
                _ if result.consumed == 0 && result.produced == 0 => {
                    if self.fill()? == 0 {
                        break;
                    }
                }
                _ => {}
            }
        }

        if copied > 0 {
            self.mark_app_io();
        }
        Ok(copied)
    }

    fn write(&mut self, src: &[u8]) -> Result<usize> {
        self.check_app_io()?;
        if self.pending_write.is_none() {
            if src.is_empty() {
                return Ok(0);
            }
            self.app_write.extend_from_slice(src);
            self.pending_write = Some(src.len());
        }

        loop {
            if !self.flush()? {
                self.write_interest = true;
                return Ok(0);
            }
            if self.app_write.is_empty() && !self.engine.has_pending_output() {
                break;
            }
            let result = self.encrypt_pending()?;
            if result.status == EngineStatus::Closed {
                return Err(TunnelError::Closed);
            }
            if result.consumed == 0 && result.produced == 0 {
                return Err(TunnelError::tls("secure engine made no progress encrypting"));
            }
        }

        self.write_interest = false;
        self.mark_app_io();
        Ok(self.pending_write.take().unwrap_or_default())
    }

    fn ready(&self) -> bool {
        matches!(self.state, SessionState::Ready | SessionState::PostHandshake)
    }

    fn handshake(&mut self) -> Result<()> {
        match self.state {
            SessionState::Initial => {
                let packet = self.engine.packet_buffer_size();
                self.net_read = NetBuffer::with_capacity(packet);
                self.net_write = NetBuffer::with_capacity(packet);
                self.engine.begin_handshake()?;
                self.state = SessionState::Handshaking;
                tracing::debug!(packet_buffer = packet, "Secure handshake started");
            }
            SessionState::Ready | SessionState::PostHandshake => {
                return Err(TunnelError::tls("renegotiation is not supported"));
            }
            SessionState::Closing => return Err(TunnelError::Closed),
            SessionState::Handshaking | SessionState::HandshakeFailed => {}
        }

        if !self.flush()? {
            self.write_interest = true;
            return Ok(());
        }
        if self.state == SessionState::HandshakeFailed {
            let message = self.failure.clone().unwrap_or_default();
            return Err(TunnelError::Tls(message));
        }
        self.write_interest = false;

        match self.drive_handshake() {
            Ok(()) => Ok(()),
            Err(TunnelError::Closed) => Err(TunnelError::Closed),
            Err(error) => self.fail_handshake(error),
        }
    }

    fn has_buffered_read(&self) -> bool {
        !self.app_read.is_empty() || !self.net_read.is_empty()
    }

    fn wants_write(&self) -> bool {
        self.write_interest || !self.net_write.is_empty()
    }

    fn close(&mut self) {
        if self.state == SessionState::Closing {
            return;
        }
        let handshake_started = self.state != SessionState::Initial;
        self.state = SessionState::Closing;

        let connected = self.socket.as_ref().is_some_and(Socket::is_connected);
        if handshake_started && connected {
            self.engine.close_outbound();
            let notify = self.encrypt_pending().and_then(|_| self.flush());
            match notify {
                Ok(true) => tracing::trace!("Close notification sent"),
                Ok(false) => tracing::debug!("Close notification not fully flushed"),
                Err(e) => tracing::debug!(error = %e, "Failed to send close notification"),
            }
        }

        if let Ok(socket) = self.socket() {
            if let Err(e) = socket.shutdown() {
                tracing::debug!(error = %e, "Socket shutdown failed");
            }
        }
        self.socket = None;
        self.net_read.release();
        self.net_write.release();
        self.app_read.release();
        self.app_write.release();
        self.pending_write = None;
        self.write_interest = false;
    }
}

impl<S, E> fmt::Debug for SecureTransport<S, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureTransport")
            .field("state", &self.state)
            .field("net_read", &self.net_read.capacity())
            .field("net_write", &self.net_write.capacity())
            .field("app_read", &self.app_read.capacity())
            .field("app_write", &self.app_write.capacity())
            .finish()
    }
}
