//! One pooled destination connection and its in-flight slot.
//!
//! # Responsibilities
//! - Identify a tunnel session by (origin, destination)
//! - Hold the single pending-reply slot; a second claim is a contract violation
//! - Own the write half and the reader task of the destination socket

use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::{oneshot, OnceCell};
use tokio::task::AbortHandle;

use crate::error::{Result, TunnelError};
use crate::protocol::Endpoint;

/// Logical tunnel session: who is asking, and where to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId {
    origin: SocketAddr,
    destination: Endpoint,
}

impl ConnectionId {
    pub fn new(origin: SocketAddr, destination: Endpoint) -> Self {
        Self { origin, destination }
    }

    pub fn origin(&self) -> SocketAddr {
        self.origin
    }

    pub fn destination(&self) -> &Endpoint {
        &self.destination
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.origin, self.destination)
    }
}

pub(crate) type ReplySender = oneshot::Sender<Result<Bytes>>;
pub(crate) type ReplyReceiver = oneshot::Receiver<Result<Bytes>>;

/// Live socket to the destination.
#[derive(Debug)]
pub(crate) struct Link {
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    reader: AbortHandle,
}

impl Link {
    pub(crate) fn new(writer: OwnedWriteHalf, reader: AbortHandle) -> Self {
        Self {
            writer: tokio::sync::Mutex::new(writer),
            reader,
        }
    }
}

#[derive(Debug)]
struct Slot {
    pending: Option<ReplySender>,
    closed: bool,
    last_used: Instant,
}

/// A persistent connection to one destination, one request at a time.
#[derive(Debug)]
pub struct PooledConnection {
    id: ConnectionId,
    link: OnceCell<Link>,
    slot: Mutex<Slot>,
}

impl PooledConnection {
    pub fn new(id: ConnectionId) -> Self {
        Self {
            id,
            link: OnceCell::new(),
            slot: Mutex::new(Slot {
                pending: None,
                closed: false,
                last_used: Instant::now(),
            }),
        }
    }

    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take the in-flight slot. `None` if the connection has already been closed.
    pub(crate) fn claim(&self) -> Result<Option<ReplyReceiver>> {
        let mut slot = self.slot();
        if slot.closed {
            return Ok(None);
        }
        if slot.pending.is_some() {
            return Err(TunnelError::ConcurrencyViolation {
                connection: self.id.to_string(),
            });
        }
        let (tx, rx) = oneshot::channel();
        slot.pending = Some(tx);
        slot.last_used = Instant::now();
        Ok(Some(rx))
    }

    /// Hand the next inbound frame to the waiting request. False if none is waiting.
    pub(crate) fn complete(&self, frame: Bytes) -> bool {
        let pending = {
            let mut slot = self.slot();
            slot.last_used = Instant::now();
            slot.pending.take()
        };
        match pending {
            Some(tx) => {
                let _ = tx.send(Ok(frame));
                true
            }
            None => false,
        }
    }

    pub fn in_flight(&self) -> bool {
        self.slot().pending.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.slot().closed
    }

    /// Time since the last request or reply.
    pub fn idle_for(&self) -> Duration {
        self.slot().last_used.elapsed()
    }

    /// Dial on first use; later callers get the same link.
    pub(crate) async fn link_or_dial<F, Fut>(&self, dial: F) -> Result<&Link>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Link>>,
    {
        self.link.get_or_try_init(dial).await
    }

    /// Write request bytes verbatim.
    pub(crate) async fn write(&self, link: &Link, bytes: &[u8]) -> Result<()> {
        let mut writer = link.writer.lock().await;
        writer.write_all(bytes).await.map_err(|e| {
            TunnelError::ConnectionFailure(format!("write to {}: {e}", self.id.destination))
        })
    }

    /// Stop the reader and refuse further claims. Any waiting request is failed.
    pub(crate) fn close(&self, reason: &str) {
        let pending = {
            let mut slot = self.slot();
            slot.closed = true;
            slot.pending.take()
        };
        if let Some(tx) = pending {
            let _ = tx.send(Err(TunnelError::ConnectionFailure(format!(
                "connection {} closed: {reason}",
                self.id
            ))));
        }
        if let Some(link) = self.link.get() {
            link.reader.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection() -> PooledConnection {
        PooledConnection::new(ConnectionId::new(
            "10.0.0.1:5000".parse().unwrap(),
            "broker:9092".parse().unwrap(),
        ))
    }

    #[test]
    fn second_claim_is_a_concurrency_violation() {
        let conn = connection();
        let _first = conn.claim().unwrap().unwrap();
        assert!(conn.in_flight());
        assert!(matches!(
            conn.claim(),
            Err(TunnelError::ConcurrencyViolation { .. })
        ));
    }

    #[tokio::test]
    async fn complete_clears_the_slot() {
        let conn = connection();
        let reply = conn.claim().unwrap().unwrap();
        assert!(conn.complete(Bytes::from_static(b"\x00\x00\x00\x00")));
        assert!(!conn.in_flight());
        assert_eq!(reply.await.unwrap().unwrap(), Bytes::from_static(b"\x00\x00\x00\x00"));
        assert!(conn.claim().unwrap().is_some());
    }

    #[test]
    fn frame_without_request_is_unsolicited() {
        let conn = connection();
        assert!(!conn.complete(Bytes::new()));
    }

    #[tokio::test]
    async fn close_fails_waiter_and_refuses_claims() {
        let conn = connection();
        let reply = conn.claim().unwrap().unwrap();
        conn.close("test");
        assert!(matches!(
            reply.await.unwrap(),
            Err(TunnelError::ConnectionFailure(_))
        ));
        assert!(conn.is_closed());
        assert!(conn.claim().unwrap().is_none());
    }

    #[test]
    fn id_display() {
        assert_eq!(connection().id().to_string(), "10.0.0.1:5000->broker:9092");
    }
}
