//! Pool of destination connections keyed by tunnel session.
//!
//! # Responsibilities
//! - Map each (origin, destination) pair to one persistent TCP connection
//! - Dial lazily on the first request for a pair
//! - Allow one request in flight per connection
//! - Pair each reply frame with the request that is waiting for it
//! - Evict connections that fail, time out, or send frames nobody asked for
//!
//! # Design Decisions
//! - `DashMap` holds the pool; nothing global is locked on the request path
//! - Each connection owns a reader task that decodes length-prefixed frames
//! - A request dropped mid-flight evicts its connection, because the next
//!   inbound frame would otherwise be handed to the wrong caller

use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use futures_util::StreamExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, LengthDelimitedCodec};

use crate::config::PoolConfig;
use crate::error::{Result, TunnelError};
use crate::observability::metrics;
use crate::pool::connection::{ConnectionId, Link, PooledConnection, ReplyReceiver};
use crate::protocol::LENGTH_PREFIX_LEN;

/// Tunable limits for the pool.
#[derive(Debug, Clone, Copy)]
pub struct PoolSettings {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub max_connections: usize,
    pub max_frame_bytes: usize,
}

impl From<&PoolConfig> for PoolSettings {
    fn from(config: &PoolConfig) -> Self {
        Self {
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            max_connections: config.max_connections,
            max_frame_bytes: config.max_frame_bytes,
        }
    }
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self::from(&PoolConfig::default())
    }
}

/// Frame decoder for destination replies. The 4-byte header stays in the frame.
pub fn frame_codec(max_frame_bytes: usize) -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_offset(0)
        .length_field_length(LENGTH_PREFIX_LEN)
        .length_adjustment(LENGTH_PREFIX_LEN as isize)
        .num_skip(0)
        .max_frame_length(max_frame_bytes)
        .new_codec()
}

#[derive(Debug)]
struct PoolInner {
    connections: DashMap<ConnectionId, Arc<PooledConnection>>,
    settings: PoolSettings,
}

impl PoolInner {
    fn acquire(&self, id: &ConnectionId) -> Result<Arc<PooledConnection>> {
        if let Some(conn) = self.connections.get(id) {
            return Ok(Arc::clone(conn.value()));
        }
        if self.connections.len() >= self.settings.max_connections {
            return Err(TunnelError::PoolExhausted(self.settings.max_connections));
        }
        let conn = Arc::clone(
            self.connections
                .entry(id.clone())
                .or_insert_with(|| Arc::new(PooledConnection::new(id.clone())))
                .value(),
        );
        metrics::set_pooled_connections(self.connections.len());
        Ok(conn)
    }

    fn claim(&self, id: &ConnectionId) -> Result<(Arc<PooledConnection>, ReplyReceiver)> {
        loop {
            let conn = self.acquire(id)?;
            if let Some(reply) = conn.claim()? {
                return Ok((conn, reply));
            }
            // closed between lookup and claim; replace it
            self.connections
                .remove_if(id, |_, current| Arc::ptr_eq(current, &conn));
        }
    }

    fn evict(&self, conn: &Arc<PooledConnection>, reason: &'static str) {
        let removed = self
            .connections
            .remove_if(conn.id(), |_, current| Arc::ptr_eq(current, conn))
            .is_some();
        conn.close(reason);
        if removed {
            tracing::debug!(connection = %conn.id(), reason, "Evicted destination connection");
            metrics::record_eviction(reason);
            metrics::set_pooled_connections(self.connections.len());
        }
    }
}

/// Evicts the connection unless the request finishes cleanly.
struct InFlight<'a> {
    pool: &'a PoolInner,
    conn: &'a Arc<PooledConnection>,
    armed: bool,
}

impl<'a> InFlight<'a> {
    fn new(pool: &'a PoolInner, conn: &'a Arc<PooledConnection>) -> Self {
        Self { pool, conn, armed: true }
    }

    fn finish(mut self) {
        self.armed = false;
    }

    fn evict(mut self, reason: &'static str) {
        self.armed = false;
        self.pool.evict(self.conn, reason);
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.pool.evict(self.conn, "abandoned");
        }
    }
}

/// Connection multiplexer shared by all request handlers.
#[derive(Debug, Clone)]
pub struct ConnectionMultiplexer {
    inner: Arc<PoolInner>,
}

impl ConnectionMultiplexer {
    pub fn new(settings: PoolSettings) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                connections: DashMap::new(),
                settings,
            }),
        }
    }

    pub fn from_config(config: &PoolConfig) -> Self {
        Self::new(PoolSettings::from(config))
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.inner.settings
    }

    /// Number of pooled connections.
    pub fn len(&self) -> usize {
        self.inner.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.connections.is_empty()
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.inner.connections.contains_key(id)
    }

    /// Forward one request frame and wait for the destination's next frame.
    ///
    /// The request bytes are written verbatim. Fails with
    /// [`TunnelError::ConcurrencyViolation`] if this session already has a
    /// request in flight; the in-flight request is unaffected.
    pub async fn send(&self, id: ConnectionId, request: Bytes) -> Result<Bytes> {
        let (conn, reply) = self.inner.claim(&id)?;
        let guard = InFlight::new(&self.inner, &conn);

        if let Err(e) = self.write_request(&conn, &request).await {
            tracing::warn!(connection = %id, error = %e, "Failed to forward request");
            guard.evict("write_failed");
            return Err(e);
        }

        let timeout = self.inner.settings.request_timeout;
        match tokio::time::timeout(timeout, reply).await {
            Ok(Ok(Ok(frame))) => {
                guard.finish();
                tracing::trace!(connection = %id, bytes = frame.len(), "Reply received");
                Ok(frame)
            }
            // the reader or an eviction already dropped the connection
            Ok(Ok(Err(e))) => {
                guard.finish();
                Err(e)
            }
            Ok(Err(_)) => {
                guard.evict("reply_dropped");
                Err(TunnelError::ConnectionFailure(format!(
                    "connection {id} closed before reply"
                )))
            }
            Err(_) => {
                tracing::warn!(connection = %id, timeout = ?timeout, "Destination reply timed out");
                guard.evict("timeout");
                Err(TunnelError::Timeout(timeout))
            }
        }
    }

    async fn write_request(&self, conn: &Arc<PooledConnection>, request: &[u8]) -> Result<()> {
        let pool = Arc::downgrade(&self.inner);
        let settings = self.inner.settings;
        let link = conn
            .link_or_dial(|| open_link(Arc::clone(conn), pool, settings))
            .await?;
        conn.write(link, request).await
    }

    /// Close connections idle for at least `max_idle`. Returns how many were closed.
    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        let candidates: Vec<Arc<PooledConnection>> = self
            .inner
            .connections
            .iter()
            .filter(|entry| !entry.in_flight() && entry.idle_for() >= max_idle)
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let mut evicted = 0;
        for conn in candidates {
            let removed = self
                .inner
                .connections
                .remove_if(conn.id(), |_, current| {
                    Arc::ptr_eq(current, &conn) && !current.in_flight()
                })
                .is_some();
            if removed {
                conn.close("idle");
                metrics::record_eviction("idle");
                evicted += 1;
            }
        }
        if evicted > 0 {
            metrics::set_pooled_connections(self.len());
        }
        evicted
    }

    /// Periodically run [`evict_idle`](Self::evict_idle) until shutdown.
    pub fn spawn_idle_sweeper(
        &self,
        max_idle: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let pool = self.clone();
        let period = (max_idle / 2).max(Duration::from_millis(100));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let evicted = pool.evict_idle(max_idle);
                        if evicted > 0 {
                            tracing::debug!(evicted, remaining = pool.len(), "Idle sweep");
                        }
                    }
                    _ = shutdown.recv() => break,
                }
            }
        })
    }

    /// Close every pooled connection.
    pub fn close_all(&self) {
        let ids: Vec<ConnectionId> = self
            .inner
            .connections
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        for id in ids {
            if let Some((_, conn)) = self.inner.connections.remove(&id) {
                conn.close("shutdown");
            }
        }
        metrics::set_pooled_connections(0);
        tracing::info!("Destination connections closed");
    }
}

async fn open_link(
    conn: Arc<PooledConnection>,
    pool: Weak<PoolInner>,
    settings: PoolSettings,
) -> Result<Link> {
    let destination = conn.id().destination().clone();
    let stream = match tokio::time::timeout(
        settings.connect_timeout,
        TcpStream::connect((destination.host(), destination.port())),
    )
    .await
    {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            return Err(TunnelError::ConnectionFailure(format!(
                "connect to {destination}: {e}"
            )))
        }
        Err(_) => {
            return Err(TunnelError::ConnectionFailure(format!(
                "connect to {destination} timed out after {:?}",
                settings.connect_timeout
            )))
        }
    };
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!(destination = %destination, error = %e, "Failed to set TCP_NODELAY");
    }

    let (read_half, write_half) = stream.into_split();
    let frames = FramedRead::new(read_half, frame_codec(settings.max_frame_bytes));
    let reader = tokio::spawn(read_replies(Arc::clone(&conn), pool, frames));

    tracing::info!(connection = %conn.id(), "Destination connection established");
    Ok(Link::new(write_half, reader.abort_handle()))
}

async fn read_replies(
    conn: Arc<PooledConnection>,
    pool: Weak<PoolInner>,
    mut frames: FramedRead<OwnedReadHalf, LengthDelimitedCodec>,
) {
    let reason = loop {
        match frames.next().await {
            Some(Ok(frame)) => {
                if !conn.complete(frame.freeze()) {
                    tracing::warn!(connection = %conn.id(), "Unsolicited frame from destination");
                    break "unsolicited_frame";
                }
            }
            Some(Err(e)) => {
                tracing::warn!(connection = %conn.id(), error = %e, "Bad frame from destination");
                break "decode_error";
            }
            None => {
                tracing::debug!(connection = %conn.id(), "Destination closed connection");
                break "closed";
            }
        }
    };

    match pool.upgrade() {
        Some(pool) => pool.evict(&conn, reason),
        None => conn.close(reason),
    }
}
