//! Destination connection pool.
//!
//! # Data Flow
//! ```text
//! POST /proxy (origin, Host = destination, frame)
//!     → multiplexer.rs (look up or dial the session's connection)
//!     → connection.rs (claim the in-flight slot, write the frame)
//!     → reader task (decode the next reply frame, complete the slot)
//!     → reply bytes back to the HTTP handler
//! ```

pub mod connection;
pub mod multiplexer;

pub use connection::{ConnectionId, PooledConnection};
pub use multiplexer::{frame_codec, ConnectionMultiplexer, PoolSettings};
