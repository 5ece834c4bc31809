//! Client side of the tunnel.
//!
//! # Data Flow
//! ```text
//! application message
//!     → codec.rs (wrap in POST /proxy envelope)
//!     → transport.rs / secure.rs (plain or TLS byte stream)
//!     → network
//!     → parser.rs (strip response envelope)
//!     → application reply
//! ```
//!
//! # Design Decisions
//! - Nothing here blocks; an external readiness loop drives every call
//! - Cleartext and TLS share one `Transport` trait, chosen once per connection
//! - One codec per outbound message and one parser per inbound response

pub mod buffer;
pub mod channel;
pub mod codec;
pub mod engine;
pub mod parser;
pub mod secure;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use channel::TunnelChannel;
pub use codec::FrameCodec;
pub use engine::RustlsEngine;
pub use parser::ResponseParser;
pub use secure::{SecureEngine, SecureTransport, SessionState};
pub use transport::{PlainTransport, Socket, Transport};
