//! Line-delimited JSON transport for the federation protocol.
//!
//! Wraps a [`tokio::net::TcpStream`] in a [`tokio_util::codec::Framed`] over
//! [`tokio_util::codec::LinesCodec`], the way `zebra-network`'s peer
//! connections frame their binary messages — except our wire shape is text,
//! so the codec boundary is a newline rather than a length prefix.

pub mod backoff;
pub mod codec;
pub mod dial;

pub use codec::{MessageStream, ReadOutcome};
pub use dial::{DialError, PeerClient};
