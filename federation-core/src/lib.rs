//! Shared types for the master/worker federation protocol.
//!
//! This crate has no network code of its own: it defines the identifiers,
//! configuration shapes, task payloads, and the wire message tagged union
//! that `federation-net`, `federation-master`, and `federation-worker` all
//! build on.

pub mod address;
pub mod config;
pub mod error;
pub mod ids;
pub mod message;
pub mod task;

pub use address::{Address, PeerDescriptor};
pub use error::FederationError;
pub use ids::{ServerId, WorkerId};
pub use message::{FirstMessage, PeerReply, PeerRequest, WorkerReply, WorkerRequest};
pub use task::{Outcome, Task};
