//! Error types shared across the crate boundary, in the style
//! `zebra-network` uses for its own `Error` enum: one `thiserror` enum per
//! crate, `#[from]` for the obvious conversions, nothing opaque.
//!
//! This only covers config loading (§7 "Configuration" bucket) — wire
//! classification has its own [`crate::message::ClassifyError`], and
//! transport errors are `federation-net`'s `CodecError`/`DialError`; there is
//! no single error type shared across every crate boundary.

use thiserror::Error;

/// Errors from loading a [`crate::config::MasterConfig`] or
/// [`crate::config::WorkerConfig`] off disk.
#[derive(Debug, Error)]
pub enum FederationError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("invalid config: {0}")]
    Config(#[from] serde_json::Error),
}
