//! Opaque identifiers carried in wire messages.
//!
//! Both ids are plain strings on the wire (`SERVER_UUID`, `WORKER_UUID`); we
//! wrap them so the type system keeps a master's id and a worker's id from
//! being swapped by accident.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A master's `server_uuid`, e.g. `"SERVER_1"`.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerId(pub String);

impl ServerId {
    pub fn new(id: impl Into<String>) -> Self {
        ServerId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ServerId {
    fn from(s: String) -> Self {
        ServerId(s)
    }
}

/// A worker's `worker_uuid`, assigned once at worker startup.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(pub String);

impl WorkerId {
    pub fn new(id: impl Into<String>) -> Self {
        WorkerId(id.into())
    }

    /// Generates a fresh worker id, the same shape the original assigns at
    /// startup (a UUID-derived opaque string).
    pub fn generate() -> Self {
        WorkerId(format!("W_{}", uuid_v4_like()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for WorkerId {
    fn from(s: String) -> Self {
        WorkerId(s)
    }
}

/// A small non-cryptographic UUID-v4-shaped generator, avoiding a dependency
/// on the `uuid` crate for a single call site.
fn uuid_v4_like() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let bytes: [u8; 16] = rng.gen();
    format!(
        "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
        bytes[0], bytes[1], bytes[2], bytes[3],
        bytes[4], bytes[5],
        bytes[6], bytes[7],
        bytes[8], bytes[9],
        bytes[10], bytes[11], bytes[12], bytes[13], bytes[14], bytes[15],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_id_generate_is_unique_enough() {
        let a = WorkerId::generate();
        let b = WorkerId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn server_id_roundtrips_through_json() {
        let id = ServerId::new("SERVER_1");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"SERVER_1\"");
        let back: ServerId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
