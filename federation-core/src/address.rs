//! Dialable addresses and peer descriptors.
//!
//! `Address` is used only for dialling; identity is always carried
//! separately as a [`crate::ServerId`] or [`crate::WorkerId`].

use serde::{Deserialize, Serialize};

use crate::ids::ServerId;

/// A bare `{ip, port}` pair, as sent in `REQUESTOR_INFO`, `SERVER_REDIRECT`,
/// and `SERVER_RETURN`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Address {
    pub ip: std::net::IpAddr,
    pub port: u16,
}

impl Address {
    pub fn new(ip: std::net::IpAddr, port: u16) -> Self {
        Address { ip, port }
    }

    pub fn to_socket_addr(self) -> std::net::SocketAddr {
        std::net::SocketAddr::new(self.ip, self.port)
    }
}

impl From<std::net::SocketAddr> for Address {
    fn from(addr: std::net::SocketAddr) -> Self {
        Address {
            ip: addr.ip(),
            port: addr.port(),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

use std::fmt;

/// A peer master's configured identity plus its dialable address.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct PeerDescriptor {
    pub id: ServerId,
    pub ip: std::net::IpAddr,
    pub port: u16,
}

impl PeerDescriptor {
    pub fn address(&self) -> Address {
        Address::new(self.ip, self.port)
    }
}
