//! LinkInfo - description of an established link
//!
//! This is what connection listeners receive alongside state changes.
//! It carries no I/O; reading and writing go through the duplex channel.

use std::time::Instant;

use super::{PeerAddress, RendezvousId};

/// Confidentiality/authentication mode requested for a link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SecurityMode {
    #[default]
    Secure,
    Insecure,
}

impl SecurityMode {
    pub fn is_secure(&self) -> bool {
        matches!(self, SecurityMode::Secure)
    }
}

impl From<bool> for SecurityMode {
    fn from(secure: bool) -> Self {
        if secure {
            SecurityMode::Secure
        } else {
            SecurityMode::Insecure
        }
    }
}

impl std::fmt::Display for SecurityMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SecurityMode::Secure => write!(f, "secure"),
            SecurityMode::Insecure => write!(f, "insecure"),
        }
    }
}

/// Which side of the link this process played
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Actively dialed the peer
    Connector,
    /// Accepted the peer's inbound connection
    Acceptor,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Connector => "connect",
            Role::Acceptor => "accept",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An established link, as reported to listeners
#[derive(Debug, Clone)]
pub struct LinkInfo {
    /// Remote device address
    pub peer: PeerAddress,
    /// Side this process played
    pub role: Role,
    /// Security mode the link was opened with
    pub mode: SecurityMode,
    /// Service the link was opened for
    pub service: RendezvousId,
    /// When the link was established
    pub established_at: Instant,
}

impl LinkInfo {
    pub fn new(peer: PeerAddress, role: Role, mode: SecurityMode, service: RendezvousId) -> Self {
        Self {
            peer,
            role,
            mode,
            service,
            established_at: Instant::now(),
        }
    }
}
