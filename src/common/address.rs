//! Peer address type for radio links

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// 48-bit address of a remote radio device (`AA:BB:CC:DD:EE:FF`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PeerAddress([u8; 6]);

impl PeerAddress {
    /// Create from raw address bytes (most significant byte first)
    pub const fn from_bytes(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    /// Get the raw address bytes
    pub const fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }

    /// Parse an address string, accepting `:` or `-` separators.
    pub fn parse(s: &str) -> Result<Self> {
        let mut bytes = [0u8; 6];
        let mut parts = s.split(|c| c == ':' || c == '-');

        for byte in bytes.iter_mut() {
            let part = parts
                .next()
                .ok_or_else(|| Error::InvalidAddress(s.to_string()))?;
            if part.len() != 2 {
                return Err(Error::InvalidAddress(s.to_string()));
            }
            *byte = u8::from_str_radix(part, 16)
                .map_err(|_| Error::InvalidAddress(s.to_string()))?;
        }

        if parts.next().is_some() {
            return Err(Error::InvalidAddress(s.to_string()));
        }

        Ok(Self(bytes))
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

impl FromStr for PeerAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for PeerAddress {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<PeerAddress> for String {
    fn from(addr: PeerAddress) -> Self {
        addr.to_string()
    }
}

impl From<[u8; 6]> for PeerAddress {
    fn from(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }
}
