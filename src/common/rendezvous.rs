//! Rendezvous identifier - the service UUID both peers agree on

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Serial port profile UUID, the service most serial-style peers expose.
pub const SERIAL_PORT_PROFILE: Uuid = Uuid::from_u128(0x00001101_0000_1000_8000_00805F9B34FB);

/// 128-bit service identifier used to rendezvous with a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RendezvousId(Uuid);

impl RendezvousId {
    pub const fn new(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// The well-known serial port profile identifier
    pub const fn serial_port() -> Self {
        Self(SERIAL_PORT_PROFILE)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Parse the hyphenated form. Anything other than five hyphen-separated
    /// groups is rejected before the uuid parser sees it.
    pub fn parse(s: &str) -> Result<Self> {
        let components = s.split('-').count();
        if components != 5 {
            return Err(Error::InvalidRendezvousId(format!(
                "{} ({} components, expected 5)",
                s, components
            )));
        }

        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| Error::InvalidRendezvousId(format!("{}: {}", s, e)))
    }
}

impl Default for RendezvousId {
    fn default() -> Self {
        Self::serial_port()
    }
}

impl fmt::Display for RendezvousId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for RendezvousId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for RendezvousId {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<RendezvousId> for String {
    fn from(id: RendezvousId) -> Self {
        id.to_string()
    }
}

impl From<Uuid> for RendezvousId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}
