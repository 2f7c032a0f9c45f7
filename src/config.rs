//! Configuration module for Bluelink
//!
//! JSON configuration for the link settings and the TCP-backed transport
//! used by the command line tool.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::common::{PeerAddress, RendezvousId, SecurityMode};
use crate::error::{Error, Result};
use crate::manager::{ConnectTimeout, LinkOptions, DEFAULT_CONNECT_TIMEOUT};
use crate::channel::DEFAULT_READ_BUFFER_SIZE;
use crate::transport::TcpTransport;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Log configuration
    #[serde(default)]
    pub log: LogConfig,

    /// Link settings
    #[serde(default)]
    pub link: LinkConfig,

    /// TCP transport settings
    #[serde(default)]
    pub tcp: TcpConfig,
}

impl Config {
    /// Load configuration from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;
        Self::from_json(&content)
    }

    /// Parse configuration from JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Example configuration: one local device on 127.0.0.1:7000 that knows
    /// one peer on 127.0.0.1:7001
    pub fn default_config() -> Self {
        let mut peers = HashMap::new();
        peers.insert(
            PeerAddress::from_bytes([0x02, 0, 0, 0, 0, 0x02]),
            SocketAddr::from(([127, 0, 0, 1], 7001)),
        );

        Config {
            log: LogConfig::default(),
            link: LinkConfig::default(),
            tcp: TcpConfig {
                local_address: Some(PeerAddress::from_bytes([0x02, 0, 0, 0, 0, 0x01])),
                listen: Some(SocketAddr::from(([127, 0, 0, 1], 7000))),
                peers,
            },
        }
    }
}

/// Log configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Link configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Service rendezvous id, UUID text
    #[serde(default = "default_rendezvous_id")]
    pub rendezvous_id: String,

    /// Request a secure (authenticated, encrypted) link
    #[serde(default = "default_secure")]
    pub secure: bool,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default)]
    pub connect_timeout_enabled: bool,

    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,
}

fn default_rendezvous_id() -> String {
    RendezvousId::default().to_string().to_uppercase()
}

fn default_secure() -> bool {
    true
}

fn default_connect_timeout_ms() -> u64 {
    DEFAULT_CONNECT_TIMEOUT.as_millis() as u64
}

fn default_read_buffer_size() -> usize {
    DEFAULT_READ_BUFFER_SIZE
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            rendezvous_id: default_rendezvous_id(),
            secure: default_secure(),
            connect_timeout_ms: default_connect_timeout_ms(),
            connect_timeout_enabled: false,
            read_buffer_size: default_read_buffer_size(),
        }
    }
}

impl LinkConfig {
    pub fn security_mode(&self) -> SecurityMode {
        SecurityMode::from(self.secure)
    }

    /// Validate and convert into manager options
    pub fn to_options(&self) -> Result<LinkOptions> {
        let rendezvous_id = RendezvousId::parse(&self.rendezvous_id)?;

        if self.read_buffer_size == 0 {
            return Err(Error::Config("read_buffer_size must be positive".to_string()));
        }

        Ok(LinkOptions::default()
            .with_rendezvous_id(rendezvous_id)
            .with_connect_timeout(ConnectTimeout {
                duration: Duration::from_millis(self.connect_timeout_ms),
                enabled: self.connect_timeout_enabled,
            })
            .with_read_buffer_size(self.read_buffer_size))
    }
}

/// TCP transport configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TcpConfig {
    /// Address this device reports as its own
    #[serde(default)]
    pub local_address: Option<PeerAddress>,

    /// Listen address used by `accept`
    #[serde(default)]
    pub listen: Option<SocketAddr>,

    /// Peer directory: radio address → socket address
    #[serde(default)]
    pub peers: HashMap<PeerAddress, SocketAddr>,
}

impl TcpConfig {
    pub fn build_transport(&self) -> TcpTransport {
        let transport = TcpTransport::new().with_directory(self.peers.clone());
        match self.listen {
            Some(listen) => transport.with_listen(listen),
            None => transport,
        }
    }
}
