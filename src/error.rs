//! Error types for Bluelink

use thiserror::Error;

/// Main error type for Bluelink
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid rendezvous id: {0}")]
    InvalidRendezvousId(String),

    #[error("Invalid peer address: {0}")]
    InvalidAddress(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Endpoint not found: {0}")]
    EndpointNotFound(String),

    #[error("Radio unavailable")]
    RadioUnavailable,

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Not connected")]
    NotConnected,

    #[error("Timeout")]
    Timeout,
}

/// Result type alias for Bluelink
pub type Result<T> = std::result::Result<T, Error>;
