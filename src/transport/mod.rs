//! Transport Layer
//!
//! Responsibilities:
//! - Resolve a peer address into a connectable endpoint
//! - Bind a listening endpoint for a rendezvous identifier
//! - NO framing, NO session bookkeeping, NO callbacks
//!
//! This layer ONLY deals with establishing raw byte streams.

mod memory;
mod null;
mod tcp;

pub use memory::{MemoryRadio, MemoryTransport};
pub use null::{RejectTransport, StallTransport};
pub use tcp::TcpTransport;

use async_trait::async_trait;

use crate::common::{PeerAddress, RendezvousId, Result, SecurityMode, Stream};

/// Transport trait for resolving endpoints
///
/// Implementations should ONLY handle endpoint resolution and connection
/// establishment, not session state.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Resolve a connectable endpoint for `service` on `peer`
    async fn resolve(
        &self,
        peer: &PeerAddress,
        service: &RendezvousId,
        mode: SecurityMode,
    ) -> Result<Box<dyn Endpoint>>;

    /// Bind a listening endpoint for `service`
    async fn listen(&self, service: &RendezvousId, mode: SecurityMode)
        -> Result<Box<dyn Listener>>;
}

/// A resolved, not yet connected, outbound endpoint
#[async_trait]
pub trait Endpoint: Send {
    /// Peer this endpoint dials
    fn peer(&self) -> PeerAddress;

    /// Establish the link. Completes on success, error, or never.
    async fn connect(&mut self) -> Result<Stream>;

    /// Release any resources held by an unconnected endpoint
    async fn close(&mut self) -> Result<()>;
}

/// Listener trait for accepting incoming connections
#[async_trait]
pub trait Listener: Send + Sync {
    /// Accept a new connection
    async fn accept(&self) -> Result<(Stream, PeerAddress)>;

    /// Close the listener
    async fn close(&self) -> Result<()>;
}
