//! Null Transports - Stall and Reject
//!
//! Special transports that don't establish real connections:
//! - **StallTransport**: endpoints resolve, but connecting never completes
//!   and listeners never see a peer
//! - **RejectTransport**: nothing resolves and nothing binds

use std::future;

use async_trait::async_trait;

use crate::common::{PeerAddress, RendezvousId, Result, SecurityMode, Stream};
use crate::error::Error;

use super::{Endpoint, Listener, Transport};

// ============================================================================
// StallTransport
// ============================================================================

/// Stall transport - connect and accept wait forever
pub struct StallTransport;

impl StallTransport {
    pub fn new() -> Self {
        Self
    }
}

impl Default for StallTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for StallTransport {
    async fn resolve(
        &self,
        peer: &PeerAddress,
        _service: &RendezvousId,
        _mode: SecurityMode,
    ) -> Result<Box<dyn Endpoint>> {
        Ok(Box::new(StallEndpoint { peer: *peer }))
    }

    async fn listen(
        &self,
        _service: &RendezvousId,
        _mode: SecurityMode,
    ) -> Result<Box<dyn Listener>> {
        Ok(Box::new(StallListener))
    }
}

struct StallEndpoint {
    peer: PeerAddress,
}

#[async_trait]
impl Endpoint for StallEndpoint {
    fn peer(&self) -> PeerAddress {
        self.peer
    }

    async fn connect(&mut self) -> Result<Stream> {
        future::pending().await
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

struct StallListener;

#[async_trait]
impl Listener for StallListener {
    async fn accept(&self) -> Result<(Stream, PeerAddress)> {
        future::pending().await
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

// ============================================================================
// RejectTransport
// ============================================================================

/// Reject transport - nothing resolves, nothing binds
pub struct RejectTransport;

impl RejectTransport {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RejectTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for RejectTransport {
    async fn resolve(
        &self,
        peer: &PeerAddress,
        _service: &RendezvousId,
        _mode: SecurityMode,
    ) -> Result<Box<dyn Endpoint>> {
        Err(Error::EndpointNotFound(peer.to_string()))
    }

    async fn listen(
        &self,
        service: &RendezvousId,
        _mode: SecurityMode,
    ) -> Result<Box<dyn Listener>> {
        Err(Error::Transport(format!("cannot bind {}", service)))
    }
}
