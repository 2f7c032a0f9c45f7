//! TCP Transport implementation
//!
//! Carries serial links over TCP so two hosts without a radio can talk.
//! Peer addresses are mapped to socket addresses through a directory.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};
use tracing::debug;

use crate::common::{IntoStream, PeerAddress, RendezvousId, Result, SecurityMode, Stream};
use crate::error::Error;

use super::{Endpoint, Listener, Transport};

/// TCP transport - raw TCP connections
#[derive(Clone, Default)]
pub struct TcpTransport {
    listen: Option<SocketAddr>,
    directory: Arc<HashMap<PeerAddress, SocketAddr>>,
}

impl TcpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Address to bind when accepting
    pub fn with_listen(mut self, addr: SocketAddr) -> Self {
        self.listen = Some(addr);
        self
    }

    /// Register where a peer can be reached
    pub fn with_peer(mut self, peer: PeerAddress, addr: SocketAddr) -> Self {
        Arc::make_mut(&mut self.directory).insert(peer, addr);
        self
    }

    pub fn with_directory(mut self, directory: HashMap<PeerAddress, SocketAddr>) -> Self {
        self.directory = Arc::new(directory);
        self
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn resolve(
        &self,
        peer: &PeerAddress,
        service: &RendezvousId,
        mode: SecurityMode,
    ) -> Result<Box<dyn Endpoint>> {
        let addr = self
            .directory
            .get(peer)
            .copied()
            .ok_or_else(|| Error::EndpointNotFound(peer.to_string()))?;

        debug!("TCP: {} resolved to {} for {} ({})", peer, addr, service, mode);
        Ok(Box::new(TcpEndpoint { peer: *peer, addr }))
    }

    async fn listen(
        &self,
        service: &RendezvousId,
        mode: SecurityMode,
    ) -> Result<Box<dyn Listener>> {
        let addr = self
            .listen
            .ok_or_else(|| Error::Config("TCP transport has no listen address".into()))?;

        let listener = TcpListener::bind(addr).await?;
        debug!(
            "TCP: listening on {} for {} ({})",
            listener.local_addr()?,
            service,
            mode
        );
        Ok(Box::new(TcpListenerWrapper {
            listener,
            directory: Arc::clone(&self.directory),
        }))
    }
}

struct TcpEndpoint {
    peer: PeerAddress,
    addr: SocketAddr,
}

#[async_trait]
impl Endpoint for TcpEndpoint {
    fn peer(&self) -> PeerAddress {
        self.peer
    }

    async fn connect(&mut self) -> Result<Stream> {
        let stream = TcpStream::connect(self.addr).await?;

        // Disable Nagle's algorithm, serial traffic is small and interactive
        stream.set_nodelay(true)?;

        Ok(stream.into_stream())
    }

    async fn close(&mut self) -> Result<()> {
        // Nothing is held until connect succeeds
        Ok(())
    }
}

/// Wrapper for TcpListener to implement Listener trait
struct TcpListenerWrapper {
    listener: TcpListener,
    directory: Arc<HashMap<PeerAddress, SocketAddr>>,
}

impl TcpListenerWrapper {
    fn identify(&self, addr: &SocketAddr) -> PeerAddress {
        let mut known = self
            .directory
            .iter()
            .filter(|(_, a)| a.ip() == addr.ip());

        match (known.next(), known.next()) {
            (Some((peer, _)), None) => *peer,
            _ => synthesize_address(addr),
        }
    }
}

#[async_trait]
impl Listener for TcpListenerWrapper {
    async fn accept(&self) -> Result<(Stream, PeerAddress)> {
        let (stream, addr) = self.listener.accept().await?;
        stream.set_nodelay(true)?;
        Ok((stream.into_stream(), self.identify(&addr)))
    }

    async fn close(&self) -> Result<()> {
        // TcpListener doesn't have explicit close, it closes on drop
        Ok(())
    }
}

/// Derive a stable peer address from a socket address: four IP bytes, two port bytes.
fn synthesize_address(addr: &SocketAddr) -> PeerAddress {
    let ip = match addr.ip() {
        IpAddr::V4(v4) => v4.octets(),
        IpAddr::V6(v6) => {
            let o = v6.octets();
            [o[12], o[13], o[14], o[15]]
        }
    };
    let port = addr.port().to_be_bytes();
    PeerAddress::from_bytes([ip[0], ip[1], ip[2], ip[3], port[0], port[1]])
}
