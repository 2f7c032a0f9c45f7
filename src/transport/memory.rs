//! In-memory transport
//!
//! A simulated radio medium for tests and local demos. Devices attach to a
//! shared [`MemoryRadio`]; each attached device gets a [`MemoryTransport`].
//! Links are `tokio::io::duplex` pairs.

use std::collections::{HashMap, HashSet};
use std::io::{self, ErrorKind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::common::{IntoStream, PeerAddress, RendezvousId, Result, SecurityMode, Stream};
use crate::error::Error;

use super::{Endpoint, Listener, Transport};

/// Default in-flight buffer of a simulated link (bytes per direction)
const DEFAULT_LINK_BUFFER: usize = 64 * 1024;

type ServiceKey = (PeerAddress, RendezvousId);

/// A connection waiting to be accepted
struct Incoming {
    stream: Stream,
    from: PeerAddress,
}

struct Binding {
    id: u64,
    tx: mpsc::Sender<Incoming>,
}

struct Medium {
    devices: Mutex<HashSet<PeerAddress>>,
    services: Mutex<HashMap<ServiceKey, Binding>>,
    next_binding: AtomicU64,
    link_buffer: usize,
}

impl Medium {
    fn unbind(&self, key: &ServiceKey, id: u64) {
        let mut services = self.services.lock();
        if services.get(key).map(|b| b.id) == Some(id) {
            services.remove(key);
            debug!("Memory: unbound {} on {}", key.1, key.0);
        }
    }
}

/// Shared simulated radio medium
#[derive(Clone)]
pub struct MemoryRadio {
    medium: Arc<Medium>,
}

impl MemoryRadio {
    pub fn new() -> Self {
        Self::with_link_buffer(DEFAULT_LINK_BUFFER)
    }

    pub fn with_link_buffer(link_buffer: usize) -> Self {
        Self {
            medium: Arc::new(Medium {
                devices: Mutex::new(HashSet::new()),
                services: Mutex::new(HashMap::new()),
                next_binding: AtomicU64::new(1),
                link_buffer,
            }),
        }
    }

    /// Attach a device and get its transport
    pub fn attach(&self, address: PeerAddress) -> MemoryTransport {
        self.medium.devices.lock().insert(address);
        debug!("Memory: attached {}", address);
        MemoryTransport {
            local: address,
            medium: Arc::clone(&self.medium),
        }
    }

    /// Detach a device. Its bound services disappear with it.
    pub fn detach(&self, address: &PeerAddress) {
        self.medium.devices.lock().remove(address);
        self.medium
            .services
            .lock()
            .retain(|(device, _), _| device != address);
        debug!("Memory: detached {}", address);
    }

    pub fn is_bound(&self, address: &PeerAddress, service: &RendezvousId) -> bool {
        self.medium.services.lock().contains_key(&(*address, *service))
    }
}

impl Default for MemoryRadio {
    fn default() -> Self {
        Self::new()
    }
}

/// Transport of one device attached to a [`MemoryRadio`]
#[derive(Clone)]
pub struct MemoryTransport {
    local: PeerAddress,
    medium: Arc<Medium>,
}

impl MemoryTransport {
    pub fn local_address(&self) -> PeerAddress {
        self.local
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn resolve(
        &self,
        peer: &PeerAddress,
        service: &RendezvousId,
        mode: SecurityMode,
    ) -> Result<Box<dyn Endpoint>> {
        if !self.medium.devices.lock().contains(peer) {
            return Err(Error::EndpointNotFound(peer.to_string()));
        }

        trace!("Memory: resolved {} for {} ({})", peer, service, mode);
        Ok(Box::new(MemoryEndpoint {
            local: self.local,
            peer: *peer,
            service: *service,
            medium: Arc::clone(&self.medium),
            closed: false,
        }))
    }

    async fn listen(
        &self,
        service: &RendezvousId,
        mode: SecurityMode,
    ) -> Result<Box<dyn Listener>> {
        let key = (self.local, *service);
        let (tx, rx) = mpsc::channel(1);
        let id = self.medium.next_binding.fetch_add(1, Ordering::Relaxed);

        {
            let mut services = self.medium.services.lock();
            if services.contains_key(&key) {
                return Err(Error::Transport(format!(
                    "service {} already bound on {}",
                    service, self.local
                )));
            }
            services.insert(key, Binding { id, tx });
        }

        debug!("Memory: {} listening for {} ({})", self.local, service, mode);
        Ok(Box::new(MemoryListener {
            key,
            id,
            rx: tokio::sync::Mutex::new(rx),
            medium: Arc::clone(&self.medium),
        }))
    }
}

struct MemoryEndpoint {
    local: PeerAddress,
    peer: PeerAddress,
    service: RendezvousId,
    medium: Arc<Medium>,
    closed: bool,
}

#[async_trait]
impl Endpoint for MemoryEndpoint {
    fn peer(&self) -> PeerAddress {
        self.peer
    }

    async fn connect(&mut self) -> Result<Stream> {
        if self.closed {
            return Err(Error::ConnectionClosed);
        }

        let tx = self
            .medium
            .services
            .lock()
            .get(&(self.peer, self.service))
            .map(|b| b.tx.clone())
            .ok_or_else(|| refused("no listener for service"))?;

        let (near, far) = tokio::io::duplex(self.medium.link_buffer);
        tx.send(Incoming {
            stream: far.into_stream(),
            from: self.local,
        })
        .await
        .map_err(|_| refused("listener closed"))?;

        Ok(near.into_stream())
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}

struct MemoryListener {
    key: ServiceKey,
    id: u64,
    rx: tokio::sync::Mutex<mpsc::Receiver<Incoming>>,
    medium: Arc<Medium>,
}

#[async_trait]
impl Listener for MemoryListener {
    async fn accept(&self) -> Result<(Stream, PeerAddress)> {
        let mut rx = self.rx.lock().await;
        match rx.recv().await {
            Some(incoming) => Ok((incoming.stream, incoming.from)),
            None => Err(Error::ConnectionClosed),
        }
    }

    async fn close(&self) -> Result<()> {
        self.medium.unbind(&self.key, self.id);
        Ok(())
    }
}

impl Drop for MemoryListener {
    fn drop(&mut self) {
        self.medium.unbind(&self.key, self.id);
    }
}

fn refused(reason: &str) -> Error {
    Error::Io(io::Error::new(ErrorKind::ConnectionRefused, reason.to_string()))
}
