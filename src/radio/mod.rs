//! Radio collaborator interfaces
//!
//! Responsibilities:
//! - Answer "is the radio there / on / discovering" for the connection manager
//! - Carry discrete radio events (discovery, pairing, link loss)
//!
//! Discovery and pairing workflows live outside this crate. The connection
//! manager only consumes the state queries and [`RadioEvent::LinkLost`].

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::broadcast;
use tracing::{debug, trace};

use crate::common::PeerAddress;

/// Capacity of the radio event bus
const EVENT_BUS_CAPACITY: usize = 64;

/// State queries against the local radio adapter
pub trait RadioState: Send + Sync {
    /// Whether the device has a radio at all
    fn is_supported(&self) -> bool;

    /// Whether the radio is switched on
    fn is_enabled(&self) -> bool;

    /// Whether a discovery scan is running
    fn is_discovering(&self) -> bool;

    /// Stop a running discovery scan. Discovery slows down connection setup.
    fn cancel_discovery(&self);
}

/// Discrete events emitted by the radio stack
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioEvent {
    DeviceFound(PeerAddress),
    DiscoveryStarted,
    DiscoveryFinished,
    DevicePaired(PeerAddress),
    PairingCancelled(PeerAddress),
    /// The low-level link to a peer went away
    LinkLost(PeerAddress),
}

/// Broadcast bus for [`RadioEvent`]s. Cheap to clone.
#[derive(Clone)]
pub struct RadioEvents {
    tx: broadcast::Sender<RadioEvent>,
}

impl RadioEvents {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        Self { tx }
    }

    /// Publish an event. Events with no subscribers are dropped.
    pub fn publish(&self, event: RadioEvent) {
        trace!("Radio event: {:?}", event);
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RadioEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for RadioEvents {
    fn default() -> Self {
        Self::new()
    }
}

/// Radio state held in atomics, for hosts that do not expose a real adapter
/// (TCP-backed links, tests).
pub struct StaticRadio {
    supported: AtomicBool,
    enabled: AtomicBool,
    discovering: AtomicBool,
}

impl StaticRadio {
    /// A supported, enabled, idle radio
    pub fn new() -> Self {
        Self {
            supported: AtomicBool::new(true),
            enabled: AtomicBool::new(true),
            discovering: AtomicBool::new(false),
        }
    }

    /// A device without any radio
    pub fn unsupported() -> Self {
        Self {
            supported: AtomicBool::new(false),
            enabled: AtomicBool::new(false),
            discovering: AtomicBool::new(false),
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn set_discovering(&self, discovering: bool) {
        self.discovering.store(discovering, Ordering::SeqCst);
    }
}

impl Default for StaticRadio {
    fn default() -> Self {
        Self::new()
    }
}

impl RadioState for StaticRadio {
    fn is_supported(&self) -> bool {
        self.supported.load(Ordering::SeqCst)
    }

    fn is_enabled(&self) -> bool {
        self.is_supported() && self.enabled.load(Ordering::SeqCst)
    }

    fn is_discovering(&self) -> bool {
        self.discovering.load(Ordering::SeqCst)
    }

    fn cancel_discovery(&self) {
        if self.discovering.swap(false, Ordering::SeqCst) {
            debug!("Discovery cancelled");
        }
    }
}
