//! Link options - the knobs a connection manager is built with

use std::time::Duration;

use crate::channel::DEFAULT_READ_BUFFER_SIZE;
use crate::common::RendezvousId;

/// Default connect timeout (35 seconds)
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(35);

/// Connect timeout: a duration plus an enabled flag.
///
/// Only consulted while connecting; it has no effect on an established link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectTimeout {
    pub duration: Duration,
    pub enabled: bool,
}

impl ConnectTimeout {
    pub fn enabled(duration: Duration) -> Self {
        Self {
            duration,
            enabled: true,
        }
    }

    pub fn disabled() -> Self {
        Self::default()
    }
}

impl Default for ConnectTimeout {
    fn default() -> Self {
        Self {
            duration: DEFAULT_CONNECT_TIMEOUT,
            enabled: false,
        }
    }
}

/// Options for building a [`ConnectionManager`](super::ConnectionManager)
#[derive(Debug, Clone)]
pub struct LinkOptions {
    /// Service both sides rendezvous on
    pub rendezvous_id: RendezvousId,
    /// Connect timeout watchdog settings
    pub connect_timeout: ConnectTimeout,
    /// Read loop buffer size; one receive callback per read
    pub read_buffer_size: usize,
}

impl Default for LinkOptions {
    fn default() -> Self {
        Self {
            rendezvous_id: RendezvousId::default(),
            connect_timeout: ConnectTimeout::default(),
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }
}

impl LinkOptions {
    pub fn with_rendezvous_id(mut self, id: RendezvousId) -> Self {
        self.rendezvous_id = id;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: ConnectTimeout) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }
}
