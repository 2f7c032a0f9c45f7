//! Bluelink - connection lifecycle manager for RFCOMM-style serial links
//!
//! # Architecture (Layered)
//!
//! ```text
//! Caller
//! → ConnectionManager (connect / accept / disconnect, one session at a time)
//! → Transport (resolve + connect, or listen + accept)
//! → DuplexChannel (read loop + serialized writes)
//! → CallbackExecutor → ConnectionListener / ReceiveListener
//! ```
//!
//! ## Core Principles
//!
//! - Exactly one session per manager: connecting, listening or connected
//! - Transports only produce byte streams, they hold no session state
//! - Every callback runs on the injected executor, never on an I/O task
//! - No callback for a session starts after `disconnect()` returns; one
//!   already running on the executor may still finish
//!
//! ## Module Structure
//!
//! ```text
//! src/
//! ├── common/          # Core types: Stream, PeerAddress, RendezvousId, LinkInfo
//! ├── transport/       # Transport layer: memory, TCP, null
//! ├── radio/           # Radio state queries and radio event bus
//! ├── channel/         # Duplex channel: read loop, serialized writes
//! ├── manager/         # Connection manager, connect timeout watchdog
//! └── app/             # Application: console bridge for the CLI
//! ```

// Core types
pub mod common;
pub mod error;

// Layered architecture
pub mod transport;
pub mod radio;
pub mod channel;
pub mod manager;
pub mod app;

// Supporting modules
pub mod config;
pub mod executor;
pub mod listener;
pub mod metrics;

// Re-exports for convenience
pub use common::{LinkInfo, PeerAddress, RendezvousId, Role, SecurityMode, Stream};
pub use error::{Error, Result};
pub use config::Config;

// Architecture re-exports
pub use channel::DuplexChannel;
pub use executor::{CallbackExecutor, SerialExecutor};
pub use listener::{
    ConnectionListener, ConnectionState, FailureCode, FnConnectionListener, ReceiveListener,
};
pub use manager::{ConnectionManager, ConnectionRole, LinkOptions};
pub use radio::{RadioEvent, RadioEvents, RadioState, StaticRadio};
pub use transport::Transport;
