//! Listener Contracts
//!
//! Callback surfaces through which the connection manager and the duplex
//! channel report back to the caller:
//! - ConnectionListener: state changes and connection failures
//! - ReceiveListener: every chunk read from the link
//!
//! Each surface is held in a single [`ListenerSlot`]: registering a new
//! listener replaces the previous one. Callbacks are always invoked through
//! the injected [`CallbackExecutor`](crate::executor::CallbackExecutor),
//! never from an I/O task directly.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::common::LinkInfo;

/// Connection state reported to [`ConnectionListener::on_state_changed`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
    Listening,
}

impl ConnectionState {
    /// Numeric code, stable across releases
    pub fn code(&self) -> u16 {
        match self {
            ConnectionState::Connecting => 101,
            ConnectionState::Connected => 102,
            ConnectionState::Disconnected => 103,
            ConnectionState::Listening => 104,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Listening => write!(f, "listening"),
        }
    }
}

/// Failure reported to [`ConnectionListener::on_failed`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureCode {
    /// The connect call failed, including a close forced by the connect timeout
    ConnectFailed,
    /// No connectable endpoint could be resolved for the peer
    SocketNotFound,
    /// The listening endpoint failed while waiting for a peer
    AcceptFailed,
    /// The listening endpoint could not be bound
    ServerSocketNotFound,
}

impl FailureCode {
    /// Numeric code, stable across releases
    pub fn code(&self) -> u16 {
        match self {
            FailureCode::ConnectFailed => 201,
            FailureCode::SocketNotFound => 202,
            FailureCode::AcceptFailed => 301,
            FailureCode::ServerSocketNotFound => 302,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCode::ConnectFailed => "connect_failed",
            FailureCode::SocketNotFound => "socket_not_found",
            FailureCode::AcceptFailed => "accept_failed",
            FailureCode::ServerSocketNotFound => "server_socket_not_found",
        }
    }
}

impl fmt::Display for FailureCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receives connection state changes and failures
pub trait ConnectionListener: Send + Sync {
    /// `link` is present once the link is established
    fn on_state_changed(&self, link: Option<&LinkInfo>, state: ConnectionState);

    fn on_failed(&self, code: FailureCode);
}

/// Receives data read from the link.
///
/// `text` is a lossy UTF-8 decoding of `raw`; binary payloads must use `raw`.
pub trait ReceiveListener: Send + Sync {
    fn on_received(&self, text: &str, raw: &[u8]);
}

impl<F> ReceiveListener for F
where
    F: Fn(&str, &[u8]) + Send + Sync,
{
    fn on_received(&self, text: &str, raw: &[u8]) {
        self(text, raw)
    }
}

/// Closure-backed [`ConnectionListener`]
pub struct FnConnectionListener<S, E> {
    on_state: S,
    on_failed: E,
}

impl<S, E> FnConnectionListener<S, E>
where
    S: Fn(Option<&LinkInfo>, ConnectionState) + Send + Sync,
    E: Fn(FailureCode) + Send + Sync,
{
    pub fn new(on_state: S, on_failed: E) -> Self {
        Self { on_state, on_failed }
    }
}

impl<S, E> ConnectionListener for FnConnectionListener<S, E>
where
    S: Fn(Option<&LinkInfo>, ConnectionState) + Send + Sync,
    E: Fn(FailureCode) + Send + Sync,
{
    fn on_state_changed(&self, link: Option<&LinkInfo>, state: ConnectionState) {
        (self.on_state)(link, state)
    }

    fn on_failed(&self, code: FailureCode) {
        (self.on_failed)(code)
    }
}

/// Single-slot listener registration. Last writer wins.
pub struct ListenerSlot<T: ?Sized> {
    inner: RwLock<Option<Arc<T>>>,
}

impl<T: ?Sized> ListenerSlot<T> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(None),
        }
    }

    pub fn with(listener: Arc<T>) -> Self {
        Self {
            inner: RwLock::new(Some(listener)),
        }
    }

    /// Replace the registered listener, returning the previous one
    pub fn set(&self, listener: Arc<T>) -> Option<Arc<T>> {
        self.inner.write().replace(listener)
    }

    /// Remove the registered listener
    pub fn clear(&self) -> Option<Arc<T>> {
        self.inner.write().take()
    }

    /// Get a handle to the registered listener
    pub fn get(&self) -> Option<Arc<T>> {
        self.inner.read().clone()
    }

    pub fn is_set(&self) -> bool {
        self.inner.read().is_some()
    }
}

impl<T: ?Sized> Default for ListenerSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}
