//! Common types and abstractions
//!
//! This module defines the core types used throughout the crate:
//! - Stream: unified async I/O abstraction for an established link
//! - PeerAddress: 48-bit radio address of a remote device
//! - RendezvousId: service identifier both sides agree on
//! - LinkInfo: description of an established link, handed to listeners

mod address;
mod link;
mod rendezvous;
mod stream;

pub use address::PeerAddress;
pub use link::{LinkInfo, Role, SecurityMode};
pub use rendezvous::RendezvousId;
pub use stream::{AsyncReadWrite, IntoStream, Stream};

// Re-export error types from crate root
pub use crate::error::{Error, Result};
