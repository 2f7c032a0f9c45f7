//! Duplex Channel
//!
//! Owns the byte streams of one established link, pumps inbound bytes to the
//! receive listener and serializes outbound writes.

mod duplex;

pub use duplex::{ChannelClosed, DuplexChannel, DEFAULT_READ_BUFFER_SIZE};
