//! Connection Manager
//!
//! Orchestrates the connect and accept roles of a single-session link:
//!
//! ```text
//! connect()/accept() → reserve role slot → emit Connecting/Listening
//!                          ↓ (background task)
//!            Transport.resolve()+connect() / Transport.listen()+accept()
//!                          ↓
//!            DuplexChannel.start() → monitor (link lost | stream closed)
//!                          ↓
//!            disconnect() / failure / peer close → slot back to idle
//! ```

mod connection;
mod options;
mod watchdog;

pub use connection::{ConnectionManager, ConnectionManagerBuilder, ConnectionRole};
pub use options::{ConnectTimeout, LinkOptions, DEFAULT_CONNECT_TIMEOUT};
pub use watchdog::Watchdog;
