//! Console - line-oriented bridge between a terminal and one link
//!
//! Used by the command line tool:
//! - waits for the link to come up (or fail)
//! - sends every input line as text
//! - prints state changes and received text
//! - disconnects on end of input, shutdown signal or peer disconnect

use std::future::Future;
use std::io::Write;
use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::common::{LinkInfo, SecurityMode};
use crate::listener::{ConnectionListener, ConnectionState, FailureCode, ReceiveListener};
use crate::manager::ConnectionManager;

/// What the console should do with the link
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Connect to the peer at this address
    Connect(String),
    /// Wait for a peer to connect
    Accept,
}

/// Why a console run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Another session was already active
    Refused,
    /// The link never came up
    Failed(FailureCode),
    /// Input reached end of file
    InputClosed,
    PeerDisconnected,
    /// The shutdown signal fired
    Interrupted,
}

enum Signal {
    Connected,
    Disconnected,
    Failed(FailureCode),
}

/// Prints state changes and forwards the interesting ones to the run loop
struct ConsoleListener {
    tx: mpsc::UnboundedSender<Signal>,
}

impl ConnectionListener for ConsoleListener {
    fn on_state_changed(&self, link: Option<&LinkInfo>, state: ConnectionState) {
        match link {
            Some(link) => println!("* {} ({} {}, {})", state, link.role, link.peer, link.mode),
            None => println!("* {}", state),
        }

        let signal = match state {
            ConnectionState::Connected => Signal::Connected,
            ConnectionState::Disconnected => Signal::Disconnected,
            ConnectionState::Connecting | ConnectionState::Listening => return,
        };
        let _ = self.tx.send(signal);
    }

    fn on_failed(&self, code: FailureCode) {
        eprintln!("* failed: {} ({})", code, code.code());
        let _ = self.tx.send(Signal::Failed(code));
    }
}

fn print_received(text: &str, _raw: &[u8]) {
    let mut stdout = std::io::stdout();
    let _ = stdout.write_all(text.as_bytes());
    let _ = stdout.flush();
}

pub struct Console {
    manager: Arc<ConnectionManager>,
    mode: SecurityMode,
}

impl Console {
    pub fn new(manager: Arc<ConnectionManager>, mode: SecurityMode) -> Self {
        Self { manager, mode }
    }

    /// Run `command` until the link ends. The link is always disconnected
    /// on return.
    pub async fn run<R, S>(&self, command: Command, input: R, shutdown: S) -> Outcome
    where
        R: AsyncBufRead + Unpin,
        S: Future<Output = ()>,
    {
        let (tx, mut signals) = mpsc::unbounded_channel();
        let listener: Arc<dyn ConnectionListener> = Arc::new(ConsoleListener { tx });
        let receiver: Arc<dyn ReceiveListener> = Arc::new(print_received);

        let started = match &command {
            Command::Connect(address) => {
                self.manager
                    .connect(address, self.mode, listener, Some(receiver))
            }
            Command::Accept => self.manager.accept(self.mode, listener, Some(receiver)),
        };
        if !started {
            warn!("Console: {:?} refused, a session is already active", command);
            return Outcome::Refused;
        }

        tokio::pin!(shutdown);
        let outcome = self.pump(&mut signals, input, shutdown).await;

        self.manager.disconnect();
        info!("Console finished: {:?}", outcome);
        outcome
    }

    async fn pump<R, S>(
        &self,
        signals: &mut mpsc::UnboundedReceiver<Signal>,
        input: R,
        mut shutdown: std::pin::Pin<&mut S>,
    ) -> Outcome
    where
        R: AsyncBufRead + Unpin,
        S: Future<Output = ()>,
    {
        // Wait for the link before reading any input
        loop {
            tokio::select! {
                _ = shutdown.as_mut() => return Outcome::Interrupted,
                signal = signals.recv() => match signal {
                    Some(Signal::Connected) => break,
                    Some(Signal::Failed(code)) => return Outcome::Failed(code),
                    Some(Signal::Disconnected) | None => return Outcome::PeerDisconnected,
                },
            }
        }

        let mut lines = input.lines();
        let mut sent: u64 = 0;

        loop {
            tokio::select! {
                _ = shutdown.as_mut() => return Outcome::Interrupted,
                signal = signals.recv() => match signal {
                    Some(Signal::Disconnected) | None => {
                        debug!("Console: peer left after {} lines", sent);
                        return Outcome::PeerDisconnected;
                    }
                    Some(_) => continue,
                },
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        if self.manager.send_text(&format!("{}\n", line)).await {
                            sent += 1;
                        } else {
                            warn!("Console: failed to send line");
                        }
                    }
                    Ok(None) => return Outcome::InputClosed,
                    Err(e) => {
                        warn!("Console: input error: {}", e);
                        return Outcome::InputClosed;
                    }
                },
            }
        }
    }
}
