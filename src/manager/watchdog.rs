//! Connect timeout watchdog
//!
//! A one-shot timer task armed when a connect call begins. The connect task
//! races the call against [`expired`]; dropping the watchdog disarms it, so a
//! late firing can never close a link that already completed.

use std::future;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;

/// One-shot timer task. Disarmed on drop.
pub struct Watchdog {
    fired: oneshot::Receiver<()>,
    timer: JoinHandle<()>,
    timeout: Duration,
}

impl Watchdog {
    /// Start the timer. Must be called from within a tokio runtime.
    pub fn arm(timeout: Duration) -> Self {
        let (tx, rx) = oneshot::channel();
        let sleep = tokio::time::sleep(timeout);

        let timer = tokio::spawn(async move {
            sleep.await;
            debug!("Connect watchdog fired after {:?}", timeout);
            let _ = tx.send(());
        });

        Self {
            fired: rx,
            timer,
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Completes when the timer fires. Await at most once.
    pub async fn fired(&mut self) {
        if (&mut self.fired).await.is_err() {
            // Timer task went away without firing
            future::pending::<()>().await;
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.timer.abort();
    }
}

/// Completes when `watchdog` fires; never completes without one.
pub async fn expired(watchdog: Option<&mut Watchdog>) {
    match watchdog {
        Some(watchdog) => watchdog.fired().await,
        None => future::pending::<()>().await,
    }
}
