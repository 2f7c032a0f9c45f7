//! Callback executor
//!
//! All listener callbacks are marshaled onto one designated execution
//! context. The default [`SerialExecutor`] is a single tokio task draining a
//! queue, so callbacks never overlap and run in submission order.

use tokio::sync::mpsc;
use tracing::{debug, trace};

/// A unit of callback work
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Execution context that runs listener callbacks
pub trait CallbackExecutor: Send + Sync {
    /// Queue a job. Jobs submitted from one thread run in submission order.
    fn execute(&self, job: Job);
}

/// Runs callbacks one at a time on a dedicated tokio task
#[derive(Clone)]
pub struct SerialExecutor {
    tx: mpsc::UnboundedSender<Job>,
}

impl SerialExecutor {
    /// Spawn the executor task on the current tokio runtime.
    ///
    /// The task exits once every handle has been dropped.
    pub fn spawn() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();

        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                job();
            }
            debug!("Callback executor stopped");
        });

        Self { tx }
    }
}

impl CallbackExecutor for SerialExecutor {
    fn execute(&self, job: Job) {
        if self.tx.send(job).is_err() {
            trace!("Callback executor gone, dropping job");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use parking_lot::Mutex;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_jobs_run_in_order() {
        let executor = SerialExecutor::spawn();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..16 {
            let seen = seen.clone();
            executor.execute(Box::new(move || seen.lock().push(i)));
        }

        let (done_tx, done_rx) = oneshot::channel();
        executor.execute(Box::new(move || {
            let _ = done_tx.send(());
        }));
        done_rx.await.unwrap();

        assert_eq!(*seen.lock(), (0..16).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_jobs_run_after_submitter_yields() {
        let executor = SerialExecutor::spawn();
        let ran = Arc::new(Mutex::new(false));

        let flag = ran.clone();
        let (done_tx, done_rx) = oneshot::channel();
        executor.execute(Box::new(move || {
            *flag.lock() = true;
            let _ = done_tx.send(());
        }));

        assert!(!*ran.lock());
        done_rx.await.unwrap();
        assert!(*ran.lock());
    }
}
