//! Cooperative shutdown for background tasks.
//!
//! Tasks receive a [`ShutdownSignal`] and check it between units of work, so
//! an in-flight unit finishes before the task exits. [`Shutdown::shutdown`]
//! flips the signal and waits for every registered task, bounded by a grace
//! period.

use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShutdownError {
    #[error("tasks still running after {grace:?}: {pending:?}")]
    Timeout {
        grace: Duration,
        pending: Vec<String>,
    },

    #[error("tasks panicked: {0:?}")]
    Panicked(Vec<String>),
}

/// Receiving side of the shutdown flag.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    receiver: watch::Receiver<bool>,
}

impl ShutdownSignal {
    pub fn is_shutdown(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves once shutdown is triggered (or the coordinator is gone).
    pub async fn wait(&mut self) {
        let _ = self.receiver.wait_for(|stop| *stop).await;
    }
}

#[derive(Debug)]
pub struct Shutdown {
    sender: watch::Sender<bool>,
    tasks: Mutex<Vec<(String, JoinHandle<()>)>>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender,
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            receiver: self.sender.subscribe(),
        }
    }

    /// Spawn `task` on the runtime and wait for it on shutdown.
    pub fn spawn<F>(&self, name: impl Into<String>, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        info!(task = %name, "background task started");
        let handle = tokio::spawn(task);
        self.register(name, handle);
    }

    /// Track an already spawned task.
    pub fn register(&self, name: impl Into<String>, handle: JoinHandle<()>) {
        self.tasks().push((name.into(), handle));
    }

    pub fn trigger(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.sender.borrow()
    }

    /// Trigger shutdown and wait up to `grace` for every task to finish.
    pub async fn shutdown(&self, grace: Duration) -> Result<(), ShutdownError> {
        self.trigger();

        let tasks = std::mem::take(&mut *self.tasks());
        let names: Vec<String> = tasks.iter().map(|(name, _)| name.clone()).collect();
        info!(tasks = names.len(), grace_ms = grace.as_millis() as u64, "shutting down");

        let mut finished = 0usize;
        let mut panicked = Vec::new();
        let waited = tokio::time::timeout(grace, async {
            for (name, handle) in tasks {
                if let Err(err) = handle.await {
                    error!(task = %name, error = %err, "background task failed");
                    panicked.push(name);
                }
                finished += 1;
            }
        })
        .await;

        if waited.is_err() {
            let pending = names[finished..].to_vec();
            warn!(?pending, "shutdown grace period elapsed");
            return Err(ShutdownError::Timeout { grace, pending });
        }
        if !panicked.is_empty() {
            return Err(ShutdownError::Panicked(panicked));
        }

        info!("all background tasks stopped");
        Ok(())
    }

    fn tasks(&self) -> MutexGuard<'_, Vec<(String, JoinHandle<()>)>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
