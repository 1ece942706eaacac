//! Shutdown signalling shared by the listener and webhook tasks.
//!
//! A [`ShutdownSignal`] is triggered once by `stop`; every
//! [`ShutdownListener`] observes it, including listeners created after
//! the trigger.

use std::sync::Arc;

use tokio::sync::watch;

/// Broadcasts a one-shot shutdown request.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    sender: Arc<watch::Sender<bool>>,
}

impl ShutdownSignal {
    /// Create an untriggered signal.
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Trigger shutdown. Idempotent.
    pub fn trigger(&self) {
        self.sender.send_replace(true);
    }

    /// Whether shutdown has been triggered.
    pub fn is_shutdown(&self) -> bool {
        *self.sender.borrow()
    }

    /// Create a listener for this signal.
    pub fn listener(&self) -> ShutdownListener {
        ShutdownListener {
            receiver: self.sender.subscribe(),
        }
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Waits for a [`ShutdownSignal`].
#[derive(Debug, Clone)]
pub struct ShutdownListener {
    receiver: watch::Receiver<bool>,
}

impl ShutdownListener {
    /// Resolve once shutdown is triggered, or immediately if it already was.
    pub async fn wait(&mut self) {
        // A closed channel means the signal is gone; treat it as shutdown.
        let _ = self.receiver.wait_for(|stopped| *stopped).await;
    }
}
