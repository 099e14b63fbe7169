//! One-shot shutdown signalling for background tasks

use tokio::sync::watch;

/// Sending half. Triggering is permanent; dropping it also releases waiters.
#[derive(Debug)]
pub struct ShutdownTrigger {
    sender: watch::Sender<bool>,
}

/// Shutdown signal listener
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    receiver: watch::Receiver<bool>,
}

impl ShutdownTrigger {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self { sender }
    }

    pub fn trigger(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.sender.borrow()
    }

    pub fn subscribe(&self) -> ShutdownSignal {
        ShutdownSignal {
            receiver: self.sender.subscribe(),
        }
    }
}

impl Default for ShutdownTrigger {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownSignal {
    /// Check if shutdown has been signaled
    pub fn is_shutdown(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Wait for shutdown signal
    pub async fn wait(&mut self) {
        if *self.receiver.borrow() {
            return;
        }
        // Err means the trigger is gone, which counts as shutdown
        let _ = self.receiver.changed().await;
    }
}
