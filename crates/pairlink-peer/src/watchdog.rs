//! Handshake watchdog
//!
//! A cancellable one-shot timer. Every call to [`Watchdog::arm`] replaces
//! the previous timer; [`Watchdog::cancel`] disarms it. Each arming takes a
//! new generation number and a timer only fires if it can claim the current
//! generation, so a timer that loses a race with `arm`/`cancel` never runs
//! its callback.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

pub struct Watchdog {
    timeout: Duration,
    generation: Arc<AtomicU64>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl Watchdog {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            generation: Arc::new(AtomicU64::new(0)),
            timer: Mutex::new(None),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Arm the timer, cancelling any earlier arming
    ///
    /// Must be called from within a Tokio runtime.
    pub fn arm<F>(&self, on_fire: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let armed = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let generation = self.generation.clone();
        let timeout = self.timeout;

        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            // Claim this arming; fails if re-armed or cancelled meanwhile
            if generation
                .compare_exchange(armed, armed + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                on_fire();
            }
        });

        if let Some(previous) = self.timer.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Disarm the timer. Harmless when nothing is armed.
    pub fn cancel(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        if let Some(timer) = self.timer.lock().take() {
            timer.abort();
        }
    }

    /// Whether a timer is pending
    pub fn is_armed(&self) -> bool {
        self.timer
            .lock()
            .as_ref()
            .map_or(false, |timer| !timer.is_finished())
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.get_mut().take() {
            timer.abort();
        }
    }
}

impl std::fmt::Debug for Watchdog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watchdog")
            .field("timeout", &self.timeout)
            .field("generation", &self.generation.load(Ordering::Relaxed))
            .finish()
    }
}
