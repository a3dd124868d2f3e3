use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

/// One-shot readiness gate for a connection's broadcast path.
///
/// Created closed. The handler opens it right after queueing the
/// handshake reply, so nothing relayed by the broadcast engine can
/// overtake that reply. Opening is idempotent and never blocks.
#[derive(Debug, Default)]
pub struct ReadinessGate {
    open: AtomicBool,
    notify: Notify,
}

impl ReadinessGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Open the gate, releasing every current and future waiter.
    pub fn open(&self) {
        if !self.open.swap(true, Ordering::AcqRel) {
            self.notify.notify_waiters();
        }
    }

    /// Suspend until the gate is open. Returns immediately once it is.
    pub async fn wait(&self) {
        loop {
            // Register interest before checking the flag so an `open()`
            // landing in between still wakes us.
            let notified = self.notify.notified();
            if self.is_open() {
                return;
            }
            notified.await;
        }
    }
}
