//! Pause gate driven by the management backplane
//!
//! Read locklessly before every outbound RPC, helper call and discovery
//! cycle; workers additionally block on it before draining the queue.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::watch;

#[derive(Debug)]
struct Inner {
    paused: AtomicBool,
    tx: watch::Sender<bool>,
}

/// Shared pause flag
#[derive(Debug, Clone)]
pub struct PauseGate {
    inner: Arc<Inner>,
    rx: watch::Receiver<bool>,
}

impl PauseGate {
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);

        Self {
            inner: Arc::new(Inner {
                paused: AtomicBool::new(false),
                tx,
            }),
            rx,
        }
    }

    /// Lockless read of the gate
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::Relaxed)
    }

    /// Flip the gate; wakes every blocked waiter
    pub fn set(&self, paused: bool) {
        self.inner.paused.store(paused, Ordering::SeqCst);
        self.inner.tx.send_replace(paused);
    }

    /// Wait until the gate is open. Returns immediately when not paused.
    pub async fn wait_unpaused(&self) {
        let mut rx = self.rx.clone();
        // an error means the gate itself is gone; treat as open
        rx.wait_for(|paused| !paused).await.ok();
    }
}

impl Default for PauseGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_gate_starts_open() {
        let gate = PauseGate::new();
        assert!(!gate.is_paused());
        gate.wait_unpaused().await;
    }

    #[tokio::test]
    async fn test_waiter_blocks_until_resume() {
        let gate = PauseGate::new();
        gate.set(true);
        assert!(gate.is_paused());

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.wait_unpaused().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        gate.set(false);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
