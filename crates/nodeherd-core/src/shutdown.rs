//! Root cancellation handle
//!
//! One handle cancels every loop, in-flight RPC wait and helper run.
//! Attempts observe the same signal between retries, so cancellation
//! surfaces promptly as `ProvisionError::Cancelled`.

use tokio::sync::watch;

/// Triggering side, held by the daemon
#[derive(Debug)]
pub struct ShutdownHandle {
    tx: watch::Sender<bool>,
}

impl ShutdownHandle {
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }
}

/// Observing side, cloned into every task
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        // a dropped handle counts as cancellation
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }

    /// Resolve once cancellation fires
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        rx.wait_for(|cancelled| *cancelled).await.ok();
    }
}

/// Create a connected handle/observer pair.
#[must_use]
pub fn shutdown_pair() -> (ShutdownHandle, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownHandle { tx }, Shutdown { rx })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_trigger_wakes_observers() {
        let (handle, shutdown) = shutdown_pair();
        assert!(!shutdown.is_cancelled());

        let observer = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { shutdown.cancelled().await })
        };

        handle.trigger();

        tokio::time::timeout(Duration::from_secs(1), observer)
            .await
            .unwrap()
            .unwrap();
        assert!(shutdown.is_cancelled());
    }

    #[tokio::test]
    async fn test_dropped_handle_counts_as_cancelled() {
        let (handle, shutdown) = shutdown_pair();
        drop(handle);

        assert!(shutdown.is_cancelled());
        shutdown.cancelled().await;
    }
}
