//! Periodic broadcast discovery
//!
//! Every interval, asks the provisioning subcollective who is out there
//! and announces each responder to the orchestrator. Errors are counted
//! and the cycle skipped; the next tick retries. The first cycle runs
//! immediately at startup.

use std::sync::Arc;
use std::time::Duration;

use kameo::actor::ActorRef;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::message::{Announce, AnnounceSource};
use crate::metrics::Metrics;
use crate::orchestrator::Orchestrator;
use crate::pause::PauseGate;
use crate::rpc::RpcClient;
use crate::shutdown::Shutdown;

/// Discovery loop handle
pub struct Discovery {
    pub rpc: Arc<RpcClient>,
    pub orchestrator: ActorRef<Orchestrator>,
    pub gate: PauseGate,
    pub shutdown: Shutdown,
    pub metrics: Arc<Metrics>,
    pub interval: Duration,
}

impl Discovery {
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        info!(interval = ?self.interval, "discovery loop started");

        let mut ticker = tokio::time::interval(self.interval);
        // paused or slow cycles must not burst afterwards
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if self.gate.is_paused() {
                debug!("provisioning is paused, skipping discovery cycle");
                continue;
            }

            self.cycle().await;
        }

        info!("discovery loop stopped");
    }

    async fn cycle(&self) {
        self.metrics.discover_cycles.inc();

        let identities = match self.rpc.discover().await {
            Ok(identities) => identities,
            Err(err) if !err.is_counted() => {
                debug!(error = %err, "discovery cycle aborted");
                return;
            }
            Err(err) => {
                self.metrics.discovery_errors.inc();
                warn!(error = %err, "discovery cycle failed");
                return;
            }
        };

        if !identities.is_empty() {
            debug!(count = identities.len(), "discovered nodes");
        }
        self.metrics.discovered.add(identities.len() as u64);

        for identity in identities {
            self.orchestrator
                .tell(Announce {
                    identity,
                    source: AnnounceSource::Discovery,
                })
                .await
                .ok();
        }
    }
}
