//! Worker pool draining the provisioning queue
//!
//! A fixed number of workers share the receiving half of the bounded
//! queue. Each worker runs one attempt at a time, blocks while the pause
//! gate is closed and reports terminal states back to the orchestrator.

use std::sync::Arc;

use kameo::actor::ActorRef;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{Config, DenyList};
use crate::error::ProvisionError;
use crate::helper::HelperInvoker;
use crate::host::{Host, Outcome};
use crate::message::AttemptFinished;
use crate::metrics::Metrics;
use crate::orchestrator::Orchestrator;
use crate::pause::PauseGate;
use crate::rpc::RpcClient;
use crate::shutdown::Shutdown;

type SharedReceiver = Arc<Mutex<mpsc::Receiver<String>>>;

/// Everything a worker needs to run attempts
#[derive(Clone)]
pub struct WorkerContext {
    pub config: Arc<Config>,
    pub rpc: Arc<RpcClient>,
    pub helper: Arc<HelperInvoker>,
    pub deny: Arc<DenyList>,
    pub metrics: Arc<Metrics>,
    pub gate: PauseGate,
    pub shutdown: Shutdown,
    pub orchestrator: ActorRef<Orchestrator>,
}

/// Spawn the configured number of workers over one queue receiver.
pub fn spawn_workers(
    ctx: WorkerContext,
    receiver: mpsc::Receiver<String>,
) -> Vec<JoinHandle<()>> {
    let receiver: SharedReceiver = Arc::new(Mutex::new(receiver));

    (0..ctx.config.workers)
        .map(|id| {
            let ctx = ctx.clone();
            let receiver = receiver.clone();
            tokio::spawn(run_worker(id, ctx, receiver))
        })
        .collect()
}

async fn run_worker(id: usize, ctx: WorkerContext, receiver: SharedReceiver) {
    debug!(worker = id, "worker started");

    loop {
        // do not drain the queue while paused
        tokio::select! {
            () = ctx.shutdown.cancelled() => break,
            () = ctx.gate.wait_unpaused() => {}
        }

        let identity = tokio::select! {
            () = ctx.shutdown.cancelled() => break,
            next = async { receiver.lock().await.recv().await } => match next {
                Some(identity) => identity,
                None => break,
            },
        };

        process(&ctx, identity).await;
    }

    debug!(worker = id, "worker stopped");
}

/// Gauge guard so `busy_workers` tracks time inside the state machine
struct BusyGuard {
    metrics: Arc<Metrics>,
}

impl BusyGuard {
    fn new(metrics: Arc<Metrics>) -> Self {
        metrics.busy_workers.inc();
        Self { metrics }
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.metrics.busy_workers.dec();
    }
}

async fn process(ctx: &WorkerContext, identity: String) {
    let _busy = BusyGuard::new(ctx.metrics.clone());

    let mut host = Host::new(
        identity.clone(),
        ctx.rpc.clone(),
        ctx.helper.clone(),
        ctx.deny.clone(),
        ctx.config.clone(),
        ctx.shutdown.clone(),
    );

    let started = std::time::Instant::now();

    match host.provision().await {
        Ok(Outcome::Provisioned) => {
            ctx.metrics.provisioned.inc();
            info!(
                identity = %identity,
                elapsed = ?started.elapsed(),
                "node provisioned"
            );
        }
        Ok(Outcome::Deferred { reason }) => {
            ctx.metrics.deferred.inc();
            warn!(identity = %identity, reason = %reason, "provisioning deferred");
        }
        Err(ProvisionError::Cancelled) => {
            debug!(identity = %identity, "attempt cancelled");
        }
        Err(err) if err.is_paused() => {
            warn!(identity = %identity, error = %err, "attempt interrupted by pause");
        }
        Err(err) => {
            ctx.metrics.provision_errors.inc();
            error!(identity = %identity, error = %err, "provisioning failed");
        }
    }

    ctx.orchestrator
        .tell(AttemptFinished { identity })
        .await
        .ok();
}
