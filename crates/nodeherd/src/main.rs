//! nodeherd daemon
//!
//! Discovers unconfigured nodes on the messaging fabric, provisions them
//! through the orchestrator core and exposes the monitoring/backplane
//! HTTP surface.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use kameo::prelude::*;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use nodeherd_api::events::{LifecycleEvent, PROVISIONER_COMPONENT};
use nodeherd_core::config::{Config, DenyList};
use nodeherd_core::discover::Discovery;
use nodeherd_core::events::EventSource;
use nodeherd_core::helper::HelperInvoker;
use nodeherd_core::metrics::Metrics;
use nodeherd_core::orchestrator::{Orchestrator, OrchestratorArgs};
use nodeherd_core::pause::PauseGate;
use nodeherd_core::rpc::RpcClient;
use nodeherd_core::shutdown::shutdown_pair;
use nodeherd_core::worker::{WorkerContext, spawn_workers};
use nodeherd_fabric::nats::NatsConnector;
use nodeherd_fabric::subject;
use nodeherd_fabric::traits::Connector;

mod api;
mod config;
mod router;
mod state;

use crate::config::FabricConfig;
use crate::state::AppState;

#[derive(Parser)]
#[command(name = "nodeherd")]
#[command(about = "Automated on-boarding for unconfigured compute nodes", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the provisioning orchestrator
    Run {
        /// Provisioner configuration file (YAML or JSON)
        #[arg(long)]
        config: PathBuf,
        /// Fabric client configuration file
        #[arg(long = "choria-config")]
        choria_config: Option<PathBuf>,
        /// Write the daemon pid to this file
        #[arg(long)]
        pid: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            choria_config,
            pid,
        } => run(&config, choria_config.as_deref(), pid.as_deref()).await,
    }
}

async fn run(
    config_path: &Path,
    choria_config: Option<&Path>,
    pid_path: Option<&Path>,
) -> Result<()> {
    let config = Arc::new(Config::load(config_path)?);
    let fabric_config = FabricConfig::load(choria_config)?;

    let _pid_file = pid_path.map(PidFile::create).transpose()?;

    info!(
        workers = config.workers,
        interval = ?config.interval,
        site = %config.site,
        pki = config.features.pki,
        "nodeherd starting"
    );

    let connector: Arc<dyn Connector> = Arc::new(
        NatsConnector::connect(&fabric_config.connect_options(&config)).await?,
    );

    let metrics = Metrics::new(&config.site);
    let gate = PauseGate::new();
    let (shutdown_handle, shutdown) = shutdown_pair();

    let (queue_tx, queue_rx) = mpsc::channel(config.queue_capacity());
    let orchestrator = Orchestrator::spawn(OrchestratorArgs { queue: queue_tx });

    let rpc = Arc::new(RpcClient::new(
        connector.clone(),
        gate.clone(),
        metrics.clone(),
        shutdown.clone(),
    ));
    let helper = Arc::new(HelperInvoker::new(
        config.helper.clone(),
        gate.clone(),
        metrics.clone(),
    ));
    let deny = Arc::new(DenyList::new(&config.cert_deny_list)?);

    let workers = spawn_workers(
        WorkerContext {
            config: config.clone(),
            rpc: rpc.clone(),
            helper,
            deny,
            metrics: metrics.clone(),
            gate: gate.clone(),
            shutdown: shutdown.clone(),
            orchestrator: orchestrator.clone(),
        },
        queue_rx,
    );

    let discovery = Discovery {
        rpc,
        orchestrator: orchestrator.clone(),
        gate: gate.clone(),
        shutdown: shutdown.clone(),
        metrics: metrics.clone(),
        interval: config.interval,
    }
    .spawn();

    let events = EventSource {
        connector: connector.clone(),
        orchestrator: orchestrator.clone(),
        gate: gate.clone(),
        shutdown: shutdown.clone(),
        metrics: metrics.clone(),
        component: config.lifecycle_component.clone(),
    }
    .spawn();

    let monitor = if config.monitor_port > 0 {
        let app_state = Arc::new(AppState::new(
            metrics.clone(),
            gate.clone(),
            orchestrator.clone(),
        ));
        let router = router::create_router(app_state);
        let addr = format!("0.0.0.0:{}", config.monitor_port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        info!(addr = %addr, "monitoring listener started");

        let shutdown = shutdown.clone();
        Some(tokio::spawn(async move {
            let serve = axum::serve(listener, router)
                .with_graceful_shutdown(async move { shutdown.cancelled().await });
            if let Err(err) = serve.await {
                error!(error = %err, "monitoring listener failed");
            }
        }))
    } else {
        None
    };

    publish_event(
        connector.as_ref(),
        &LifecycleEvent::Startup {
            identity: own_identity(),
            component: PROVISIONER_COMPONENT.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        },
    )
    .await;

    wait_for_signal().await?;
    info!("shutting down");

    publish_event(
        connector.as_ref(),
        &LifecycleEvent::Shutdown {
            identity: own_identity(),
            component: PROVISIONER_COMPONENT.to_string(),
        },
    )
    .await;

    shutdown_handle.trigger();

    for worker in workers {
        if tokio::time::timeout(Duration::from_secs(10), worker)
            .await
            .is_err()
        {
            warn!("worker did not drain in time");
        }
    }

    discovery.await.ok();
    events.await.ok();
    if let Some(monitor) = monitor {
        monitor.await.ok();
    }

    orchestrator.stop_gracefully().await.ok();

    info!("shutdown complete");

    Ok(())
}

async fn wait_for_signal() -> Result<()> {
    let mut sigterm = signal(SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("interrupt received"),
        _ = sigterm.recv() => info!("terminate received"),
    }

    Ok(())
}

async fn publish_event(connector: &dyn Connector, event: &LifecycleEvent) {
    let topic = subject::lifecycle_event_subject(event.kind(), event.component());

    let payload = match serde_json::to_vec(event) {
        Ok(payload) => payload,
        Err(err) => {
            error!(error = %err, "could not encode lifecycle event");
            return;
        }
    };

    if let Err(err) = connector.publish(&topic, payload.into()).await {
        warn!(error = %err, topic = %topic, "could not publish lifecycle event");
    }
}

fn own_identity() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "nodeherd".to_string())
}

/// Pid file removed again on clean shutdown
struct PidFile {
    path: PathBuf,
}

impl PidFile {
    fn create(path: &Path) -> Result<Self> {
        std::fs::write(path, format!("{}\n", std::process::id()))?;

        Ok(Self {
            path: path.to_path_buf(),
        })
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %err, "could not remove pid file");
        }
    }
}
