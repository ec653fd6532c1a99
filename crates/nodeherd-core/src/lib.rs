//! nodeherd-core: Provisioning orchestrator
//!
//! Combines broadcast discovery and lifecycle events into a bounded work
//! queue drained by a fixed worker pool. Each worker drives one node
//! through the provisioning state machine against the fabric, invoking
//! the external helper for its configuration.

pub mod config;
pub mod discover;
pub mod error;
pub mod events;
pub mod helper;
pub mod host;
pub mod message;
pub mod metrics;
pub mod orchestrator;
pub mod pause;
pub mod record;
pub mod rpc;
pub mod shutdown;
pub mod state;
pub mod worker;

pub use config::{Config, DenyList, Features, DEFAULT_CERT_DENY_LIST};
pub use discover::Discovery;
pub use error::ProvisionError;
pub use events::EventSource;
pub use helper::{HelperInvoker, HELPER_TIMEOUT};
pub use host::{Host, Outcome};
pub use message::{Announce, AnnounceSource, AttemptFinished, GetStatus, OrchestratorStatus};
pub use metrics::Metrics;
pub use orchestrator::{Orchestrator, OrchestratorArgs};
pub use pause::PauseGate;
pub use record::NodeRecord;
pub use rpc::{RpcClient, DEFAULT_RPC_TIMEOUT};
pub use shutdown::{shutdown_pair, Shutdown, ShutdownHandle};
pub use state::ProvisionState;
pub use worker::{spawn_workers, WorkerContext};
