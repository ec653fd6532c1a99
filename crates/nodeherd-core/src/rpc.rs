//! Fabric client adapter
//!
//! Wraps the transport connector with the call semantics every step relies
//! on: the pause gate is consulted first, latency lands in `rpc_time`,
//! exactly one reply from the addressed node is accepted, and a non-OK
//! status code is a failure. Replies from any other sender are ignored.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, error};

use nodeherd_api::envelope::{RpcReply, RpcRequest};
use nodeherd_fabric::subject;
use nodeherd_fabric::traits::Connector;

use crate::error::ProvisionError;
use crate::metrics::Metrics;
use crate::pause::PauseGate;
use crate::shutdown::Shutdown;

/// Per-call deadline, matching the node agent's metadata timeout.
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(20);

/// Window a broadcast discovery collects responders in.
const DISCOVERY_WINDOW: Duration = Duration::from_secs(2);

/// Stateless adapter; the underlying connector is reused across calls.
pub struct RpcClient {
    connector: Arc<dyn Connector>,
    gate: PauseGate,
    metrics: Arc<Metrics>,
    shutdown: Shutdown,
    collective: String,
    timeout: Duration,
}

impl RpcClient {
    pub fn new(
        connector: Arc<dyn Connector>,
        gate: PauseGate,
        metrics: Arc<Metrics>,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            connector,
            gate,
            metrics,
            shutdown,
            collective: subject::PROVISIONING_COLLECTIVE.to_string(),
            timeout: DEFAULT_RPC_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// One unicast action against one node.
    pub async fn call(
        &self,
        identity: &str,
        agent: &str,
        action: &str,
        data: serde_json::Value,
    ) -> Result<RpcReply, ProvisionError> {
        let target = format!("{agent}#{action}");

        if self.gate.is_paused() {
            return Err(ProvisionError::Paused(target));
        }

        let start = Instant::now();
        let result = self.call_inner(identity, agent, action, data, &target).await;
        self.metrics.rpc_time.observe(&target, start.elapsed());

        if let Err(err) = &result {
            if err.is_counted() {
                self.metrics.rpc_errors.inc(&target);
                error!(identity = identity, target = %target, error = %err, "rpc failed");
            }
        }

        result
    }

    async fn call_inner(
        &self,
        identity: &str,
        agent: &str,
        action: &str,
        data: serde_json::Value,
        target: &str,
    ) -> Result<RpcReply, ProvisionError> {
        let request = RpcRequest::new(agent, action, data);
        let payload = encode(&request)?;
        let node_subject = subject::node_subject(&self.collective, identity);

        let replies = tokio::select! {
            () = self.shutdown.cancelled() => return Err(ProvisionError::Cancelled),
            replies = self
                .connector
                .request_window(&node_subject, payload, 1, self.timeout) =>
            {
                replies.map_err(|e| ProvisionError::Rpc {
                    target: target.to_string(),
                    reason: e.to_string(),
                })?
            }
        };

        let mut matched: Vec<RpcReply> = replies
            .iter()
            .filter_map(|msg| RpcReply::decode(&msg.payload).ok())
            .filter(|reply| reply.sender == identity)
            .collect();

        if matched.len() != 1 {
            return Err(ProvisionError::Rpc {
                target: target.to_string(),
                reason: format!(
                    "received {} responses while expecting a response from {identity}",
                    matched.len()
                ),
            });
        }

        let reply = matched.remove(0);

        if !reply.is_ok() {
            return Err(ProvisionError::Rpc {
                target: target.to_string(),
                reason: format!("failed reply from {}: {}", reply.sender, reply.statusmsg),
            });
        }

        debug!(identity = identity, target = target, "rpc succeeded");

        Ok(reply)
    }

    /// Broadcast discovery: every responder in the provisioning
    /// subcollective within the window.
    pub async fn discover(&self) -> Result<Vec<String>, ProvisionError> {
        if self.gate.is_paused() {
            return Err(ProvisionError::Paused("discovery".to_string()));
        }

        let request = RpcRequest::new("discovery", "ping", serde_json::Value::Null);
        let payload = encode(&request)?;
        let discovery_subject = subject::discovery_subject(&self.collective);

        let replies = tokio::select! {
            () = self.shutdown.cancelled() => return Err(ProvisionError::Cancelled),
            replies = self
                .connector
                .request_window(&discovery_subject, payload, 0, DISCOVERY_WINDOW) =>
            {
                replies.map_err(|e| ProvisionError::Rpc {
                    target: "discovery".to_string(),
                    reason: e.to_string(),
                })?
            }
        };

        let mut seen = std::collections::HashSet::new();
        let identities = replies
            .iter()
            .filter_map(|msg| RpcReply::decode(&msg.payload).ok())
            .map(|reply| reply.sender)
            .filter(|sender| !sender.is_empty() && seen.insert(sender.clone()))
            .collect();

        Ok(identities)
    }
}

fn encode(request: &RpcRequest) -> Result<Bytes, ProvisionError> {
    serde_json::to_vec(request)
        .map(Bytes::from)
        .map_err(|e| ProvisionError::Protocol(format!("could not encode request: {e}")))
}
