//! Per-node provisioning state machine
//!
//! Drives one [`NodeRecord`] through the fixed sequence: inventory, an
//! optional JWT fetch, the deny-list check, an optional CSR, the helper,
//! then configure and restart. Every outbound action goes through the
//! fabric adapter, so pause and cancellation semantics apply uniformly.

use std::sync::Arc;

use serde_json::json;
use tracing::{debug, info, warn};

use nodeherd_api::requests::{ConfigureRequest, CsrRequest, JwtRequest, RestartRequest};
use nodeherd_api::responses::{ActionReply, CsrReply, JwtReply};

use crate::config::{Config, DenyList};
use crate::error::ProvisionError;
use crate::helper::HelperInvoker;
use crate::record::NodeRecord;
use crate::rpc::RpcClient;
use crate::shutdown::Shutdown;
use crate::state::ProvisionState;

/// Fixed retry budget for the inventory and JWT fetches.
const FETCH_TRIES: usize = 5;

/// How one attempt ended when it did not fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Provisioned,
    /// Helper asked to retry later; the identity becomes eligible again
    Deferred { reason: String },
}

/// One provisioning attempt against one node
pub struct Host {
    record: NodeRecord,
    state: ProvisionState,
    rpc: Arc<RpcClient>,
    helper: Arc<HelperInvoker>,
    deny: Arc<DenyList>,
    config: Arc<Config>,
    shutdown: Shutdown,
}

impl Host {
    pub fn new(
        identity: impl Into<String>,
        rpc: Arc<RpcClient>,
        helper: Arc<HelperInvoker>,
        deny: Arc<DenyList>,
        config: Arc<Config>,
        shutdown: Shutdown,
    ) -> Self {
        let record = NodeRecord::new(identity, config.token.clone());

        Self {
            record,
            state: ProvisionState::Start,
            rpc,
            helper,
            deny,
            config,
            shutdown,
        }
    }

    #[must_use]
    pub fn state(&self) -> ProvisionState {
        self.state
    }

    /// Run the attempt to a terminal state.
    pub async fn provision(&mut self) -> Result<Outcome, ProvisionError> {
        let result = self.run().await;

        if result.is_err() && self.state.can_transition_to(ProvisionState::Failed) {
            self.state = ProvisionState::Failed;
        }

        result
    }

    async fn run(&mut self) -> Result<Outcome, ProvisionError> {
        self.transition(ProvisionState::FetchInventory)?;
        self.fetch_inventory().await?;

        if self.record.supports_jwt() {
            self.transition(ProvisionState::FetchJwt)?;
            self.fetch_jwt().await?;
        }

        if let Some(pattern) = self.deny.matched(&self.record.identity) {
            warn!(
                identity = %self.record.identity,
                pattern = pattern,
                "identity is deny-listed, refusing to provision"
            );
            return Err(ProvisionError::DeniedIdentity(self.record.identity.clone()));
        }

        if self.config.features.pki {
            self.transition(ProvisionState::FetchCsr)?;
            self.fetch_csr().await?;
        }

        self.transition(ProvisionState::RunHelper)?;
        let reply = self.helper.invoke(&self.record).await?;

        if reply.defer {
            self.record.deferred = true;
            self.record.defer_reason = Some(reply.msg.clone());
            self.transition(ProvisionState::Deferred)?;

            return Ok(Outcome::Deferred { reason: reply.msg });
        }

        self.record.config = reply.configuration;
        if !reply.certificate.is_empty() {
            self.record.certificate = Some(reply.certificate);
        }
        if !reply.ca.is_empty() {
            self.record.ca = Some(reply.ca);
        }

        self.transition(ProvisionState::Configure)?;
        self.configure().await?;

        self.transition(ProvisionState::Restart)?;
        self.restart().await?;

        self.transition(ProvisionState::Done)?;

        Ok(Outcome::Provisioned)
    }

    fn transition(&mut self, next: ProvisionState) -> Result<(), ProvisionError> {
        if !self.state.can_transition_to(next) {
            return Err(ProvisionError::Protocol(format!(
                "invalid state transition from {} to {next}",
                self.state
            )));
        }

        debug!(
            identity = %self.record.identity,
            from = %self.state,
            to = %next,
            "state transition"
        );
        self.state = next;

        Ok(())
    }

    async fn fetch_inventory(&mut self) -> Result<(), ProvisionError> {
        if self.record.inventory.is_some() {
            debug!(identity = %self.record.identity, "already have inventory, not retrieving again");
            return Ok(());
        }

        info!(identity = %self.record.identity, "fetching inventory");

        let mut last = None;

        for attempt in 1..=FETCH_TRIES {
            if self.shutdown.is_cancelled() {
                return Err(ProvisionError::Cancelled);
            }

            if attempt > 1 {
                warn!(
                    identity = %self.record.identity,
                    attempt = attempt,
                    tries = FETCH_TRIES,
                    "retrying rpcutil#inventory"
                );
            }

            match self
                .rpc
                .call(&self.record.identity, "rpcutil", "inventory", json!({}))
                .await
            {
                Ok(reply) => {
                    self.record.inventory = Some(reply.data.to_string());
                    return Ok(());
                }
                Err(err) if !err.is_counted() => return Err(err),
                Err(err) => last = Some(err),
            }
        }

        Err(last.unwrap_or(ProvisionError::Rpc {
            target: "rpcutil#inventory".to_string(),
            reason: "retries exhausted".to_string(),
        }))
    }

    async fn fetch_jwt(&mut self) -> Result<(), ProvisionError> {
        if self.record.jwt.is_some() {
            debug!(identity = %self.record.identity, "already have JWT, not retrieving again");
            return Ok(());
        }

        info!(identity = %self.record.identity, "fetching JWT");

        let request = serde_json::to_value(JwtRequest {
            token: self.record.token.clone(),
        })
        .map_err(|e| ProvisionError::Protocol(e.to_string()))?;

        let mut last = None;

        for _ in 1..=FETCH_TRIES {
            if self.shutdown.is_cancelled() {
                return Err(ProvisionError::Cancelled);
            }

            match self
                .rpc
                .call(
                    &self.record.identity,
                    "choria_provision",
                    "jwt",
                    request.clone(),
                )
                .await
            {
                Ok(reply) => {
                    let jwt: JwtReply = decode_reply(reply.data)?;
                    if jwt.jwt.is_empty() {
                        return Err(ProvisionError::Rpc {
                            target: "choria_provision#jwt".to_string(),
                            reason: "received an empty JWT".to_string(),
                        });
                    }

                    self.record.jwt = Some(jwt.jwt);
                    return Ok(());
                }
                Err(err) if !err.is_counted() => return Err(err),
                Err(err) => last = Some(err),
            }
        }

        Err(last.unwrap_or(ProvisionError::Rpc {
            target: "choria_provision#jwt".to_string(),
            reason: "retries exhausted".to_string(),
        }))
    }

    async fn fetch_csr(&mut self) -> Result<(), ProvisionError> {
        info!(identity = %self.record.identity, "fetching CSR");

        let request = serde_json::to_value(CsrRequest {
            token: self.record.token.clone(),
            cn: self.record.identity.clone(),
            ..CsrRequest::default()
        })
        .map_err(|e| ProvisionError::Protocol(e.to_string()))?;

        let reply = self
            .rpc
            .call(
                &self.record.identity,
                "choria_provision",
                "gencsr",
                request,
            )
            .await?;

        let csr: CsrReply = decode_reply(reply.data)?;

        if csr.csr.is_empty() || csr.ssldir.is_empty() {
            return Err(ProvisionError::Rpc {
                target: "choria_provision#gencsr".to_string(),
                reason: "node returned an incomplete CSR".to_string(),
            });
        }

        self.record.csr = Some(csr);

        Ok(())
    }

    async fn configure(&mut self) -> Result<(), ProvisionError> {
        if self.record.config.is_empty() {
            return Err(ProvisionError::Helper("empty configuration".to_string()));
        }

        info!(identity = %self.record.identity, "configuring node");

        let configuration = serde_json::to_string(&self.record.config)
            .map_err(|e| ProvisionError::Protocol(format!("could not encode configuration: {e}")))?;

        let request = serde_json::to_value(ConfigureRequest {
            token: self.record.token.clone(),
            configuration,
            certificate: self.record.certificate.clone().unwrap_or_default(),
            ca: self.record.ca.clone().unwrap_or_default(),
            ssldir: self
                .record
                .csr
                .as_ref()
                .map(|csr| csr.ssldir.clone())
                .unwrap_or_default(),
        })
        .map_err(|e| ProvisionError::Protocol(e.to_string()))?;

        let reply = self
            .rpc
            .call(
                &self.record.identity,
                "choria_provision",
                "configure",
                request,
            )
            .await?;

        let response: ActionReply = decode_reply(reply.data)?;
        info!(identity = %self.record.identity, message = %response.message, "configuration response");

        Ok(())
    }

    async fn restart(&mut self) -> Result<(), ProvisionError> {
        info!(identity = %self.record.identity, "restarting node");

        let request = serde_json::to_value(RestartRequest {
            token: self.record.token.clone(),
            splay: 1,
        })
        .map_err(|e| ProvisionError::Protocol(e.to_string()))?;

        let reply = self
            .rpc
            .call(
                &self.record.identity,
                "choria_provision",
                "restart",
                request,
            )
            .await?;

        let response: ActionReply = decode_reply(reply.data)?;
        info!(identity = %self.record.identity, message = %response.message, "restart response");

        Ok(())
    }
}

fn decode_reply<T: serde::de::DeserializeOwned>(
    data: serde_json::Value,
) -> Result<T, ProvisionError> {
    serde_json::from_value(data)
        .map_err(|e| ProvisionError::Protocol(format!("could not parse reply data: {e}")))
}
