//! `Orchestrator`: work queue control plane
//!
//! Owns the in-flight identity set and the sending half of the bounded
//! work queue. Because every enqueue and completion passes through the
//! actor mailbox, dedup decisions are serialized: an identity is enqueued
//! at most once until its current attempt terminates.

use std::collections::HashSet;

use kameo::actor::{ActorRef, WeakActorRef};
use kameo::error::ActorStopReason;
use kameo::message::{Context, Message};
use kameo::prelude::*;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::ProvisionError;
use crate::message::{Announce, AttemptFinished, GetStatus, OrchestratorStatus};

/// Arguments for spawning an `Orchestrator`
pub struct OrchestratorArgs {
    /// Sending half of the bounded work queue
    pub queue: mpsc::Sender<String>,
}

/// Work queue control-plane actor
pub struct Orchestrator {
    /// Identities queued or being provisioned right now
    in_flight: HashSet<String>,
    queue: mpsc::Sender<String>,
}

impl Actor for Orchestrator {
    type Args = OrchestratorArgs;
    type Error = ProvisionError;

    async fn on_start(args: Self::Args, actor_ref: ActorRef<Self>) -> Result<Self, Self::Error> {
        info!(id = %actor_ref.id(), "orchestrator starting");

        Ok(Self {
            in_flight: HashSet::new(),
            queue: args.queue,
        })
    }

    async fn on_stop(
        &mut self,
        _actor_ref: WeakActorRef<Self>,
        reason: ActorStopReason,
    ) -> Result<(), Self::Error> {
        info!(
            reason = ?reason,
            in_flight = self.in_flight.len(),
            "orchestrator stopping"
        );

        Ok(())
    }
}

impl Message<Announce> for Orchestrator {
    /// Whether the identity was accepted onto the queue
    type Reply = bool;

    async fn handle(
        &mut self,
        msg: Announce,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        if self.in_flight.contains(&msg.identity) {
            debug!(
                identity = %msg.identity,
                source = %msg.source,
                "identity already in flight, dropping"
            );
            return false;
        }

        match self.queue.try_send(msg.identity.clone()) {
            Ok(()) => {
                debug!(identity = %msg.identity, source = %msg.source, "enqueued");
                self.in_flight.insert(msg.identity);
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                // drop on full; the next cycle or event re-surfaces it
                debug!(identity = %msg.identity, "work queue full, dropping");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(identity = %msg.identity, "work queue closed, dropping");
                false
            }
        }
    }
}

impl Message<AttemptFinished> for Orchestrator {
    type Reply = ();

    async fn handle(
        &mut self,
        msg: AttemptFinished,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        if !self.in_flight.remove(&msg.identity) {
            warn!(identity = %msg.identity, "finished attempt was not tracked");
        }
    }
}

impl Message<GetStatus> for Orchestrator {
    type Reply = OrchestratorStatus;

    async fn handle(
        &mut self,
        _msg: GetStatus,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        OrchestratorStatus {
            in_flight: self.in_flight.len(),
        }
    }
}
