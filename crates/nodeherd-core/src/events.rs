//! Lifecycle and registration event source
//!
//! Long-lived subscriptions to the lifecycle topic pattern and the
//! registration topic. Startup events for the configured component and
//! provisioning events announce their identity to the orchestrator;
//! everything else is dropped. Events arriving while paused are dropped
//! without buffering.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use kameo::actor::ActorRef;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use nodeherd_api::events::{LifecycleEvent, RegistrationMessage};
use nodeherd_fabric::subject;
use nodeherd_fabric::traits::{Connector, InboundMessage};

use crate::message::{Announce, AnnounceSource};
use crate::metrics::Metrics;
use crate::orchestrator::Orchestrator;
use crate::pause::PauseGate;
use crate::shutdown::Shutdown;

/// Delay before re-subscribing after a transport failure.
const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(5);

/// Event loop handle
pub struct EventSource {
    pub connector: Arc<dyn Connector>,
    pub orchestrator: ActorRef<Orchestrator>,
    pub gate: PauseGate,
    pub shutdown: Shutdown,
    pub metrics: Arc<Metrics>,
    /// Component accepted in startup lifecycle events
    pub component: String,
}

impl EventSource {
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        info!(component = %self.component, "event loop started");

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            let lifecycle = self.connector.subscribe(subject::LIFECYCLE_EVENTS).await;
            let registration = self.connector.subscribe(subject::REGISTRATION).await;

            let (mut lifecycle, mut registration) = match (lifecycle, registration) {
                (Ok(l), Ok(r)) => (l, r),
                (l, r) => {
                    if let Err(err) = l.and(r) {
                        warn!(error = %err, "could not subscribe to event topics");
                    }
                    tokio::select! {
                        () = self.shutdown.cancelled() => break,
                        () = tokio::time::sleep(RESUBSCRIBE_DELAY) => continue,
                    }
                }
            };

            loop {
                tokio::select! {
                    () = self.shutdown.cancelled() => return,
                    msg = lifecycle.next() => match msg {
                        Some(msg) => self.handle_lifecycle(msg).await,
                        None => break,
                    },
                    msg = registration.next() => match msg {
                        Some(msg) => self.handle_registration(msg).await,
                        None => break,
                    },
                }
            }

            warn!("event subscription ended, re-subscribing");
        }

        info!("event loop stopped");
    }

    async fn handle_lifecycle(&self, msg: InboundMessage) {
        if self.gate.is_paused() {
            return;
        }

        let event: LifecycleEvent = match serde_json::from_slice(&msg.payload) {
            Ok(event) => event,
            Err(err) => {
                trace!(subject = %msg.subject, error = %err, "ignoring unparsable lifecycle event");
                return;
            }
        };

        let identity = match &event {
            LifecycleEvent::Startup { identity, component, .. }
                if component == &self.component =>
            {
                identity.clone()
            }
            LifecycleEvent::Provisioning { identity, .. } => identity.clone(),
            _ => {
                trace!(kind = event.kind(), "ignoring lifecycle event");
                return;
            }
        };

        debug!(identity = %identity, kind = event.kind(), "node announced via lifecycle event");
        self.accept(identity).await;
    }

    async fn handle_registration(&self, msg: InboundMessage) {
        if self.gate.is_paused() {
            return;
        }

        let registration: RegistrationMessage = match serde_json::from_slice(&msg.payload) {
            Ok(registration) => registration,
            Err(err) => {
                trace!(error = %err, "ignoring unparsable registration message");
                return;
            }
        };

        debug!(identity = %registration.identity, "node announced via registration");
        self.accept(registration.identity).await;
    }

    async fn accept(&self, identity: String) {
        self.metrics.event_discovered.inc();
        self.orchestrator
            .tell(Announce {
                identity,
                source: AnnounceSource::Event,
            })
            .await
            .ok();
    }
}
