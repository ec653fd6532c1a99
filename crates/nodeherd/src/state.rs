//! Application state shared across HTTP handlers

use std::sync::Arc;

use kameo::actor::ActorRef;

use nodeherd_core::metrics::Metrics;
use nodeherd_core::orchestrator::Orchestrator;
use nodeherd_core::pause::PauseGate;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    /// Metrics registry rendered at /metrics
    pub metrics: Arc<Metrics>,
    /// Pause gate flipped by the backplane endpoints
    pub gate: PauseGate,
    /// Reference to the orchestrator actor
    pub orchestrator: ActorRef<Orchestrator>,
}

impl AppState {
    pub fn new(
        metrics: Arc<Metrics>,
        gate: PauseGate,
        orchestrator: ActorRef<Orchestrator>,
    ) -> Self {
        Self {
            metrics,
            gate,
            orchestrator,
        }
    }
}
