//! Message types for the orchestrator actor
//!
//! Message handlers are implemented in the orchestrator module.

use kameo_macros::Reply;

/// A discovery source or event source saw an identity in the
/// provisioning subcollective.
#[derive(Debug)]
pub struct Announce {
    /// Fabric-unique node identity
    pub identity: String,
    /// Where the identity surfaced, for logging
    pub source: AnnounceSource,
}

/// Origin of an announcement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnounceSource {
    Discovery,
    Event,
}

impl std::fmt::Display for AnnounceSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Discovery => write!(f, "discovery"),
            Self::Event => write!(f, "event"),
        }
    }
}

/// A worker finished an attempt; the identity becomes eligible again.
#[derive(Debug)]
pub struct AttemptFinished {
    pub identity: String,
}

/// Get a snapshot of the orchestrator's queue state.
#[derive(Debug)]
pub struct GetStatus;

/// Orchestrator status snapshot
#[derive(Debug, Clone, Reply)]
pub struct OrchestratorStatus {
    /// Identities currently queued or being provisioned
    pub in_flight: usize,
}
