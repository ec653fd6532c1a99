//! Lifecycle event types
//!
//! Nodes and the orchestrator publish small versioned JSON events on the
//! lifecycle topics. The event source parses these; the daemon emits its
//! own startup/shutdown pair in the same format.

use serde::{Deserialize, Serialize};

/// Component name the orchestrator announces itself as.
pub const PROVISIONER_COMPONENT: &str = "provisioner";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "protocol")]
pub enum LifecycleEvent {
    #[serde(rename = "io.choria.lifecycle.v1.startup")]
    Startup {
        identity: String,
        component: String,
        #[serde(default)]
        version: String,
    },
    #[serde(rename = "io.choria.lifecycle.v1.shutdown")]
    Shutdown { identity: String, component: String },
    /// A node entered provisioning mode and is waiting for configuration.
    #[serde(rename = "io.choria.lifecycle.v1.provisioning")]
    Provisioning { identity: String, component: String },
    #[serde(rename = "io.choria.lifecycle.v1.provisioned")]
    Provisioned { identity: String, component: String },
    #[serde(rename = "io.choria.lifecycle.v1.alive")]
    Alive {
        identity: String,
        component: String,
        #[serde(default)]
        version: String,
    },
}

impl LifecycleEvent {
    /// Short event kind used in topic names (`choria.lifecycle.event.<kind>.<component>`).
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Startup { .. } => "startup",
            Self::Shutdown { .. } => "shutdown",
            Self::Provisioning { .. } => "provisioning",
            Self::Provisioned { .. } => "provisioned",
            Self::Alive { .. } => "alive",
        }
    }

    pub fn identity(&self) -> &str {
        match self {
            Self::Startup { identity, .. }
            | Self::Shutdown { identity, .. }
            | Self::Provisioning { identity, .. }
            | Self::Provisioned { identity, .. }
            | Self::Alive { identity, .. } => identity,
        }
    }

    pub fn component(&self) -> &str {
        match self {
            Self::Startup { component, .. }
            | Self::Shutdown { component, .. }
            | Self::Provisioning { component, .. }
            | Self::Provisioned { component, .. }
            | Self::Alive { component, .. } => component,
        }
    }
}

/// A registration payload published by nodes on the registration topic.
///
/// Nodes attach arbitrary extra data; only the identity matters here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationMessage {
    pub identity: String,
}
