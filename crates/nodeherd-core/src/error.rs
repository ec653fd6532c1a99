//! Error taxonomy for provisioning attempts

use thiserror::Error;

/// Errors that can occur while provisioning a node
#[derive(Error, Debug, Clone)]
pub enum ProvisionError {
    /// Invalid or missing configuration at startup; fatal
    #[error("configuration error: {0}")]
    Config(String),

    /// Operation refused because provisioning is paused
    #[error("provisioning is paused, cannot perform {0}")]
    Paused(String),

    /// A fabric call failed: no response, wrong count, bad status, transport error
    #[error("could not perform {target}: {reason}")]
    Rpc {
        /// `agent#action` the call was made against
        target: String,
        /// What went wrong
        reason: String,
    },

    /// Helper subprocess failed: spawn, timeout, exit status, bad output
    #[error("helper failed: {0}")]
    Helper(String),

    /// Identity matched the certificate deny list
    #[error("deny-listed identity: {0}")]
    DeniedIdentity(String),

    /// Root or per-attempt cancellation fired
    #[error("attempt cancelled")]
    Cancelled,

    /// Internal contract violation (bad transition, unencodable payload)
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl ProvisionError {
    /// Whether this is a pause refusal rather than a real failure
    #[must_use]
    pub fn is_paused(&self) -> bool {
        matches!(self, ProvisionError::Paused(_))
    }

    /// Whether the attempt was cancelled from outside
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ProvisionError::Cancelled)
    }

    /// Whether the worker should count this into `provision_errors`
    #[must_use]
    pub fn is_counted(&self) -> bool {
        !self.is_paused() && !self.is_cancelled()
    }
}
