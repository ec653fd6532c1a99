//! Error types for nodeherd-fabric

use thiserror::Error;

/// Errors that can occur while talking to the fabric
#[derive(Error, Debug, Clone)]
pub enum FabricError {
    /// Failed to establish the broker connection
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Publishing a message failed
    #[error("publish failed: {0}")]
    PublishFailed(String),

    /// Creating a subscription failed
    #[error("subscribe failed: {0}")]
    SubscribeFailed(String),

    /// A request produced no usable replies before the window closed
    #[error("request timed out on {subject}")]
    RequestTimeout {
        /// Subject the request was published to
        subject: String,
    },

    /// Credentials file could not be used
    #[error("credentials error: {0}")]
    CredentialsError(String),
}

impl FabricError {
    /// Check if error is retryable on a later cycle
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FabricError::ConnectionFailed(_) | FabricError::RequestTimeout { .. }
        )
    }
}
