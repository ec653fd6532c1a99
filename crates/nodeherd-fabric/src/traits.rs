//! Connector trait abstracting the broker client

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

use crate::error::FabricError;

/// A message received from the fabric.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub subject: String,
    pub payload: Bytes,
}

/// Request/reply and pub/sub semantics over the fabric.
///
/// Implementations are shared between tasks behind an `Arc` and must be
/// safe for concurrent calls.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Fire-and-forget publish.
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), FabricError>;

    /// Publish a request and collect replies until `limit` have arrived or
    /// the window closes. A `limit` of 0 collects for the whole window.
    ///
    /// An empty reply set is not an error; callers decide what a usable
    /// response count is.
    async fn request_window(
        &self,
        subject: &str,
        payload: Bytes,
        limit: usize,
        window: Duration,
    ) -> Result<Vec<InboundMessage>, FabricError>;

    /// Subscribe to a subject pattern.
    async fn subscribe(
        &self,
        subject: &str,
    ) -> Result<BoxStream<'static, InboundMessage>, FabricError>;
}
