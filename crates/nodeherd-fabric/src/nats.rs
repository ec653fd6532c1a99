//! NATS-backed connector
//!
//! Request windows are an ephemeral inbox subscription plus a
//! publish-with-reply; replies are collected until the caller's limit or
//! deadline, whichever comes first.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use tracing::{debug, info};

use crate::error::FabricError;
use crate::traits::{Connector, InboundMessage};

/// Connection settings for the broker.
#[derive(Debug, Clone)]
pub struct NatsOptions {
    pub url: String,
    /// Disables the TLS requirement; the broker may still offer it.
    pub insecure: bool,
    /// Optional NATS credentials file.
    pub credentials: Option<std::path::PathBuf>,
}

impl NatsOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            insecure: false,
            credentials: None,
        }
    }

    #[must_use]
    pub fn insecure(mut self, insecure: bool) -> Self {
        self.insecure = insecure;
        self
    }

    #[must_use]
    pub fn credentials(mut self, path: Option<impl AsRef<Path>>) -> Self {
        self.credentials = path.map(|p| p.as_ref().to_path_buf());
        self
    }
}

/// Production connector over `async-nats`.
pub struct NatsConnector {
    client: async_nats::Client,
}

impl NatsConnector {
    /// Connect to the broker.
    pub async fn connect(opts: &NatsOptions) -> Result<Self, FabricError> {
        let mut options = async_nats::ConnectOptions::new().require_tls(!opts.insecure);

        if let Some(path) = &opts.credentials {
            options = options
                .credentials_file(path)
                .await
                .map_err(|e| FabricError::CredentialsError(e.to_string()))?;
        }

        let client = options
            .connect(opts.url.as_str())
            .await
            .map_err(|e| FabricError::ConnectionFailed(e.to_string()))?;

        info!(url = %opts.url, insecure = opts.insecure, "connected to broker");

        Ok(Self { client })
    }
}

#[async_trait]
impl Connector for NatsConnector {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), FabricError> {
        self.client
            .publish(subject.to_string(), payload)
            .await
            .map_err(|e| FabricError::PublishFailed(e.to_string()))?;
        self.client
            .flush()
            .await
            .map_err(|e| FabricError::PublishFailed(e.to_string()))?;

        Ok(())
    }

    async fn request_window(
        &self,
        subject: &str,
        payload: Bytes,
        limit: usize,
        window: Duration,
    ) -> Result<Vec<InboundMessage>, FabricError> {
        let inbox = self.client.new_inbox();
        let mut replies = self
            .client
            .subscribe(inbox.clone())
            .await
            .map_err(|e| FabricError::SubscribeFailed(e.to_string()))?;

        self.client
            .publish_with_reply(subject.to_string(), inbox, payload)
            .await
            .map_err(|e| FabricError::PublishFailed(e.to_string()))?;
        self.client
            .flush()
            .await
            .map_err(|e| FabricError::PublishFailed(e.to_string()))?;

        let deadline = tokio::time::Instant::now() + window;
        let mut collected = Vec::new();

        loop {
            match tokio::time::timeout_at(deadline, replies.next()).await {
                Err(_) | Ok(None) => break,
                Ok(Some(msg)) => {
                    collected.push(InboundMessage {
                        subject: msg.subject.to_string(),
                        payload: msg.payload,
                    });

                    if limit != 0 && collected.len() >= limit {
                        break;
                    }
                }
            }
        }

        replies.unsubscribe().await.ok();

        debug!(
            subject = subject,
            replies = collected.len(),
            "request window closed"
        );

        Ok(collected)
    }

    async fn subscribe(
        &self,
        subject: &str,
    ) -> Result<BoxStream<'static, InboundMessage>, FabricError> {
        let sub = self
            .client
            .subscribe(subject.to_string())
            .await
            .map_err(|e| FabricError::SubscribeFailed(e.to_string()))?;

        Ok(sub
            .map(|msg| InboundMessage {
                subject: msg.subject.to_string(),
                payload: msg.payload,
            })
            .boxed())
    }
}
