use crate::delivery::Transport;
use anyhow::{Context, Result};
use async_nats::jetstream;
use async_trait::async_trait;
use tracing::debug;

/// Publishes readings to JetStream.
///
/// Each publish carries `Content-Type: application/json` and waits for the
/// stream ack, so an `Ok` means the message is stored durably.
#[derive(Clone)]
pub struct JetStreamTransport {
    jetstream: jetstream::Context,
}

impl JetStreamTransport {
    pub fn new(jetstream: jetstream::Context) -> Self {
        Self { jetstream }
    }
}

#[async_trait]
impl Transport for JetStreamTransport {
    async fn send(&self, queue: &str, payload: &[u8]) -> Result<()> {
        let mut headers = async_nats::HeaderMap::new();
        headers.insert("Content-Type", "application/json");

        debug!(subject = %queue, bytes = payload.len(), "Publishing reading to NATS");

        self.jetstream
            .publish_with_headers(queue.to_string(), headers, payload.to_vec().into())
            .await
            .context(format!("Failed to publish to subject '{}'", queue))?
            .await
            .context("Failed to await publish ack")?;

        Ok(())
    }
}
