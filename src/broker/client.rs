use anyhow::{Context, Result};
use async_nats::jetstream::{self, stream};
use serde::Deserialize;
use tracing::info;

/// Telemetry broker configuration
#[derive(Clone, Debug, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "default_url")]
    pub url: String,
    /// Queue (subject) readings are published to
    #[serde(default = "default_queue_name")]
    pub queue_name: String,
    /// Maximum stored messages per queue before the oldest are discarded
    #[serde(default = "default_max_messages")]
    pub max_messages: i64,
}

fn default_url() -> String {
    "nats://localhost:4222".to_string()
}

fn default_queue_name() -> String {
    "edge.telemetry".to_string()
}

fn default_max_messages() -> i64 {
    1_000_000
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            queue_name: default_queue_name(),
            max_messages: default_max_messages(),
        }
    }
}

/// JetStream stream backing a queue name.
///
/// Stream names may not contain `.`, `*`, `>` or whitespace.
pub fn stream_name(queue: &str) -> String {
    queue
        .chars()
        .map(|c| match c {
            '.' | '-' | '*' | '>' => '_',
            c if c.is_whitespace() => '_',
            c => c.to_ascii_uppercase(),
        })
        .collect()
}

/// NATS connection with the telemetry queue declared.
pub struct BrokerClient {
    client: async_nats::Client,
    jetstream: jetstream::Context,
    config: BrokerConfig,
}

impl BrokerClient {
    /// Connect to NATS and declare the durable queue.
    pub async fn connect(config: BrokerConfig) -> Result<Self> {
        info!("Connecting to NATS at {}", config.url);

        let client = async_nats::connect(&config.url)
            .await
            .context("Failed to connect to NATS")?;

        let jetstream = jetstream::new(client.clone());

        let broker = Self {
            client,
            jetstream,
            config,
        };

        broker.declare_queue().await?;

        Ok(broker)
    }

    /// Ensure a file-backed work-queue stream captures the queue subject.
    async fn declare_queue(&self) -> Result<()> {
        let name = stream_name(&self.config.queue_name);
        info!(queue = %self.config.queue_name, stream = %name, "Declaring queue");

        if self.jetstream.get_stream(&name).await.is_ok() {
            info!(stream = %name, "Stream already exists");
            return Ok(());
        }

        let stream_config = stream::Config {
            name: name.clone(),
            subjects: vec![self.config.queue_name.clone()],
            max_messages: self.config.max_messages,
            storage: stream::StorageType::File,
            retention: stream::RetentionPolicy::WorkQueue,
            ..Default::default()
        };

        self.jetstream
            .create_stream(stream_config)
            .await
            .context(format!("Failed to declare queue '{}'", self.config.queue_name))?;

        info!(stream = %name, "Created stream");
        Ok(())
    }

    /// JetStream context for publishing
    pub fn jetstream(&self) -> &jetstream::Context {
        &self.jetstream
    }

    /// Flush pending publishes before exit.
    pub async fn close(self) -> Result<()> {
        self.client
            .flush()
            .await
            .context("Failed to flush NATS connection")?;
        info!("NATS connection flushed");
        Ok(())
    }
}
