// NATS JetStream adapter for the telemetry queue

mod client;
mod transport;

pub use client::{stream_name, BrokerClient, BrokerConfig};
pub use transport::JetStreamTransport;
