// Synthetic reading generation
pub mod generator;

// Per-device last-value state
pub mod store;

// Outgoing message envelope
pub mod message;

// Retrying publish primitive
pub mod delivery;

// Tick loop and per-device fan-out
pub mod scheduler;

// NATS JetStream integration
pub mod broker;

// Device directory client
pub mod directory;

// Configuration loading
pub mod config;

// Process signal handling
pub mod signals;

pub use delivery::{publish_with_retry, DeliveryError, RetryPolicy, Transport};
pub use generator::{GeneratorMode, ReadingSource, ValueGenerator};
pub use message::OutgoingMessage;
pub use scheduler::{RunSummary, SchedulerConfig, SchedulerState, Simulator, TickReport};
pub use store::StateStore;
