//! Tick scheduler and per-device fan-out.
//!
//! On every tick one task per tracked device advances its reading, builds an
//! [`OutgoingMessage`] and publishes it with retries. All device tasks of a
//! tick are joined before the next tick may start, so tick N's readings are
//! visible to tick N+1.
//!
//! Lifecycle: `Idle -> Running -> Draining -> Stopped`. Cancellation stops new
//! ticks and lets in-flight device tasks finish.

use crate::config::SimConfig;
use crate::delivery::{publish_with_retry, RetryPolicy, Transport};
use crate::generator::ReadingSource;
use crate::message::OutgoingMessage;
use crate::store::StateStore;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};


/// Settings the tick loop needs.
#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    pub poll_interval: Duration,
    pub max_delta: f64,
    pub retry: RetryPolicy,
    pub queue: String,
    pub device_type: String,
}

impl SchedulerConfig {
    pub fn from_sim_config(config: &SimConfig) -> Self {
        Self {
            poll_interval: config.simulation.poll_interval(),
            max_delta: config.simulation.max_delta,
            retry: RetryPolicy {
                max_retries: config.simulation.max_retries,
                step: config.simulation.backoff_step(),
            },
            queue: config.broker.queue_name.clone(),
            device_type: config.simulation.device_type.clone(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
    Draining,
    Stopped,
}

/// Result of a single tick.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TickReport {
    pub tick: u64,
    pub published: usize,
    pub failed: usize,
}

/// Totals over a whole run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub ticks: u64,
    pub published: usize,
    pub failed: usize,
}

impl RunSummary {
    fn record(&mut self, report: &TickReport) {
        self.ticks += 1;
        self.published += report.published;
        self.failed += report.failed;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum DeviceOutcome {
    Published,
    Failed,
}

/// State shared by every device task.
struct Shared {
    config: SchedulerConfig,
    store: StateStore,
    readings: ReadingSource,
    transport: Arc<dyn Transport>,
}

impl Shared {
    /// One device's unit of work for a tick.
    ///
    /// Delivery failures are logged here and never propagate.
    async fn update_and_publish(&self, device_id: String) -> DeviceOutcome {
        let config = &self.config;

        let value = match self.store.advance(&device_id, |previous| {
            self.readings
                .next_for(&device_id, previous, config.max_delta)
        }) {
            Some(v) => v,
            None => {
                error!(device_id = %device_id, "Device missing from state store");
                return DeviceOutcome::Failed;
            }
        };

        let message = OutgoingMessage::new(&device_id, &config.device_type, value);
        let payload = match message.to_payload() {
            Ok(p) => p,
            Err(e) => {
                error!(device_id = %device_id, error = %e, "Failed to serialize reading");
                return DeviceOutcome::Failed;
            }
        };

        debug!(
            device_id = %device_id,
            value = value,
            ts = %message.ts,
            "Publishing reading"
        );

        match publish_with_retry(self.transport.as_ref(), &config.queue, &payload, config.retry)
            .await
        {
            Ok(attempts) => {
                if attempts > 1 {
                    debug!(device_id = %device_id, attempts = attempts, "Published after retry");
                }
                DeviceOutcome::Published
            }
            Err(e) => {
                warn!(device_id = %device_id, error = %e, "Failed to publish reading");
                DeviceOutcome::Failed
            }
        }
    }
}

/// Drives the simulated fleet.
pub struct Simulator {
    shared: Arc<Shared>,
    state: watch::Sender<SchedulerState>,
    ticks: AtomicU64,
}

impl Simulator {
    /// Create a simulator tracking `device_ids`, all without a previous value.
    pub fn new<I, S>(
        config: SchedulerConfig,
        device_ids: I,
        readings: ReadingSource,
        transport: Arc<dyn Transport>,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let (state, _) = watch::channel(SchedulerState::Idle);
        Self {
            shared: Arc::new(Shared {
                config,
                store: StateStore::from_devices(device_ids),
                readings,
                transport,
            }),
            state,
            ticks: AtomicU64::new(0),
        }
    }

    /// Build from process configuration.
    pub fn from_config<I, S>(config: &SimConfig, device_ids: I, transport: Arc<dyn Transport>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let readings = ReadingSource::new(config.simulation.generator_mode, config.simulation.seed);
        Self::new(
            SchedulerConfig::from_sim_config(config),
            device_ids,
            readings,
            transport,
        )
    }

    pub fn store(&self) -> &StateStore {
        &self.shared.store
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.borrow()
    }

    /// Watch lifecycle transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<SchedulerState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: SchedulerState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(from = ?previous, to = ?state, "Scheduler state changed");
        }
    }

    /// Run ticks until `cancel` fires.
    ///
    /// The first tick fires one interval after start. Returns once in-flight
    /// device tasks have finished.
    pub async fn run(&self, cancel: CancellationToken) -> RunSummary {
        let period = self.shared.config.poll_interval;
        let mut summary = RunSummary::default();

        self.set_state(SchedulerState::Running);
        info!(
            devices = self.shared.store.len(),
            interval_ms = period.as_millis() as u64,
            queue = %self.shared.config.queue,
            "Publishing readings"
        );

        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    self.set_state(SchedulerState::Draining);
                    break;
                }
                _ = ticker.tick() => {
                    let report = self.dispatch_tick(&cancel).await;
                    summary.record(&report);
                    if cancel.is_cancelled() {
                        break;
                    }
                }
            }
        }

        self.set_state(SchedulerState::Stopped);
        info!(
            ticks = summary.ticks,
            published = summary.published,
            failed = summary.failed,
            "Simulator stopped"
        );

        summary
    }

    /// Run a single tick immediately and wait for every device task.
    pub async fn run_tick(&self) -> TickReport {
        self.dispatch_tick(&CancellationToken::new()).await
    }

    async fn dispatch_tick(&self, cancel: &CancellationToken) -> TickReport {
        let tick = self.ticks.fetch_add(1, Ordering::SeqCst) + 1;
        let mut report = TickReport {
            tick,
            ..Default::default()
        };

        let mut tasks = JoinSet::new();
        for device_id in self.shared.store.device_ids() {
            let shared = Arc::clone(&self.shared);
            tasks.spawn(async move { shared.update_and_publish(device_id).await });
        }

        let mut draining = cancel.is_cancelled();
        loop {
            tokio::select! {
                _ = cancel.cancelled(), if !draining => {
                    draining = true;
                    self.set_state(SchedulerState::Draining);
                    info!(tick = tick, in_flight = tasks.len(), "Shutdown requested, draining tick");
                }
                joined = tasks.join_next() => match joined {
                    Some(Ok(DeviceOutcome::Published)) => report.published += 1,
                    Some(Ok(DeviceOutcome::Failed)) => report.failed += 1,
                    Some(Err(e)) => {
                        error!(tick = tick, error = %e, "Device task panicked");
                        report.failed += 1;
                    }
                    None => break,
                },
            }
        }

        debug!(
            tick = tick,
            published = report.published,
            failed = report.failed,
            "Tick complete"
        );

        report
    }
}
