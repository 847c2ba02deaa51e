use dashmap::DashMap;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;
use std::sync::Mutex;


/// Readings carry five decimal places.
const SCALE: f64 = 100_000.0;

/// Number of grid points in [0, 1) at five decimal places.
const GRID_STEPS: u32 = 100_000;

/// Round to five decimal places, half away from zero.
///
/// Idempotent: rounding an already-rounded value returns it unchanged.
pub fn round_5(value: f64) -> f64 {
    (value * SCALE).round() / SCALE
}

/// Bounded random-walk generator for a single reading stream.
///
/// Values always stay in [0, 1] and are rounded to five decimals.
#[derive(Debug, Clone)]
pub struct ValueGenerator {
    rng: StdRng,
}

impl ValueGenerator {
    /// Deterministic generator for reproducible runs.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Generator seeded from system entropy.
    pub fn from_entropy() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    pub fn new(seed: Option<u64>) -> Self {
        match seed {
            Some(seed) => Self::seeded(seed),
            None => Self::from_entropy(),
        }
    }

    /// Produce the next reading given the previous one.
    ///
    /// - No previous value: uniform draw on the 5-decimal grid in [0, 1)
    /// - Previous value: add a uniform delta from [-max_delta, +max_delta],
    ///   clamp to [0, 1], then round
    ///
    /// A non-positive or non-finite `max_delta` carries the previous value over.
    /// Steps wider than the unit interval are capped at 1.
    pub fn next(&mut self, previous: Option<f64>, max_delta: f64) -> f64 {
        let previous = match previous {
            Some(p) if !p.is_nan() => p,
            _ => return self.rng.gen_range(0..GRID_STEPS) as f64 / SCALE,
        };

        let delta = if max_delta.is_finite() && max_delta > 0.0 {
            let width = max_delta.min(1.0);
            self.rng.gen_range(-width..=width)
        } else {
            0.0
        };

        round_5((previous + delta).clamp(0.0, 1.0))
    }
}

/// How random sources are distributed across devices.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeneratorMode {
    /// Each device owns a generator. With a seed, every device's sequence is
    /// reproducible independently of task scheduling order.
    #[default]
    PerDevice,
    /// One generator shared by all devices behind a mutex.
    Shared,
}

impl std::str::FromStr for GeneratorMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "per_device" | "per-device" => Ok(GeneratorMode::PerDevice),
            "shared" => Ok(GeneratorMode::Shared),
            other => Err(format!("unknown generator mode '{}'", other)),
        }
    }
}

/// Source of readings for every tracked device.
///
/// Safe to call from concurrent per-device tasks.
pub enum ReadingSource {
    Shared(Mutex<ValueGenerator>),
    PerDevice {
        seed: Option<u64>,
        generators: DashMap<String, ValueGenerator>,
    },
}

impl ReadingSource {
    pub fn new(mode: GeneratorMode, seed: Option<u64>) -> Self {
        match mode {
            GeneratorMode::Shared => ReadingSource::Shared(Mutex::new(ValueGenerator::new(seed))),
            GeneratorMode::PerDevice => ReadingSource::PerDevice {
                seed,
                generators: DashMap::new(),
            },
        }
    }

    /// Next reading for `device_id`.
    pub fn next_for(&self, device_id: &str, previous: Option<f64>, max_delta: f64) -> f64 {
        match self {
            ReadingSource::Shared(generator) => {
                // A poisoned lock only means another device task panicked mid-draw;
                // the rng state is still usable.
                let mut generator = generator.lock().unwrap_or_else(|e| e.into_inner());
                generator.next(previous, max_delta)
            }
            ReadingSource::PerDevice { seed, generators } => {
                let mut generator = generators
                    .entry(device_id.to_string())
                    .or_insert_with(|| {
                        ValueGenerator::new(seed.map(|s| device_seed(s, device_id)))
                    });
                generator.next(previous, max_delta)
            }
        }
    }
}

/// Mix the run seed with a stable FNV-1a hash of the device id.
fn device_seed(seed: u64, device_id: &str) -> u64 {
    const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

    let hash = device_id.bytes().fold(FNV_OFFSET, |acc, b| {
        (acc ^ u64::from(b)).wrapping_mul(FNV_PRIME)
    });
    seed ^ hash
}
