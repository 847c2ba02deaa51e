use crate::generator::GeneratorMode;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fmt;
use std::time::Duration;

// Re-export component config types
pub use crate::broker::BrokerConfig;
pub use crate::directory::DirectoryConfig;

/// Complete simulator configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SimConfig {
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub directory: DirectoryConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
}

/// Tick loop configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SimulationConfig {
    /// Interval between ticks (milliseconds)
    #[serde(default = "default_poll_ms")]
    pub poll_ms: u64,
    /// Largest per-tick change of a reading
    #[serde(default = "default_max_delta")]
    pub max_delta: f64,
    /// Fixed seed for reproducible runs (entropy when absent)
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub generator_mode: GeneratorMode,
    /// Publish retries after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Linear backoff step between publish attempts (milliseconds)
    #[serde(default = "default_backoff_step_ms")]
    pub backoff_step_ms: u64,
    /// Value of `deviceType` in outgoing messages
    #[serde(default = "default_device_type")]
    pub device_type: String,
}

fn default_poll_ms() -> u64 {
    1000
}

fn default_max_delta() -> f64 {
    0.05
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_step_ms() -> u64 {
    200
}

fn default_device_type() -> String {
    "mock".to_string()
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            poll_ms: default_poll_ms(),
            max_delta: default_max_delta(),
            seed: None,
            generator_mode: GeneratorMode::default(),
            max_retries: default_max_retries(),
            backoff_step_ms: default_backoff_step_ms(),
            device_type: default_device_type(),
        }
    }
}

impl SimulationConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_ms)
    }

    pub fn backoff_step(&self) -> Duration {
        Duration::from_millis(self.backoff_step_ms)
    }
}

/// Invalid configuration values
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    InvalidPollInterval,
    InvalidMaxDelta(f64),
    EmptyQueueName,
    InvalidQueueName(String),
    EmptyBrokerUrl,
    EmptyDeviceApiUrl,
    EmptyDeviceType,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPollInterval => write!(f, "poll_ms must be greater than zero"),
            ConfigError::InvalidMaxDelta(d) => {
                write!(f, "max_delta must be a finite non-negative number, got {}", d)
            }
            ConfigError::EmptyQueueName => write!(f, "queue name is required"),
            ConfigError::InvalidQueueName(name) => write!(
                f,
                "invalid queue name '{}': must not contain whitespace, '*' or '>'",
                name
            ),
            ConfigError::EmptyBrokerUrl => write!(f, "broker url is required"),
            ConfigError::EmptyDeviceApiUrl => write!(f, "device API url is required"),
            ConfigError::EmptyDeviceType => write!(f, "device_type is required"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl SimConfig {
    /// Check values the tick loop relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let sim = &self.simulation;
        if sim.poll_ms == 0 {
            return Err(ConfigError::InvalidPollInterval);
        }
        if !sim.max_delta.is_finite() || sim.max_delta < 0.0 {
            return Err(ConfigError::InvalidMaxDelta(sim.max_delta));
        }
        if sim.device_type.trim().is_empty() {
            return Err(ConfigError::EmptyDeviceType);
        }
        if self.broker.queue_name.trim().is_empty() {
            return Err(ConfigError::EmptyQueueName);
        }
        if !is_valid_subject(&self.broker.queue_name) {
            return Err(ConfigError::InvalidQueueName(self.broker.queue_name.clone()));
        }
        if self.broker.url.trim().is_empty() {
            return Err(ConfigError::EmptyBrokerUrl);
        }
        if self.directory.url.trim().is_empty() {
            return Err(ConfigError::EmptyDeviceApiUrl);
        }
        Ok(())
    }

    /// Apply overrides from environment variables.
    ///
    /// Unparseable values are ignored with a warning. `SEED=0` clears the seed.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("BROKER_URL") {
            self.broker.url = v;
        }
        if let Some(v) = lookup("QUEUE_NAME") {
            self.broker.queue_name = v;
        }
        if let Some(v) = lookup("DEVICE_API") {
            self.directory.url = v;
        }
        if let Some(v) = lookup("DEVICE_TYPE") {
            self.simulation.device_type = v;
        }
        if let Some(n) = parse_env(&lookup, "POLL_MS") {
            self.simulation.poll_ms = n;
        }
        if let Some(d) = parse_env(&lookup, "DELTA_RANGE") {
            self.simulation.max_delta = d;
        }
        if let Some(n) = parse_env(&lookup, "MAX_RETRIES") {
            self.simulation.max_retries = n;
        }
        if let Some(seed) = parse_env::<u64, _>(&lookup, "SEED") {
            self.simulation.seed = (seed != 0).then_some(seed);
        }
        if let Some(mode) = parse_env(&lookup, "GENERATOR_MODE") {
            self.simulation.generator_mode = mode;
        }
    }
}

/// Queue names double as NATS subjects: no whitespace, no wildcards and no
/// empty tokens.
fn is_valid_subject(name: &str) -> bool {
    name.split('.').all(|token| {
        !token.is_empty()
            && !token
                .chars()
                .any(|c| c.is_whitespace() || c == '*' || c == '>')
    })
}

fn parse_env<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key = key, value = %raw, "Ignoring unparseable environment override");
            None
        }
    }
}

/// Load configuration from TOML file
pub fn load_config(path: &str) -> Result<SimConfig> {
    let contents =
        std::fs::read_to_string(path).context(format!("Failed to read config file '{}'", path))?;
    let config: SimConfig =
        toml::from_str(&contents).context(format!("Failed to parse config file '{}'", path))?;
    Ok(config)
}

/// Resolve the process configuration.
///
/// Reads the TOML file named by `FLEET_SIM_CONFIG` when set (defaults
/// otherwise), applies environment overrides, then validates.
pub fn from_env() -> Result<SimConfig> {
    let mut config = match std::env::var("FLEET_SIM_CONFIG") {
        Ok(path) => load_config(&path)?,
        Err(_) => SimConfig::default(),
    };
    config.apply_env();
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn overrides(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = SimConfig::default();
        assert_eq!(config.broker.url, "nats://localhost:4222");
        assert_eq!(config.broker.queue_name, "edge.telemetry");
        assert_eq!(config.directory.url, "http://localhost:3000/api/devices");
        assert_eq!(config.simulation.poll_ms, 1000);
        assert_eq!(config.simulation.max_delta, 0.05);
        assert_eq!(config.simulation.seed, None);
        assert_eq!(config.simulation.max_retries, 3);
        assert_eq!(config.simulation.backoff_step(), Duration::from_millis(200));
        assert_eq!(config.simulation.generator_mode, GeneratorMode::PerDevice);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_deserialization() {
        let toml = r#"
            [broker]
            url = "nats://broker:4222"
            queue_name = "plant.flow"

            [directory]
            url = "http://registry:8080/devices"
            timeout_secs = 3

            [simulation]
            poll_ms = 250
            max_delta = 0.1
            seed = 42
            generator_mode = "shared"
            max_retries = 5
            device_type = "camera"
        "#;

        let config: SimConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.broker.url, "nats://broker:4222");
        assert_eq!(config.broker.queue_name, "plant.flow");
        assert_eq!(config.directory.timeout_secs, 3);
        assert_eq!(config.simulation.poll_interval(), Duration::from_millis(250));
        assert_eq!(config.simulation.seed, Some(42));
        assert_eq!(config.simulation.generator_mode, GeneratorMode::Shared);
        assert_eq!(config.simulation.max_retries, 5);
        assert_eq!(config.simulation.device_type, "camera");
    }

    #[test]
    fn test_partial_config() {
        let toml = r#"
            [simulation]
            poll_ms = 500
        "#;

        let config: SimConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.simulation.poll_ms, 500);
        assert_eq!(config.simulation.max_retries, 3); // Default
        assert_eq!(config.broker.queue_name, "edge.telemetry"); // Default
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[broker]\nqueue_name = \"from.file\"").unwrap();

        let config = load_config(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.broker.queue_name, "from.file");
    }

    #[test]
    fn test_load_config_missing_file() {
        assert!(load_config("/nonexistent/fleet-sim.toml").is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = SimConfig::default();
        config.apply_overrides(overrides(&[
            ("BROKER_URL", "nats://env:4222"),
            ("QUEUE_NAME", "env.queue"),
            ("DEVICE_API", "http://env/devices"),
            ("POLL_MS", "100"),
            ("DELTA_RANGE", "0.2"),
            ("SEED", "7"),
            ("GENERATOR_MODE", "shared"),
        ]));

        assert_eq!(config.broker.url, "nats://env:4222");
        assert_eq!(config.broker.queue_name, "env.queue");
        assert_eq!(config.directory.url, "http://env/devices");
        assert_eq!(config.simulation.poll_ms, 100);
        assert_eq!(config.simulation.max_delta, 0.2);
        assert_eq!(config.simulation.seed, Some(7));
        assert_eq!(config.simulation.generator_mode, GeneratorMode::Shared);
    }

    #[test]
    fn test_zero_seed_means_unseeded() {
        let mut config = SimConfig::default();
        config.simulation.seed = Some(5);
        config.apply_overrides(overrides(&[("SEED", "0")]));
        assert_eq!(config.simulation.seed, None);
    }

    #[test]
    fn test_unparseable_override_ignored() {
        let mut config = SimConfig::default();
        config.apply_overrides(overrides(&[("POLL_MS", "soon"), ("GENERATOR_MODE", "chaos")]));
        assert_eq!(config.simulation.poll_ms, 1000);
        assert_eq!(config.simulation.generator_mode, GeneratorMode::PerDevice);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = SimConfig::default();
        config.simulation.poll_ms = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidPollInterval));

        let mut config = SimConfig::default();
        config.simulation.max_delta = -0.1;
        assert_eq!(config.validate(), Err(ConfigError::InvalidMaxDelta(-0.1)));

        let mut config = SimConfig::default();
        config.broker.queue_name = " ".to_string();
        assert_eq!(config.validate(), Err(ConfigError::EmptyQueueName));

        let mut config = SimConfig::default();
        config.directory.url = String::new();
        assert_eq!(config.validate(), Err(ConfigError::EmptyDeviceApiUrl));
    }

    #[test]
    fn test_validate_rejects_invalid_subjects() {
        for name in ["plant flow", "edge.*", "edge.>", "edge..telemetry", ".edge", "edge\ttelemetry"] {
            let mut config = SimConfig::default();
            config.broker.queue_name = name.to_string();
            assert_eq!(
                config.validate(),
                Err(ConfigError::InvalidQueueName(name.to_string())),
                "{:?} should be rejected",
                name
            );
        }

        let mut config = SimConfig::default();
        config.broker.queue_name = "plant-1.flow_rate".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_directory_section_keeps_default_url() {
        let toml = r#"
            [directory]
            timeout_secs = 3
        "#;

        let config: SimConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.directory.url, "http://localhost:3000/api/devices");
        assert_eq!(config.directory.timeout_secs, 3);
    }
}
