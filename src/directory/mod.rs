//! Device directory client.
//!
//! Fetches the fleet to simulate from the main system's device API.
//! Expected response:
//! `{"success": true, "data": [{"deviceId": "...", ...}], "message": "..."}`

use anyhow::{Context, Result};
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;
use std::time::Duration;
use tracing::{info, warn};

/// Device directory configuration
#[derive(Clone, Debug, Deserialize)]
pub struct DirectoryConfig {
    #[serde(default = "default_url")]
    pub url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_url() -> String {
    "http://localhost:3000/api/devices".to_string()
}

fn default_timeout_secs() -> u64 {
    10
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Device record as returned by the directory.
///
/// Only `device_id` is used by the simulator.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub device_id: String,
    #[serde(default)]
    pub mac_address: Option<String>,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub device_key: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

/// Response envelope of the device API.
#[derive(Debug, Deserialize)]
struct DevicesResponse {
    #[serde(default = "default_success")]
    success: bool,
    #[serde(default)]
    data: Vec<Device>,
    #[serde(default)]
    message: String,
}

fn default_success() -> bool {
    true
}

/// Directory contents that cannot seed a simulation.
#[derive(Debug, Clone, PartialEq)]
pub enum DirectoryError {
    Rejected(String),
    EmptyDeviceList,
    MissingDeviceId { index: usize },
}

impl fmt::Display for DirectoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DirectoryError::Rejected(message) => {
                write!(f, "device API reported failure: {}", message)
            }
            DirectoryError::EmptyDeviceList => write!(f, "device API returned no devices"),
            DirectoryError::MissingDeviceId { index } => {
                write!(f, "device at index {} has no deviceId", index)
            }
        }
    }
}

impl std::error::Error for DirectoryError {}

/// HTTP client for the device directory.
pub struct DirectoryClient {
    url: String,
    http_client: Client,
}

impl DirectoryClient {
    pub fn new(config: &DirectoryConfig) -> Result<Self> {
        let http_client = Client::builder()
            .user_agent("fleet-sim/0.1")
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            url: config.url.clone(),
            http_client,
        })
    }

    /// Fetch all devices listed by the directory.
    pub async fn fetch_devices(&self) -> Result<Vec<Device>> {
        info!(url = %self.url, "Fetching devices");

        let response = self
            .http_client
            .get(&self.url)
            .send()
            .await
            .context("Failed to send device directory request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read body>".to_string());
            anyhow::bail!("Device API returned error status {}: {}", status, body);
        }

        let envelope: DevicesResponse = response
            .json()
            .await
            .context("Failed to parse device directory response")?;

        if !envelope.success {
            return Err(DirectoryError::Rejected(envelope.message).into());
        }

        Ok(envelope.data)
    }

    /// Fetch devices and reduce them to the ids to simulate.
    pub async fn fetch_device_ids(&self) -> Result<Vec<String>> {
        let devices = self.fetch_devices().await?;
        let ids = device_ids(&devices)?;
        info!(device_count = ids.len(), "Loaded devices");
        Ok(ids)
    }
}

/// Extract unique device ids, preserving directory order.
///
/// An empty list or a device without an id is an error; duplicates are
/// dropped with a warning.
pub fn device_ids(devices: &[Device]) -> Result<Vec<String>, DirectoryError> {
    if devices.is_empty() {
        return Err(DirectoryError::EmptyDeviceList);
    }

    let mut seen = HashSet::new();
    let mut ids = Vec::with_capacity(devices.len());
    for (index, device) in devices.iter().enumerate() {
        let id = device.device_id.trim();
        if id.is_empty() {
            return Err(DirectoryError::MissingDeviceId { index });
        }
        if !seen.insert(id.to_string()) {
            warn!(device_id = %id, "Duplicate device in directory, ignoring");
            continue;
        }
        ids.push(id.to_string());
    }

    Ok(ids)
}
