use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::{path::Path, time::Duration};

use cellscope_protocol::{StatusThresholds, DEFAULT_BUFFER_CAP, DEFAULT_WINDOW_SIZE};

use crate::transport::{SerialParams, DEFAULT_BAUD_RATE};

pub const DEFAULT_SETTLE_DELAY_MS: u64 = 100;

/// Session settings, loaded from a JSON or TOML file and overridden by command line flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Serial port to open. `None` lets the transport pick the only connected port.
    pub port_name: Option<String>,
    pub baud_rate: u32,
    /// Largest partial record (in bytes) kept between chunks.
    pub buffer_cap: usize,
    /// Samples kept by the rolling chart window.
    pub window_size: usize,
    /// Readings kept for export on exit. `None` keeps the whole run.
    pub history_limit: Option<usize>,
    /// Pause after the handle is closed, before the session is usable again.
    pub settle_delay_ms: u64,
    pub thresholds: StatusThresholds,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            port_name: None,
            baud_rate: DEFAULT_BAUD_RATE,
            buffer_cap: DEFAULT_BUFFER_CAP,
            window_size: DEFAULT_WINDOW_SIZE,
            history_limit: None,
            settle_delay_ms: DEFAULT_SETTLE_DELAY_MS,
            thresholds: StatusThresholds::default(),
        }
    }
}

impl SessionConfig {
    pub fn from_json(json_str: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json_str)
    }

    pub fn from_toml(toml_str: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(toml_str)
    }

    /// Read a configuration file; the format follows the extension (`.json` or `.toml`).
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("json") => Self::from_json(&content)
                .with_context(|| format!("invalid JSON config {}", path.display())),
            Some("toml") => Self::from_toml(&content)
                .with_context(|| format!("invalid TOML config {}", path.display())),
            _ => Err(anyhow!(
                "unsupported config format for {} (expected .json or .toml)",
                path.display()
            )),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn with_port_name(mut self, port_name: impl Into<String>) -> Self {
        self.port_name = Some(port_name.into());
        self
    }

    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_buffer_cap(mut self, buffer_cap: usize) -> Self {
        self.buffer_cap = buffer_cap;
        self
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = Some(limit);
        self
    }

    pub fn serial_params(&self) -> SerialParams {
        SerialParams::with_baud_rate(self.baud_rate)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}
