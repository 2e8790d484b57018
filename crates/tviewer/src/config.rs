// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Viewer configuration.
//!
//! Supports both programmatic and file-based (TOML) configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// HTTP / WebSocket server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Collection and staleness policy.
    #[serde(default)]
    pub telemetry: TelemetryConfig,

    /// Filesystem locations.
    #[serde(default)]
    pub paths: PathsConfig,
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.max_clients == 0 {
            return Err(ConfigError::Invalid("max_clients must be at least 1".into()));
        }
        if self.server.client_buffer == 0 {
            return Err(ConfigError::Invalid(
                "client_buffer must be at least 1".into(),
            ));
        }
        self.telemetry.validate()
    }
}

/// HTTP / WebSocket server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address.
    #[serde(default = "default_bind")]
    pub bind: String,

    /// HTTP port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Maximum concurrent WebSocket clients.
    #[serde(default = "default_max_clients")]
    pub max_clients: usize,

    /// Outbound snapshot buffer per client. A client whose buffer fills up is dropped.
    #[serde(default = "default_client_buffer")]
    pub client_buffer: usize,
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_max_clients() -> usize {
    100
}

fn default_client_buffer() -> usize {
    16
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            max_clients: default_max_clients(),
            client_buffer: default_client_buffer(),
        }
    }
}

/// Collection and staleness policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Sampling interval requested from devices (milliseconds).
    #[serde(default = "default_sample_interval")]
    pub sample_interval_ms: u64,

    /// Number of silent sampling intervals before a device is declared down
    /// and its topology entries are evicted.
    #[serde(default = "default_stale_after")]
    pub stale_after_intervals: u32,

    /// Telemetry bus capacity. A full bus blocks collectors.
    #[serde(default = "default_bus_capacity")]
    pub bus_capacity: usize,

    /// Aggregator eviction sweep period (milliseconds).
    #[serde(default = "default_sample_interval")]
    pub sweep_interval_ms: u64,

    /// First retry delay after a failed subscription (milliseconds).
    #[serde(default = "default_backoff_initial")]
    pub backoff_initial_ms: u64,

    /// Upper bound on the retry delay (milliseconds).
    #[serde(default = "default_backoff_max")]
    pub backoff_max_ms: u64,
}

fn default_sample_interval() -> u64 {
    2000
}

fn default_stale_after() -> u32 {
    3
}

fn default_bus_capacity() -> usize {
    1024
}

fn default_backoff_initial() -> u64 {
    1000
}

fn default_backoff_max() -> u64 {
    30_000
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            sample_interval_ms: default_sample_interval(),
            stale_after_intervals: default_stale_after(),
            bus_capacity: default_bus_capacity(),
            sweep_interval_ms: default_sample_interval(),
            backoff_initial_ms: default_backoff_initial(),
            backoff_max_ms: default_backoff_max(),
        }
    }
}

impl TelemetryConfig {
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }

    /// Silence allowed before a device or entry is considered gone.
    pub fn staleness_window(&self) -> Duration {
        self.sample_interval() * self.stale_after_intervals
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn backoff_initial(&self) -> Duration {
        Duration::from_millis(self.backoff_initial_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "sample_interval_ms must be positive".into(),
            ));
        }
        if self.stale_after_intervals == 0 {
            return Err(ConfigError::Invalid(
                "stale_after_intervals must be at least 1".into(),
            ));
        }
        if self.bus_capacity == 0 {
            return Err(ConfigError::Invalid("bus_capacity must be at least 1".into()));
        }
        if self.sweep_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "sweep_interval_ms must be positive".into(),
            ));
        }
        if self.backoff_initial_ms == 0 || self.backoff_initial_ms > self.backoff_max_ms {
            return Err(ConfigError::Invalid(format!(
                "backoff_initial_ms ({}) must be positive and not exceed backoff_max_ms ({})",
                self.backoff_initial_ms, self.backoff_max_ms
            )));
        }
        Ok(())
    }
}

/// Filesystem locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Root for `certs/` and `public/`.
    #[serde(default = "default_base_path")]
    pub base_path: PathBuf,

    /// Device inventory document (JSON).
    #[serde(default = "default_inventory")]
    pub inventory: PathBuf,
}

fn default_base_path() -> PathBuf {
    PathBuf::from(".")
}

fn default_inventory() -> PathBuf {
    PathBuf::from("devices.json")
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            base_path: default_base_path(),
            inventory: default_inventory(),
        }
    }
}

impl PathsConfig {
    pub fn cert_dir(&self) -> PathBuf {
        self.base_path.join("certs")
    }

    pub fn public_dir(&self) -> PathBuf {
        self.base_path.join("public")
    }
}
