// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! TOML configuration for the daemon.
//!
//! All sections and keys are optional; a missing file path yields defaults. The
//! `[harvest]` section is validated into a [`viornd::HarvestConfig`].

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::LevelFilter;
use serde::Deserialize;
use thiserror::Error;
use viornd::{HarvestConfig, InvalidConfig};

/// Errors raised while loading the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to access {path}: {source}")]
    Io {
        /// Location of the file.
        path: PathBuf,
        /// Underlying operating system error.
        source: std::io::Error,
    },
    /// TOML parsing failed.
    #[error("failed to parse {path}: {source}")]
    Parse {
        /// Location of the malformed file.
        path: PathBuf,
        /// Error returned by the TOML deserializer.
        source: toml::de::Error,
    },
    /// A harvest value is out of bounds.
    #[error("invalid harvest configuration: {0}")]
    Harvest(#[from] InvalidConfig),
    /// `[log] level` is not a log level.
    #[error("unknown log level {0:?}")]
    LogLevel(String),
    /// `[device] count` is zero.
    #[error("at least one device is required")]
    NoDevices,
}

/// `[harvest]`: driver policy.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HarvestSection {
    /// Delay between a completion and the next request.
    pub interval_ms: u64,
    /// Bytes per request.
    pub chunk_bytes: usize,
    /// Bound on the detach drain wait.
    pub drain_timeout_ms: u64,
    /// Pinned entropy estimate; derived from attestation when absent.
    pub bits_per_byte: Option<u8>,
}

impl Default for HarvestSection {
    fn default() -> Self {
        let defaults = HarvestConfig::default();
        Self {
            interval_ms: defaults.interval.as_millis() as u64,
            chunk_bytes: defaults.chunk_bytes,
            drain_timeout_ms: defaults.drain_timeout.as_millis() as u64,
            bits_per_byte: defaults.bits_per_byte,
        }
    }
}

/// `[device]`: simulated virtio-rng devices.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeviceSection {
    /// Number of devices to attach.
    pub count: u32,
    /// Time the device takes to fill a buffer.
    pub latency_ms: u64,
    /// Whether the host vouches for a hardware source.
    pub attest_hardware: bool,
    /// Fixed seed for reproducible output. Random when absent.
    pub seed: Option<u64>,
}

impl Default for DeviceSection {
    fn default() -> Self {
        Self { count: 1, latency_ms: 2, attest_hardware: false, seed: None }
    }
}

/// `[daemon]`: run control.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonSection {
    /// Stop after this many pool deliveries. Runs forever when absent.
    pub harvest_limit: Option<u64>,
    /// Period of the statistics log line.
    pub stats_interval_ms: u64,
}

impl Default for DaemonSection {
    fn default() -> Self {
        Self { harvest_limit: None, stats_interval_ms: 60_000 }
    }
}

/// `[log]`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogSection {
    /// Default filter; `RUST_LOG` overrides it.
    pub level: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self { level: "info".into() }
    }
}

/// Complete daemon configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonConfig {
    /// Driver policy.
    pub harvest: HarvestSection,
    /// Simulated devices.
    pub device: DeviceSection,
    /// Run control.
    pub daemon: DaemonSection,
    /// Logging.
    pub log: LogSection,
}

impl DaemonConfig {
    /// Loads and validates `path`, or returns defaults when `path` is `None`.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        let config: Self = toml::from_str(&raw)
            .map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })?;
        config.validate()?;
        Ok(config)
    }

    /// Checks every section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.harvest_config()?;
        self.log_level()?;
        if self.device.count == 0 {
            return Err(ConfigError::NoDevices);
        }
        Ok(())
    }

    /// The `[harvest]` section as driver configuration.
    pub fn harvest_config(&self) -> Result<HarvestConfig, ConfigError> {
        let config = HarvestConfig {
            interval: Duration::from_millis(self.harvest.interval_ms),
            chunk_bytes: self.harvest.chunk_bytes,
            drain_timeout: Duration::from_millis(self.harvest.drain_timeout_ms),
            bits_per_byte: self.harvest.bits_per_byte,
        };
        config.validate()?;
        Ok(config)
    }

    /// The `[log]` level as a filter.
    pub fn log_level(&self) -> Result<LevelFilter, ConfigError> {
        self.log.level.parse().map_err(|_| ConfigError::LogLevel(self.log.level.clone()))
    }

    /// Device fill latency.
    pub fn device_latency(&self) -> Duration {
        Duration::from_millis(self.device.latency_ms)
    }

    /// Period of the statistics log line.
    pub fn stats_interval(&self) -> Duration {
        Duration::from_millis(self.daemon.stats_interval_ms.max(1))
    }
}
