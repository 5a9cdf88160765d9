//! Configuration handling for the device link console.
//!
//! Settings come from an optional YAML file, then environment variables, then
//! command-line flags. A missing or unreadable file is not fatal; defaults are
//! used and a warning is logged.

use anyhow::{bail, Context, Result};
use devlink_session::{Endpoint, LinkConfig, ReconnectPolicy};
use devlink_telemetry::{DEFAULT_HISTORY_CAPACITY, MAX_HISTORY_CAPACITY};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Device link console configuration
#[derive(Debug, Clone, PartialEq)]
pub struct DevlinkConfig {
    /// Device address, e.g. ws://192.168.4.1:81/ws
    pub endpoint: String,
    /// Connect as soon as the console starts
    pub auto_connect: bool,
    /// Retries before giving up
    pub max_attempts: u32,
    /// First retry delay
    pub base_delay: Duration,
    /// Longest retry delay
    pub max_delay: Duration,
    /// Keep-alive period
    pub ping_interval: Duration,
    /// WebSocket open timeout
    pub connect_timeout: Duration,
    /// Samples kept per sensor history
    pub history: usize,
}

impl Default for DevlinkConfig {
    fn default() -> Self {
        let policy = ReconnectPolicy::default();
        Self {
            endpoint: "ws://192.168.4.1:81/ws".to_string(),
            auto_connect: true,
            max_attempts: policy.max_attempts,
            base_delay: policy.base_delay,
            max_delay: policy.max_delay,
            ping_interval: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            history: DEFAULT_HISTORY_CAPACITY,
        }
    }
}

/// Root configuration structure (matches the YAML structure)
#[derive(Debug, Deserialize)]
struct RootConfig {
    device: Option<DeviceSection>,
    telemetry: Option<TelemetrySection>,
}

#[derive(Debug, Deserialize)]
struct DeviceSection {
    endpoint: Option<String>,
    auto_connect: Option<bool>,
    max_attempts: Option<u32>,
    base_delay: Option<String>,
    max_delay: Option<String>,
    ping_interval: Option<String>,
    connect_timeout: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TelemetrySection {
    history: Option<usize>,
}

impl DevlinkConfig {
    /// Load configuration from file and environment variables
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Self {
        let mut config = Self::default();

        match std::fs::read_to_string(&config_path) {
            Ok(content) => match serde_yaml::from_str::<RootConfig>(&content) {
                Ok(root_config) => {
                    config.apply_root_config(root_config);
                    info!("Loaded configuration from {:?}", config_path.as_ref());
                }
                Err(e) => warn!(
                    "Failed to parse config file {:?}, using defaults: {}",
                    config_path.as_ref(),
                    e
                ),
            },
            Err(_) => warn!(
                "Config file {:?} not found, using defaults",
                config_path.as_ref()
            ),
        }

        config.apply_environment_overrides();
        config
    }

    fn apply_root_config(&mut self, root_config: RootConfig) {
        if let Some(device) = root_config.device {
            if let Some(endpoint) = device.endpoint {
                self.endpoint = endpoint;
            }
            if let Some(auto_connect) = device.auto_connect {
                self.auto_connect = auto_connect;
            }
            if let Some(max_attempts) = device.max_attempts {
                self.max_attempts = max_attempts;
            }
            apply_duration("device.base_delay", device.base_delay, &mut self.base_delay);
            apply_duration("device.max_delay", device.max_delay, &mut self.max_delay);
            apply_duration(
                "device.ping_interval",
                device.ping_interval,
                &mut self.ping_interval,
            );
            apply_duration(
                "device.connect_timeout",
                device.connect_timeout,
                &mut self.connect_timeout,
            );
        }

        if let Some(history) = root_config.telemetry.and_then(|t| t.history) {
            self.history = history;
        }
    }

    /// Apply environment variable overrides
    fn apply_environment_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(endpoint) = lookup("DEVLINK_ENDPOINT") {
            info!("Endpoint overridden by environment: {}", endpoint);
            self.endpoint = endpoint;
        }

        if let Some(value) = lookup("DEVLINK_MAX_ATTEMPTS") {
            match value.parse::<u32>() {
                Ok(n) => {
                    self.max_attempts = n;
                    info!("Max attempts overridden by environment: {}", n);
                }
                Err(_) => warn!("Ignoring DEVLINK_MAX_ATTEMPTS={:?}", value),
            }
        }

        if let Some(value) = lookup("DEVLINK_PING_INTERVAL") {
            apply_duration("DEVLINK_PING_INTERVAL", Some(value), &mut self.ping_interval);
        }

        if let Some(value) = lookup("DEVLINK_HISTORY") {
            match value.parse::<usize>() {
                Ok(n) => {
                    self.history = n;
                    info!("History size overridden by environment: {}", n);
                }
                Err(_) => warn!("Ignoring DEVLINK_HISTORY={:?}", value),
            }
        }
    }

    /// Build the link configuration, validating the endpoint, ping interval
    /// and history size
    pub fn link_config(&self) -> Result<LinkConfig> {
        let endpoint = Endpoint::parse(&self.endpoint)
            .with_context(|| format!("invalid device endpoint {:?}", self.endpoint))?;
        if self.ping_interval.is_zero() {
            bail!("ping interval must be greater than zero");
        }
        if self.history > MAX_HISTORY_CAPACITY {
            bail!(
                "history size {} exceeds the maximum of {}",
                self.history,
                MAX_HISTORY_CAPACITY
            );
        }
        Ok(LinkConfig {
            endpoint,
            reconnect: ReconnectPolicy {
                base_delay: self.base_delay,
                max_delay: self.max_delay,
                max_attempts: self.max_attempts,
            },
            ping_interval: self.ping_interval,
            auto_connect: self.auto_connect,
        })
    }
}

fn apply_duration(name: &str, value: Option<String>, target: &mut Duration) {
    let value = match value {
        Some(value) => value,
        None => return,
    };
    match humantime::parse_duration(&value) {
        Ok(duration) => *target = duration,
        Err(e) => warn!("Ignoring {}={:?}: {}", name, value, e),
    }
}
