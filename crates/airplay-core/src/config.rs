//! Sender configuration.
//!
//! Loaded from an optional file plus `RAOP_`-prefixed environment
//! variables. Nested keys use a double underscore, e.g.
//! `RAOP_DEVICES__KITCHEN__PASSWORD`.

use crate::error::{Error, Result};
use config::{Config as ConfigBuilder, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;

/// Highest accepted per-device volume cap.
pub const MAX_VOLUME_CAP: i32 = 11;

/// Top-level sender settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SenderConfig {
    /// Local timing service port; 0 picks an ephemeral port.
    pub timing_port: u16,
    /// Local control service port; 0 picks an ephemeral port.
    pub control_port: u16,
    pub user_agent: String,
    /// DACP identifier sent as `Client-Instance`/`DACP-ID`, 16 hex digits.
    pub client_instance: Option<String>,
    pub stop_timeout_secs: u64,
    pub sync_interval_packets: u32,
    pub log_level: String,
    pub devices: HashMap<String, DeviceConfig>,
}

/// Per-device overrides keyed by device name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub address: Option<IpAddr>,
    pub port: Option<u16>,
    pub max_volume: Option<i32>,
    pub password: Option<String>,
    pub encrypt: Option<bool>,
    pub legacy_auth: Option<bool>,
    pub wants_metadata: Option<bool>,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            timing_port: 0,
            control_port: 0,
            user_agent: format!("raop-sender/{}", env!("CARGO_PKG_VERSION")),
            client_instance: None,
            stop_timeout_secs: 10,
            sync_interval_packets: 126,
            log_level: "info".to_string(),
            devices: HashMap::new(),
        }
    }
}

impl SenderConfig {
    /// Load configuration with priority:
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided)
    /// 3. Defaults (lowest priority)
    pub fn load(config_file: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            builder = builder.add_source(File::with_name(path));
        }

        builder = builder.add_source(
            Environment::with_prefix("RAOP")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: Self = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the sender cannot work with.
    pub fn validate(&self) -> Result<()> {
        if let Some(id) = &self.client_instance {
            if id.len() != 16 || u64::from_str_radix(id, 16).is_err() {
                return Err(Error::Config(format!(
                    "client_instance must be 16 hex digits, got {:?}",
                    id
                )));
            }
        }
        if self.sync_interval_packets == 0 {
            return Err(Error::Config("sync_interval_packets must be > 0".into()));
        }
        Ok(())
    }

    /// Parsed DACP identifier, if one is configured.
    pub fn client_instance_id(&self) -> Option<u64> {
        self.client_instance
            .as_deref()
            .and_then(|id| u64::from_str_radix(id, 16).ok())
    }

    pub fn device(&self, name: &str) -> Option<&DeviceConfig> {
        self.devices.get(name)
    }

    /// Configured volume cap for a device, if any.
    pub fn max_volume_for(&self, name: &str) -> Option<i32> {
        self.device(name).and_then(|d| d.max_volume)
    }

    pub fn password_for(&self, name: &str) -> Option<&str> {
        self.device(name).and_then(|d| d.password.as_deref())
    }
}
