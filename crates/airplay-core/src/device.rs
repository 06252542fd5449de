//! Receiver device identity and per-device streaming flags.

use crate::config::DeviceConfig;
use std::fmt;
use std::net::{IpAddr, SocketAddr};

/// Default RTSP port for RAOP receivers.
pub const DEFAULT_RAOP_PORT: u16 = 5000;

/// Unique device identifier derived from the receiver's MAC address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(pub [u8; 6]);

/// A RAOP receiver the sender can open sessions against.
#[derive(Debug, Clone)]
pub struct Device {
    pub id: DeviceId,
    pub name: String,
    pub addresses: Vec<IpAddr>,
    pub port: u16,

    /// Encrypt audio with the announced AES key.
    pub encrypt: bool,
    /// AirPort Express class: uppercase digest hex and a fixed username.
    pub legacy_auth: bool,
    /// Receiver accepts DMAP metadata, artwork and progress.
    pub wants_metadata: bool,
    pub password: Option<String>,
    /// Per-device volume cap on the 1..=11 scale.
    pub max_volume: Option<i32>,
}

impl DeviceId {
    /// Convert to colon-separated MAC string (uppercase).
    pub fn to_mac_string(&self) -> String {
        format!(
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_mac_string())
    }
}

impl Device {
    /// A device with RAOP defaults: encrypted, no metadata, no password.
    pub fn new(id: DeviceId, name: impl Into<String>, addresses: Vec<IpAddr>, port: u16) -> Self {
        Self {
            id,
            name: name.into(),
            addresses,
            port,
            encrypt: true,
            legacy_auth: false,
            wants_metadata: false,
            password: None,
            max_volume: None,
        }
    }

    /// Overlay configured settings on top of what was discovered.
    pub fn with_config(mut self, config: &DeviceConfig) -> Self {
        if let Some(encrypt) = config.encrypt {
            self.encrypt = encrypt;
        }
        if let Some(legacy) = config.legacy_auth {
            self.legacy_auth = legacy;
        }
        if let Some(wants) = config.wants_metadata {
            self.wants_metadata = wants;
        }
        if config.password.is_some() {
            self.password = config.password.clone();
        }
        if config.max_volume.is_some() {
            self.max_volume = config.max_volume;
        }
        self
    }

    /// Get preferred socket address (prefers IPv4).
    ///
    /// Returns the first IPv4 address if available, otherwise the first IPv6.
    /// Returns None if no addresses are available.
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        self.addresses
            .iter()
            .find(|addr| addr.is_ipv4())
            .or_else(|| self.addresses.first())
            .map(|addr| SocketAddr::new(*addr, self.port))
    }

    /// True when `addr` is one of this device's addresses.
    pub fn has_address(&self, addr: &IpAddr) -> bool {
        self.addresses.iter().any(|a| a == addr)
    }
}
