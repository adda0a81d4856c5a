//! Configuration management for the JT808 stack.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::{PlateColor, RegisterInfo};

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Platform (server) configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Terminal (client) configuration.
    #[serde(default)]
    pub client: ClientConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Config(format!("Failed to read config: {e}")))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path.as_ref(), content)
            .map_err(|e| Error::Config(format!("Failed to write config: {e}")))?;

        Ok(())
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        if self.client.phone.is_empty() {
            return Err(Error::InvalidConfig(
                "Client phone number must not be empty".into(),
            ));
        }
        if self.client.phone.len() > 12 || !self.client.phone.chars().all(|c| c.is_ascii_digit()) {
            return Err(Error::InvalidConfig(
                "Client phone number must be at most 12 decimal digits".into(),
            ));
        }
        if self.server.max_connections == 0 {
            return Err(Error::InvalidConfig(
                "Server must allow at least one connection".into(),
            ));
        }
        Ok(())
    }
}

/// Platform configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Maximum concurrent terminal connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Deadline for the register/authenticate handshake.
    #[serde(default = "default_auth_timeout", with = "humantime_serde")]
    pub auth_timeout: Duration,

    /// Heartbeat interval assumed when the terminal never reported one.
    /// The idle cutoff is three times this value.
    #[serde(default = "default_heartbeat_interval", with = "humantime_serde")]
    pub default_heartbeat_interval: Duration,

    /// How long to wait for the per-fragment ack during an upgrade push.
    #[serde(default = "default_upgrade_ack_timeout", with = "humantime_serde")]
    pub upgrade_ack_timeout: Duration,

    /// Maximum payload bytes per upgrade fragment.
    #[serde(default = "default_upgrade_fragment_size")]
    pub upgrade_fragment_size: usize,
}

/// Terminal configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Platform address.
    #[serde(default = "default_remote_addr")]
    pub remote_addr: SocketAddr,

    /// Terminal phone number, up to 12 decimal digits.
    #[serde(default = "default_phone")]
    pub phone: String,

    /// Registration identity.
    #[serde(default)]
    pub register: RegisterConfig,

    /// Interval between periodic location reports.
    #[serde(default = "default_report_interval", with = "humantime_serde")]
    pub location_report_interval: Duration,

    /// TCP connect timeout.
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Deadline for each handshake response.
    #[serde(default = "default_response_timeout", with = "humantime_serde")]
    pub response_timeout: Duration,
}

/// Registration identity for the terminal.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegisterConfig {
    #[serde(default)]
    pub province_id: u16,
    #[serde(default)]
    pub city_id: u16,
    #[serde(default)]
    pub manufacturer_id: String,
    #[serde(default)]
    pub terminal_model: String,
    #[serde(default)]
    pub terminal_id: String,
    #[serde(default)]
    pub plate_color: u8,
    #[serde(default)]
    pub plate_number: String,
}

impl RegisterConfig {
    /// Convert to the wire-facing register info.
    pub fn to_register_info(&self) -> RegisterInfo {
        RegisterInfo {
            province_id: self.province_id,
            city_id: self.city_id,
            manufacturer_id: self.manufacturer_id.as_bytes().to_vec(),
            terminal_model: self.terminal_model.as_bytes().to_vec(),
            terminal_id: self.terminal_id.as_bytes().to_vec(),
            plate_color: PlateColor::from_u8(self.plate_color).unwrap_or_default(),
            plate_number: self.plate_number.clone(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log filter, e.g. "info" or "jt808=debug".
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_listen_addr() -> SocketAddr {
    "0.0.0.0:8808".parse().expect("static address")
}
fn default_remote_addr() -> SocketAddr {
    "127.0.0.1:8808".parse().expect("static address")
}
fn default_max_connections() -> usize {
    1024
}
fn default_auth_timeout() -> Duration {
    Duration::from_secs(10)
}
fn default_heartbeat_interval() -> Duration {
    Duration::from_secs(30)
}
fn default_upgrade_ack_timeout() -> Duration {
    Duration::from_secs(5)
}
fn default_upgrade_fragment_size() -> usize {
    512
}
fn default_phone() -> String {
    "13523339527".to_string()
}
fn default_report_interval() -> Duration {
    Duration::from_secs(30)
}
fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}
fn default_response_timeout() -> Duration {
    Duration::from_secs(5)
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            max_connections: default_max_connections(),
            auth_timeout: default_auth_timeout(),
            default_heartbeat_interval: default_heartbeat_interval(),
            upgrade_ack_timeout: default_upgrade_ack_timeout(),
            upgrade_fragment_size: default_upgrade_fragment_size(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            remote_addr: default_remote_addr(),
            phone: default_phone(),
            register: RegisterConfig::default(),
            location_report_interval: default_report_interval(),
            connect_timeout: default_connect_timeout(),
            response_timeout: default_response_timeout(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}
