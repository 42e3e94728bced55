// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bridge configuration.
//!
//! Supports both programmatic and file-based configuration.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// Default serial device.
pub const DEFAULT_SERIAL_PATH: &str = "/dev/ttyACM0";

/// Default TCP port for the client-facing server.
pub const DEFAULT_PORT: u16 = 8088;

/// Conventional port for a broadcast server running next to a single-client
/// server on [`DEFAULT_PORT`].
pub const DEFAULT_SHARED_BROADCAST_PORT: u16 = 8089;

/// Line sent to every client before any relayed traffic.
pub const DEFAULT_GREETING: &str = "Hi, you are connected";

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

/// Top-level bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Bridge name (for identification in logs).
    #[serde(default = "default_bridge_name")]
    pub name: String,

    /// Serial side.
    #[serde(default)]
    pub serial: SerialConfig,

    /// Network side.
    #[serde(default)]
    pub server: ServerConfig,

    /// Statistics reporting interval (seconds, 0 disables).
    #[serde(default = "default_stats_interval")]
    pub stats_interval_secs: u64,

    /// Log level.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_bridge_name() -> String {
    "tether-bridge".to_string()
}

fn default_stats_interval() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            name: default_bridge_name(),
            serial: SerialConfig::default(),
            server: ServerConfig::default(),
            stats_interval_secs: default_stats_interval(),
            log_level: default_log_level(),
        }
    }
}

impl BridgeConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.serial.validate()?;
        self.server.validate()
    }

    /// Log filter built from `log_level`, `info` if it does not parse.
    pub fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_new(&self.log_level).unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

/// Serial port parity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
}

/// Serial side configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Device path, e.g. `/dev/ttyACM0` or `COM3`.
    #[serde(default = "default_serial_path")]
    pub path: String,

    /// Baud rate.
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Data bits (5-8).
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,

    /// Parity.
    #[serde(default)]
    pub parity: Parity,

    /// Stop bits (1 or 2).
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,

    /// Packet delimiter. Must be a single ASCII character.
    #[serde(default = "default_delimiter")]
    pub delimiter: char,

    /// Packet assembly timeout (milliseconds).
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Read timeout of the serial I/O loop (milliseconds).
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_serial_path() -> String {
    DEFAULT_SERIAL_PATH.to_string()
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_data_bits() -> u8 {
    8
}

fn default_stop_bits() -> u8 {
    1
}

fn default_delimiter() -> char {
    char::from(crate::framer::DEFAULT_DELIMITER)
}

fn default_timeout_ms() -> u64 {
    10
}

fn default_poll_interval_ms() -> u64 {
    1
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            path: default_serial_path(),
            baud_rate: default_baud_rate(),
            data_bits: default_data_bits(),
            parity: Parity::None,
            stop_bits: default_stop_bits(),
            delimiter: default_delimiter(),
            timeout_ms: default_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl SerialConfig {
    /// Config for a device path with default settings.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Set the baud rate.
    pub fn baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    /// Set the packet delimiter.
    pub fn delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = delimiter;
        self
    }

    /// Set the packet assembly timeout.
    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Delimiter as a byte.
    pub fn delimiter_byte(&self) -> Result<u8, ConfigError> {
        u8::try_from(self.delimiter)
            .ok()
            .filter(u8::is_ascii)
            .ok_or_else(|| {
                ConfigError::Invalid(format!(
                    "Delimiter {:?} is not a single ASCII character",
                    self.delimiter
                ))
            })
    }

    /// Packet assembly timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Read timeout of the serial I/O loop.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Validate the serial settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.path.is_empty() {
            return Err(ConfigError::Invalid("Serial path is empty".into()));
        }
        if self.baud_rate == 0 {
            return Err(ConfigError::Invalid("Baud rate must be positive".into()));
        }
        if !(5..=8).contains(&self.data_bits) {
            return Err(ConfigError::Invalid(format!(
                "Data bits must be 5-8, got {}",
                self.data_bits
            )));
        }
        if !matches!(self.stop_bits, 1 | 2) {
            return Err(ConfigError::Invalid(format!(
                "Stop bits must be 1 or 2, got {}",
                self.stop_bits
            )));
        }
        if self.timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "Packet timeout must be at least 1 ms".into(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "Poll interval must be at least 1 ms".into(),
            ));
        }
        self.delimiter_byte()?;
        Ok(())
    }
}

/// How the network side serves clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerMode {
    /// One client at a time; the next client is accepted after a disconnect.
    #[default]
    Single,
    /// Any number of clients; serial packets are broadcast to all of them.
    Broadcast,
}

impl FromStr for ServerMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "single" => Ok(Self::Single),
            "broadcast" | "multi" => Ok(Self::Broadcast),
            other => Err(ConfigError::Invalid(format!(
                "Unknown server mode '{}' (expected single or broadcast)",
                other
            ))),
        }
    }
}

impl std::fmt::Display for ServerMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Single => write!(f, "single"),
            Self::Broadcast => write!(f, "broadcast"),
        }
    }
}

/// Network side configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Client handling mode.
    #[serde(default)]
    pub mode: ServerMode,

    /// Address to bind to (default: 0.0.0.0).
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,

    /// TCP port to listen on (default: 8088).
    #[serde(default = "default_port")]
    pub port: u16,

    /// Greeting line sent to each client on connect.
    #[serde(default = "default_greeting")]
    pub greeting: String,
}

fn default_bind_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_greeting() -> String {
    DEFAULT_GREETING.to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            mode: ServerMode::Single,
            bind_address: default_bind_address(),
            port: default_port(),
            greeting: default_greeting(),
        }
    }
}

impl ServerConfig {
    /// Socket address to listen on.
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }

    /// Validate the server settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.greeting.contains('\n') {
            return Err(ConfigError::Invalid(
                "Greeting must be a single line".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = BridgeConfig::default();
        assert_eq!(config.serial.path, "/dev/ttyACM0");
        assert_eq!(config.serial.baud_rate, 9600);
        assert_eq!(config.serial.delimiter_byte().expect("ascii"), b'*');
        assert_eq!(config.serial.timeout(), Duration::from_millis(10));
        assert_eq!(config.server.port, 8088);
        assert_eq!(config.server.mode, ServerMode::Single);
        assert_eq!(config.server.greeting, "Hi, you are connected");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config = BridgeConfig::from_toml("").expect("parse");
        assert_eq!(config.name, "tether-bridge");
        assert_eq!(config.server.listen_addr().port(), DEFAULT_PORT);
    }

    #[test]
    fn test_partial_toml() {
        let config = BridgeConfig::from_toml(
            r##"
            name = "bench"

            [serial]
            path = "/dev/ttyUSB1"
            baud_rate = 115200
            delimiter = "#"
            parity = "even"

            [server]
            mode = "broadcast"
            port = 8089
            "##,
        )
        .expect("parse");

        assert_eq!(config.name, "bench");
        assert_eq!(config.serial.path, "/dev/ttyUSB1");
        assert_eq!(config.serial.baud_rate, 115200);
        assert_eq!(config.serial.delimiter_byte().expect("ascii"), b'#');
        assert_eq!(config.serial.parity, Parity::Even);
        assert_eq!(config.serial.timeout_ms, 10);
        assert_eq!(config.server.mode, ServerMode::Broadcast);
        assert_eq!(config.server.port, DEFAULT_SHARED_BROADCAST_PORT);
    }

    #[test]
    fn test_log_level_drives_filter() {
        use tracing_subscriber::filter::LevelFilter;

        let config = BridgeConfig::from_toml("log_level = \"debug\"").expect("parse");
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.env_filter().max_level_hint(), Some(LevelFilter::DEBUG));

        let default = BridgeConfig::default();
        assert_eq!(default.env_filter().max_level_hint(), Some(LevelFilter::INFO));
    }

    #[test]
    fn test_non_ascii_delimiter_rejected() {
        let serial = SerialConfig::default().delimiter('§');
        assert!(serial.delimiter_byte().is_err());
        assert!(serial.validate().is_err());
    }

    #[test]
    fn test_serial_validation() {
        assert!(SerialConfig::default().timeout_ms(0).validate().is_err());
        assert!(SerialConfig::default().baud_rate(0).validate().is_err());
        assert!(SerialConfig::new("").validate().is_err());

        let mut serial = SerialConfig::default();
        serial.data_bits = 9;
        assert!(serial.validate().is_err());

        let mut serial = SerialConfig::default();
        serial.stop_bits = 3;
        assert!(serial.validate().is_err());
    }

    #[test]
    fn test_multiline_greeting_rejected() {
        let server = ServerConfig {
            greeting: "hello\nworld".into(),
            ..Default::default()
        };
        assert!(server.validate().is_err());
    }

    #[test]
    fn test_server_mode_from_str() {
        assert_eq!("single".parse::<ServerMode>().ok(), Some(ServerMode::Single));
        assert_eq!(
            "Broadcast".parse::<ServerMode>().ok(),
            Some(ServerMode::Broadcast)
        );
        assert_eq!("multi".parse::<ServerMode>().ok(), Some(ServerMode::Broadcast));
        assert!("both".parse::<ServerMode>().is_err());
    }

    #[test]
    fn test_config_serialization() {
        let config = BridgeConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        assert!(toml_str.contains("path = \"/dev/ttyACM0\""));
        assert!(toml_str.contains("mode = \"single\""));
        assert!(toml_str.contains("port = 8088"));

        let parsed = BridgeConfig::from_toml(&toml_str).expect("reparse");
        assert_eq!(parsed.serial.delimiter, '*');
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(file, "[serial]\npath = \"COM3\"\ntimeout_ms = 25").expect("write");

        let config = BridgeConfig::from_file(file.path()).expect("load");
        assert_eq!(config.serial.path, "COM3");
        assert_eq!(config.serial.timeout(), Duration::from_millis(25));
    }

    #[test]
    fn test_from_file_invalid() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(file, "[serial]\nstop_bits = 4").expect("write");
        assert!(matches!(
            BridgeConfig::from_file(file.path()),
            Err(ConfigError::Invalid(_))
        ));
    }
}
