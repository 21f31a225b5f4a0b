//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.
//!
//! Every section and field is optional; an absent file yields the defaults,
//! which match the field deployment (receiver on `/dev/ttyAMA0` at 9600
//! baud, collection service on `home.maxux.net:5555`).

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::backlog::BacklogFormat;
use crate::error::{CourierError, Result};

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub endpoint: EndpointConfig,
    #[serde(default)]
    pub bundle: BundleConfig,
    #[serde(default)]
    pub backlog: BacklogConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Serial port configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SerialConfig {
    #[serde(default = "default_serial_port")]
    pub port: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    #[serde(default = "default_hardware_flow_control")]
    pub hardware_flow_control: bool,

    #[serde(default = "default_max_line_length")]
    pub max_line_length: usize,
}

/// Collection service configuration
#[derive(Debug, Deserialize, Clone)]
pub struct EndpointConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_ping_path")]
    pub ping_path: String,

    #[serde(default = "default_session_path")]
    pub session_path: String,

    #[serde(default = "default_push_path")]
    pub push_path: String,

    #[serde(default = "default_protocol_version")]
    pub protocol_version: String,

    #[serde(default = "default_pong_prefix")]
    pub pong_prefix: String,

    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,

    #[serde(default = "default_max_response_size")]
    pub max_response_size: usize,
}

/// Bundle configuration
#[derive(Debug, Deserialize, Clone)]
pub struct BundleConfig {
    #[serde(default = "default_bundle_capacity")]
    pub capacity: usize,

    #[serde(default = "default_sentinel")]
    pub sentinel: char,

    #[serde(default = "default_flush_tag")]
    pub flush_tag: String,
}

/// Local backlog configuration
#[derive(Debug, Deserialize, Clone)]
pub struct BacklogConfig {
    #[serde(default = "default_backlog_enabled")]
    pub enabled: bool,

    #[serde(default = "default_backlog_dir")]
    pub dir: String,

    #[serde(default = "default_backlog_prefix")]
    pub prefix: String,

    #[serde(default = "default_backlog_format")]
    pub format: BacklogFormat,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone, Default)]
pub struct LoggingConfig {
    /// Directory for a daily rolling log file, stdout when unset
    #[serde(default)]
    pub dir: Option<String>,
}

// Default value functions
fn default_serial_port() -> String { crate::serial::DEFAULT_DEVICE_PATH.to_string() }
fn default_baud_rate() -> u32 { crate::serial::NMEA_BAUD_RATE }
fn default_hardware_flow_control() -> bool { true }
fn default_max_line_length() -> usize { crate::serial::reassembler::DEFAULT_MAX_LINE_LENGTH }

fn default_host() -> String { "home.maxux.net".to_string() }
fn default_port() -> u16 { 5555 }
fn default_ping_path() -> String { "/api/ping".to_string() }
fn default_session_path() -> String { "/api/push/session".to_string() }
fn default_push_path() -> String { "/api/push/datapoint".to_string() }
fn default_protocol_version() -> String { crate::transport::protocol::DEFAULT_PROTOCOL_VERSION.to_string() }
fn default_pong_prefix() -> String { "{\"pong\"".to_string() }
fn default_retry_interval_ms() -> u64 { 1000 }
fn default_max_response_size() -> usize { 8192 }

fn default_bundle_capacity() -> usize { crate::bundle::DEFAULT_BUNDLE_CAPACITY }
fn default_sentinel() -> char { '$' }
fn default_flush_tag() -> String { "$GPRMC".to_string() }

fn default_backlog_enabled() -> bool { true }
fn default_backlog_dir() -> String { "/mnt/backlog".to_string() }
fn default_backlog_prefix() -> String { "gps".to_string() }
fn default_backlog_format() -> BacklogFormat { BacklogFormat::Raw }

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: default_serial_port(),
            baud_rate: default_baud_rate(),
            hardware_flow_control: default_hardware_flow_control(),
            max_line_length: default_max_line_length(),
        }
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            ping_path: default_ping_path(),
            session_path: default_session_path(),
            push_path: default_push_path(),
            protocol_version: default_protocol_version(),
            pong_prefix: default_pong_prefix(),
            retry_interval_ms: default_retry_interval_ms(),
            max_response_size: default_max_response_size(),
        }
    }
}

impl Default for BundleConfig {
    fn default() -> Self {
        Self {
            capacity: default_bundle_capacity(),
            sentinel: default_sentinel(),
            flush_tag: default_flush_tag(),
        }
    }
}

impl Default for BacklogConfig {
    fn default() -> Self {
        Self {
            enabled: default_backlog_enabled(),
            dir: default_backlog_dir(),
            prefix: default_backlog_prefix(),
            format: default_backlog_format(),
        }
    }
}

fn invalid(message: impl std::fmt::Display) -> CourierError {
    CourierError::Config(toml::de::Error::custom(message))
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use nmea_courier::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn parse(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        if self.serial.port.is_empty() {
            return Err(invalid("serial port cannot be empty"));
        }

        if ![4800, 9600, 19200, 38400, 57600, 115200].contains(&self.serial.baud_rate) {
            return Err(invalid(
                "baud_rate must be one of: 4800, 9600, 19200, 38400, 57600, 115200",
            ));
        }

        if self.serial.max_line_length == 0 || self.serial.max_line_length > 65536 {
            return Err(invalid("max_line_length must be between 1 and 65536"));
        }

        if self.endpoint.host.is_empty() {
            return Err(invalid("endpoint host cannot be empty"));
        }

        if self.endpoint.port == 0 {
            return Err(invalid("endpoint port must be greater than 0"));
        }

        for (name, path) in [
            ("ping_path", &self.endpoint.ping_path),
            ("session_path", &self.endpoint.session_path),
            ("push_path", &self.endpoint.push_path),
        ] {
            if !path.starts_with('/') {
                return Err(invalid(format!("{} must start with '/'", name)));
            }
        }

        if self.endpoint.protocol_version.is_empty()
            || self.endpoint.protocol_version.contains(char::is_whitespace)
        {
            return Err(invalid("protocol_version must be a single non-empty token"));
        }

        if self.endpoint.retry_interval_ms == 0 || self.endpoint.retry_interval_ms > 60000 {
            return Err(invalid("retry_interval_ms must be between 1 and 60000"));
        }

        if self.endpoint.max_response_size == 0 {
            return Err(invalid("max_response_size must be greater than 0"));
        }

        // A bundle must hold at least one line of maximum length
        if self.bundle.capacity <= self.serial.max_line_length {
            return Err(invalid("bundle capacity must exceed max_line_length"));
        }

        if !self.bundle.flush_tag.starts_with(self.bundle.sentinel) {
            return Err(invalid("flush_tag must start with the sentinel character"));
        }

        if self.backlog.enabled && self.backlog.dir.is_empty() {
            return Err(invalid("backlog dir cannot be empty when enabled"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());

        assert_eq!(config.serial.port, "/dev/ttyAMA0");
        assert_eq!(config.serial.baud_rate, 9600);
        assert_eq!(config.endpoint.host, "home.maxux.net");
        assert_eq!(config.endpoint.port, 5555);
        assert_eq!(config.endpoint.pong_prefix, "{\"pong\"");
        assert_eq!(config.bundle.capacity, 8192);
        assert_eq!(config.bundle.sentinel, '$');
        assert_eq!(config.bundle.flush_tag, "$GPRMC");
        assert_eq!(config.backlog.dir, "/mnt/backlog");
        assert!(config.logging.dir.is_none());
    }

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.endpoint.push_path, "/api/push/datapoint");
        assert_eq!(config.endpoint.retry_interval_ms, 1000);
    }

    #[test]
    fn test_load_config_from_file() {
        use std::io::Write;
        use tempfile::NamedTempFile;

        let toml_content = r#"
[serial]
port = "/dev/ttyUSB0"
baud_rate = 4800

[endpoint]
host = "10.241.0.18"
retry_interval_ms = 250

[bundle]
flush_tag = "$GNRMC"

[backlog]
enabled = false
format = "jsonl"
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();
        temp_file.flush().unwrap();

        let config = Config::load(temp_file.path()).unwrap();
        assert_eq!(config.serial.port, "/dev/ttyUSB0");
        assert_eq!(config.serial.baud_rate, 4800);
        assert_eq!(config.endpoint.host, "10.241.0.18");
        assert_eq!(config.endpoint.port, 5555);
        assert_eq!(config.endpoint.retry_interval_ms, 250);
        assert_eq!(config.bundle.flush_tag, "$GNRMC");
        assert!(!config.backlog.enabled);
        assert_eq!(config.backlog.format, BacklogFormat::JsonLines);
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let result = Config::load("/nonexistent/courier.toml");
        assert!(matches!(result, Err(CourierError::Io(_))));
    }

    #[test]
    fn test_malformed_toml_is_config_error() {
        let result = Config::parse("[serial\nport = 1");
        assert!(matches!(result, Err(CourierError::Config(_))));
    }

    #[test]
    fn test_invalid_baud_rate() {
        let mut config = Config::default();
        config.serial.baud_rate = 420000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_retry_interval() {
        let mut config = Config::default();
        config.endpoint.retry_interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_path_without_leading_slash() {
        let mut config = Config::default();
        config.endpoint.ping_path = "api/ping".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("ping_path"));
    }

    #[test]
    fn test_protocol_version_with_whitespace() {
        let mut config = Config::default();
        config.endpoint.protocol_version = "HTTP/1.0\r\nX: y".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bundle_smaller_than_line_limit() {
        let mut config = Config::default();
        config.bundle.capacity = 1024;
        config.serial.max_line_length = 2048;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_flush_tag_must_carry_sentinel() {
        let mut config = Config::default();
        config.bundle.flush_tag = "GPRMC".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_backlog_format() {
        let result = Config::parse("[backlog]\nformat = \"csv\"\n");
        assert!(matches!(result, Err(CourierError::Config(_))));
    }

    #[test]
    fn test_backlog_format_names() {
        let raw = Config::parse("[backlog]\nformat = \"raw\"\n").unwrap();
        assert_eq!(raw.backlog.format, BacklogFormat::Raw);
        assert_eq!(Config::default().backlog.format, BacklogFormat::Raw);
    }

    #[test]
    fn test_disabled_backlog_may_have_empty_dir() {
        let mut config = Config::default();
        config.backlog.enabled = false;
        config.backlog.dir = String::new();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_logging_dir() {
        let config = Config::parse("[logging]\ndir = \"/var/log/courier\"\n").unwrap();
        assert_eq!(config.logging.dir.as_deref(), Some("/var/log/courier"));
    }
}
