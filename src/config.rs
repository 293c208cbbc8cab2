use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const PLACEHOLDER_EMAIL: &str = "bogus@example.com";
pub const PLACEHOLDER_SERVER: &str = "mailrelay.example.com";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_devices")]
    pub devices: Vec<String>,
    #[serde(default = "default_threshold_percent")]
    pub threshold_percent: u32,
    #[serde(default)]
    pub probe: ProbeConfig,
    #[serde(default)]
    pub holddown: HolddownConfig,
    #[serde(default)]
    pub email: EmailConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProbeConfig {
    #[serde(default = "default_probe_command")]
    pub command: String,
    #[serde(default = "default_probe_args")]
    pub args: Vec<String>,
    #[serde(default = "default_marker")]
    pub marker: String,
    /// Marker lines at or above this length are ignored. Empirical cut-off that keeps
    /// long property dumps containing the marker out of the readings.
    #[serde(default = "default_max_line_len")]
    pub max_line_len: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HolddownConfig {
    #[serde(default = "default_lock_file")]
    pub lock_file: PathBuf,
    #[serde(default = "default_window")]
    pub window: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmailConfig {
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub server: Option<String>,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
}

/// Fully resolved mail settings. The address is used as both sender and recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailSettings {
    pub address: String,
    pub server: String,
    pub port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            devices: default_devices(),
            threshold_percent: default_threshold_percent(),
            probe: ProbeConfig::default(),
            holddown: HolddownConfig::default(),
            email: EmailConfig::default(),
        }
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            command: default_probe_command(),
            args: default_probe_args(),
            marker: default_marker(),
            max_line_len: default_max_line_len(),
        }
    }
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            address: None,
            server: None,
            port: default_smtp_port(),
        }
    }
}

impl Default for HolddownConfig {
    fn default() -> Self {
        Self {
            lock_file: default_lock_file(),
            window: default_window(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse YAML in {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
    #[error("invalid config: {0}")]
    Validation(String),
}

impl Config {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let path_display = path_ref.display().to_string();
        let text = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_display.clone(),
            source,
        })?;

        let cfg: Config = serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path_display,
            source,
        })?;

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_devices(&self.devices)?;
        if self.threshold_percent > 100 {
            return Err(ConfigError::Validation(
                "threshold_percent must be in range 0..100".to_string(),
            ));
        }
        validate_probe(&self.probe)?;
        self.holddown.window()?;
        if self.holddown.lock_file.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "holddown.lock_file must not be empty".to_string(),
            ));
        }
        if self.email.port == 0 {
            return Err(ConfigError::Validation(
                "email.port must be in range 1..65535".to_string(),
            ));
        }

        Ok(())
    }

    pub fn example_yaml() -> &'static str {
        include_str!("../config.yaml.example")
    }
}

impl HolddownConfig {
    pub fn window(&self) -> Result<Duration, ConfigError> {
        let window = humantime::parse_duration(self.window.trim()).map_err(|err| {
            ConfigError::Validation(format!(
                "holddown.window '{}' is not a duration: {err}",
                self.window
            ))
        })?;
        if window.is_zero() {
            return Err(ConfigError::Validation(
                "holddown.window must be > 0".to_string(),
            ));
        }
        Ok(window)
    }
}

impl EmailConfig {
    /// Both the address and the relay must be present; a half-configured mailer is
    /// treated the same as an unconfigured one.
    pub fn resolve(&self) -> Option<EmailSettings> {
        let address = non_blank(self.address.as_deref())?;
        let server = non_blank(self.server.as_deref())?;
        Some(EmailSettings {
            address,
            server,
            port: self.port,
        })
    }
}

impl EmailSettings {
    pub fn placeholder(port: u16) -> Self {
        Self {
            address: PLACEHOLDER_EMAIL.to_string(),
            server: PLACEHOLDER_SERVER.to_string(),
            port,
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn validate_devices(devices: &[String]) -> Result<(), ConfigError> {
    if devices.is_empty() {
        return Err(ConfigError::Validation(
            "devices must list at least one device".to_string(),
        ));
    }
    let mut names = HashSet::new();
    for device in devices {
        if device.trim().is_empty() {
            return Err(ConfigError::Validation(
                "devices[*] must not be empty".to_string(),
            ));
        }
        if !names.insert(device.as_str()) {
            return Err(ConfigError::Validation(format!(
                "device '{device}' is listed more than once"
            )));
        }
    }
    Ok(())
}

fn validate_probe(cfg: &ProbeConfig) -> Result<(), ConfigError> {
    if cfg.command.trim().is_empty() {
        return Err(ConfigError::Validation(
            "probe.command must not be empty".to_string(),
        ));
    }
    if cfg.marker.is_empty() {
        return Err(ConfigError::Validation(
            "probe.marker must not be empty".to_string(),
        ));
    }
    if cfg.max_line_len == 0 {
        return Err(ConfigError::Validation(
            "probe.max_line_len must be > 0".to_string(),
        ));
    }
    Ok(())
}

fn default_devices() -> Vec<String> {
    vec![
        "AppleBluetoothHIDKeyboard".to_string(),
        "BNBTrackpadDevice".to_string(),
    ]
}

const fn default_threshold_percent() -> u32 {
    40
}

fn default_probe_command() -> String {
    "/usr/sbin/ioreg".to_string()
}

fn default_probe_args() -> Vec<String> {
    vec!["-c".to_string()]
}

fn default_marker() -> String {
    "BatteryPercent".to_string()
}

const fn default_max_line_len() -> usize {
    80
}

fn default_lock_file() -> PathBuf {
    PathBuf::from("/tmp/BatteryPercentage.lock")
}

fn default_window() -> String {
    "12h".to_string()
}

const fn default_smtp_port() -> u16 {
    25
}
