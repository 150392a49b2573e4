//! Settings file handling.
//!
//! The settings file names the devices of the appliance, the channel each
//! one is wired to, and where the pigpio daemon lives:
//!
//! ```yaml
//! settings:
//!   gpio:
//!     Steam: 17
//!     Hotwater: 27
//!     Vacuum: 22
//!   daemon:
//!     host: 10.10.23.231
//!     port: 8888
//!   polarity: active_high
//! ```
//!
//! Device order in `gpio` is kept; it is the order of `All` fan-outs.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_yaml::Value;

use crate::channel::ChannelId;
use crate::error::ConfigError;
use crate::types::Polarity;

/// Default settings path, relative to the working directory
pub const DEFAULT_SETTINGS_PATH: &str = "config/settings.yaml";

/// Default pigpiod TCP port
pub const DEFAULT_DAEMON_PORT: u16 = 8888;

/// Highest GPIO number pigpio accepts
pub const MAX_CHANNEL_ID: ChannelId = 53;

/// Where to reach the pigpio daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonEndpoint {
    pub host: String,
    pub port: u16,
    /// Connect and per-command timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for DaemonEndpoint {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_DAEMON_PORT,
            timeout_ms: 3000,
        }
    }
}

impl DaemonEndpoint {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl std::fmt::Display for DaemonEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Engine settings loaded once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Device display name and channel, in file order
    pub gpio: Vec<(String, ChannelId)>,
    pub daemon: DaemonEndpoint,
    pub polarity: Polarity,
}

/// Shape of the `settings:` block before the device table is checked.
#[derive(Debug, Deserialize)]
struct RawFile {
    settings: Option<RawSettings>,
}

#[derive(Debug, Deserialize)]
struct RawSettings {
    gpio: Option<Value>,
    #[serde(default)]
    daemon: DaemonEndpoint,
    #[serde(default)]
    polarity: Polarity,
}

impl Settings {
    /// Load settings from a YAML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(&path).map_err(|source| ConfigError::Missing {
            path: path.as_ref().to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }

    /// Parse settings from YAML text
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let raw: RawFile =
            serde_yaml::from_str(content).map_err(|e| ConfigError::Malformed(e.to_string()))?;

        let settings = raw
            .settings
            .ok_or_else(|| ConfigError::Malformed("missing `settings` section".to_string()))?;
        let gpio = settings
            .gpio
            .ok_or_else(|| ConfigError::Malformed("missing `settings.gpio` section".to_string()))?;

        Ok(Self {
            gpio: parse_gpio_table(&gpio)?,
            daemon: settings.daemon,
            polarity: settings.polarity,
        })
    }
}

/// Turn the `gpio` mapping into ordered (name, channel) pairs.
fn parse_gpio_table(value: &Value) -> Result<Vec<(String, ChannelId)>, ConfigError> {
    let mapping = value
        .as_mapping()
        .ok_or_else(|| ConfigError::Malformed("`settings.gpio` must be a mapping".to_string()))?;

    let mut pairs = Vec::with_capacity(mapping.len());
    for (key, val) in mapping {
        let name = key
            .as_str()
            .ok_or_else(|| ConfigError::Malformed(format!("device name {:?} is not a string", key)))?;
        let channel = val
            .as_u64()
            .and_then(|n| ChannelId::try_from(n).ok())
            .ok_or_else(|| {
                ConfigError::Malformed(format!(
                    "channel for device {} must be a non-negative integer, got {:?}",
                    name, val
                ))
            })?;
        pairs.push((name.to_string(), channel));
    }
    Ok(pairs)
}
