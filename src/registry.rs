//! Device registry: device name to channel mapping.
//!
//! Built once from settings and never modified. Lookups are
//! case-insensitive; the reserved name `all` selects every device in
//! registry order.

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::channel::ChannelId;
use crate::config_file::{MAX_CHANNEL_ID, Settings};
use crate::error::{ConfigError, StepError};
use crate::sequence::DeviceRef;

/// Name reserved for the fan-out selector
pub const ALL_DEVICES: &str = "all";

/// One registered device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    /// Name as written in the settings file
    pub display_name: String,
    /// Lowercased lookup key
    pub key: String,
    pub channel: ChannelId,
}

/// Immutable, ordered device table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRegistry {
    devices: Vec<Device>,
}

impl DeviceRegistry {
    /// Build the registry from loaded settings
    pub fn load(settings: &Settings) -> Result<Self, ConfigError> {
        Self::from_pairs(settings.gpio.iter().map(|(n, c)| (n.as_str(), *c)))
    }

    /// Build the registry from (name, channel) pairs in order
    pub fn from_pairs<'a, I>(pairs: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (&'a str, ChannelId)>,
    {
        let mut devices = Vec::new();
        let mut keys = HashSet::new();
        let mut channels = HashSet::new();

        for (name, channel) in pairs {
            let display_name = name.trim().to_string();
            let key = display_name.to_lowercase();

            if key.is_empty() {
                return Err(ConfigError::Invalid("device name cannot be empty".to_string()));
            }
            if key == ALL_DEVICES {
                return Err(ConfigError::Invalid(format!(
                    "device name {:?} is reserved for the all-devices selector",
                    display_name
                )));
            }
            if channel > MAX_CHANNEL_ID {
                return Err(ConfigError::Invalid(format!(
                    "channel {} for {} is out of range (0-{})",
                    channel, display_name, MAX_CHANNEL_ID
                )));
            }
            if !keys.insert(key.clone()) {
                return Err(ConfigError::Invalid(format!(
                    "device {} is listed more than once",
                    display_name
                )));
            }
            if !channels.insert(channel) {
                warn!(
                    "Channel {} is shared: {} drives the same output as an earlier device",
                    channel, display_name
                );
            }

            debug!("Registered {} on channel {}", display_name, channel);
            devices.push(Device {
                display_name,
                key,
                channel,
            });
        }

        if devices.is_empty() {
            return Err(ConfigError::Invalid("no devices configured".to_string()));
        }

        Ok(Self { devices })
    }

    /// Resolve a device reference to the devices it addresses.
    ///
    /// A concrete name yields one device; `All` yields every device in
    /// registry order.
    pub fn resolve(&self, device: &DeviceRef) -> Result<Vec<&Device>, StepError> {
        match device {
            DeviceRef::All => Ok(self.devices.iter().collect()),
            DeviceRef::Named(name) => self
                .get(name)
                .map(|d| vec![d])
                .ok_or_else(|| StepError::UnknownDevice { name: name.clone() }),
        }
    }

    /// Case-insensitive lookup of a single device
    pub fn get(&self, name: &str) -> Option<&Device> {
        let key = name.trim().to_lowercase();
        self.devices.iter().find(|d| d.key == key)
    }

    /// All devices in registry order
    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    /// All channel ids in registry order
    pub fn channels(&self) -> impl Iterator<Item = ChannelId> + '_ {
        self.devices.iter().map(|d| d.channel)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}
