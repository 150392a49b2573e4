//! Daemon connection lifecycle
//!
//! `Connection` owns the channel driver for the lifetime of an engine. It
//! configures every registered channel at startup, applies output polarity
//! to each write, mirrors the last committed intensity per channel, and
//! guarantees that shutdown (every channel to zero, connection released)
//! runs exactly once.
//!
//! The committed-value mirror is shared through [`CommittedValues`], so it
//! can be read while another thread holds the connection for a run.
//!
//! # Cleanup guarantee
//! `shutdown` is normally called by the owner when the engine is retired.
//! If the connection is dropped without it (early return, panic unwinding),
//! `Drop` runs the same shutdown.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, error, info, warn};

use crate::channel::{ChannelDriver, ChannelError, ChannelId};
use crate::registry::DeviceRegistry;
use crate::types::{MAX_INTENSITY, Polarity};

/// Last committed logical intensity per channel, shared between threads
#[derive(Debug, Clone, Default)]
pub struct CommittedValues {
    values: Arc<Mutex<HashMap<ChannelId, u8>>>,
}

impl CommittedValues {
    /// Last committed value of `channel`, if it was ever written
    pub fn get(&self, channel: ChannelId) -> Option<u8> {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&channel)
            .copied()
    }

    fn record(&self, channel: ChannelId, intensity: u8) {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(channel, intensity);
    }
}

/// RAII owner of the daemon connection
pub struct Connection {
    driver: Box<dyn ChannelDriver>,
    polarity: Polarity,
    /// Channels configured at startup, in registry order
    channels: Vec<ChannelId>,
    /// Last successfully committed logical intensity per channel
    committed: CommittedValues,
    /// Whether shutdown has already run (prevents double cleanup)
    shutdown_done: bool,
    /// Set once the driver reports the connection gone
    lost: bool,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("driver", &self.driver.describe())
            .field("polarity", &self.polarity)
            .field("channels", &self.channels)
            .field("shutdown_done", &self.shutdown_done)
            .field("lost", &self.lost)
            .finish()
    }
}

impl Connection {
    /// Take ownership of a connected driver
    pub fn new(driver: Box<dyn ChannelDriver>, polarity: Polarity) -> Self {
        Self {
            driver,
            polarity,
            channels: Vec::new(),
            committed: CommittedValues::default(),
            shutdown_done: false,
            lost: false,
        }
    }

    /// Configure every registered channel as a 0-255 output and stop it.
    ///
    /// Runs once at startup; the channels configured here are the ones
    /// zeroed by [`Connection::shutdown`].
    pub fn initialize_channels(&mut self, registry: &DeviceRegistry) -> Result<(), ChannelError> {
        for device in registry.devices() {
            if self.channels.contains(&device.channel) {
                debug!(
                    "{} shares channel {}, already initialized",
                    device.display_name, device.channel
                );
                continue;
            }
            self.driver.configure_output(device.channel)?;
            self.channels.push(device.channel);
            self.write(device.channel, 0)?;
            info!(
                "Initialized {} on channel {} ({})",
                device.display_name, device.channel, self.polarity
            );
        }
        Ok(())
    }

    /// Commit a logical intensity to a channel.
    pub fn write(&mut self, channel: ChannelId, intensity: u8) -> Result<(), ChannelError> {
        if self.shutdown_done {
            return Err(ChannelError::Released);
        }
        let duty = self.polarity.apply(intensity);
        match self.driver.set_duty(channel, duty) {
            Ok(()) => {
                debug!(
                    "channel {} <- {}/{} (physical {})",
                    channel, intensity, MAX_INTENSITY, duty
                );
                self.committed.record(channel, intensity);
                Ok(())
            }
            Err(e) => {
                if e.is_connection_lost() {
                    self.lost = true;
                }
                Err(e)
            }
        }
    }

    /// Last committed logical intensity of `channel`
    pub fn committed(&self, channel: ChannelId) -> Option<u8> {
        self.committed.get(channel)
    }

    /// Handle on the committed-value mirror that outlives a borrow of `self`
    pub fn committed_values(&self) -> CommittedValues {
        self.committed.clone()
    }

    /// True once the driver has reported the connection gone
    pub fn is_lost(&self) -> bool {
        self.lost
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown_done
    }

    pub fn polarity(&self) -> Polarity {
        self.polarity
    }

    /// Force every configured channel to zero and release the connection.
    ///
    /// Only the first call does anything. Zeroing is best effort: a failed
    /// write does not stop the remaining channels unless the connection
    /// itself is gone. The first error is returned, so a lost connection
    /// is always an error here even when no write was attempted.
    pub fn shutdown(&mut self) -> Result<(), ChannelError> {
        if self.shutdown_done {
            debug!("Shutdown already done, skipping");
            return Ok(());
        }

        info!("Cleaning up: stopping {} channel(s)", self.channels.len());
        let mut first_error = None;
        let mut unzeroed = Vec::new();

        for channel in self.channels.clone() {
            if self.lost {
                unzeroed.push(channel);
                continue;
            }
            match self.write(channel, 0) {
                Ok(()) => debug!("Stopped channel {}", channel),
                Err(e) => {
                    warn!("Failed to stop channel {}: {}", channel, e);
                    unzeroed.push(channel);
                    first_error.get_or_insert(e);
                }
            }
        }

        if self.lost {
            error!(
                "Connection lost; channel(s) {:?} may still be driven",
                unzeroed
            );
            first_error.get_or_insert(ChannelError::Disconnected {
                reason: format!(
                    "connection lost before channel(s) {:?} were stopped",
                    unzeroed
                ),
            });
        }

        self.shutdown_done = true;
        match self.driver.release() {
            Ok(()) | Err(ChannelError::Released) => {}
            Err(e) => {
                warn!("Failed to release {}: {}", self.driver.describe(), e);
                first_error.get_or_insert(e);
            }
        }
        info!("Released {}", self.driver.describe());

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if !self.shutdown_done {
            debug!("Connection dropped without shutdown, cleaning up");
            if let Err(e) = self.shutdown() {
                error!("Cleanup on drop failed: {}", e);
            }
        }
    }
}
