//! Hardware channel interface
//!
//! `ChannelDriver` is the seam between the executor and the hardware. The
//! pigpio socket client in [`crate::daemon`] implements it for real
//! appliances; [`MemoryDriver`] implements it in memory for `--dry-run` and
//! for tests, with fault injection.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;
use tracing::info;

/// Physical channel identifier (a GPIO number on the daemon host).
pub type ChannelId = u32;

/// Errors reported by a channel driver.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// The connection to the daemon is gone; nothing further will succeed
    #[error("daemon connection lost: {reason}")]
    Disconnected { reason: String },

    /// The daemon refused the command
    #[error("daemon rejected command ({})", describe_code(.code))]
    Rejected { code: i32 },

    /// The driver was already released
    #[error("channel driver already released")]
    Released,
}

impl ChannelError {
    /// True when the connection itself is unusable
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, Self::Disconnected { .. } | Self::Released)
    }
}

/// Human-readable text for the common pigpio error codes.
fn describe_code(code: &i32) -> String {
    let name = match *code {
        -1 => "PI_INIT_FAILED",
        -2 => "PI_BAD_USER_GPIO",
        -3 => "PI_BAD_GPIO",
        -4 => "PI_BAD_MODE",
        -5 => "PI_BAD_LEVEL",
        -6 => "PI_BAD_PUD",
        -8 => "PI_BAD_DUTYCYCLE",
        _ => return format!("error {}", code),
    };
    format!("{} {}", name, code)
}

/// Capability to drive output channels.
///
/// Implementations receive physical duty values; polarity has already been
/// applied by the connection layer.
pub trait ChannelDriver: Send {
    /// Configure `channel` as a PWM output with a 0-255 range.
    fn configure_output(&mut self, channel: ChannelId) -> Result<(), ChannelError>;

    /// Set the duty cycle of `channel`.
    fn set_duty(&mut self, channel: ChannelId, duty: u8) -> Result<(), ChannelError>;

    /// Release the underlying connection. Later calls fail with `Released`.
    fn release(&mut self) -> Result<(), ChannelError>;

    /// Short description for logs
    fn describe(&self) -> String;
}

/// One operation observed by [`MemoryDriver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelOp {
    Configure(ChannelId),
    Write { channel: ChannelId, duty: u8 },
    Release,
}

#[derive(Debug, Default)]
struct MemoryState {
    ops: Vec<ChannelOp>,
    duties: HashMap<ChannelId, u8>,
    failing: HashSet<ChannelId>,
    disconnect_on: Option<ChannelId>,
    released: bool,
}

/// In-memory channel driver.
///
/// Clones share state, so a test can keep a handle while the engine owns
/// the driver.
#[derive(Debug, Clone, Default)]
pub struct MemoryDriver {
    state: Arc<Mutex<MemoryState>>,
    log_writes: bool,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Driver that logs each operation at info level (dry-run mode)
    pub fn logging() -> Self {
        Self {
            log_writes: true,
            ..Self::default()
        }
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut MemoryState) -> R) -> R {
        let mut guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    /// Make every write to `channel` fail with `Rejected`
    pub fn fail_writes_on(&self, channel: ChannelId) {
        self.with_state(|s| {
            s.failing.insert(channel);
        });
    }

    /// Drop the simulated connection on the next write to `channel`
    pub fn disconnect_on(&self, channel: ChannelId) {
        self.with_state(|s| s.disconnect_on = Some(channel));
    }

    /// Every operation so far, in order
    pub fn ops(&self) -> Vec<ChannelOp> {
        self.with_state(|s| s.ops.clone())
    }

    /// Only the successful writes, in order
    pub fn writes(&self) -> Vec<(ChannelId, u8)> {
        self.with_state(|s| {
            s.ops
                .iter()
                .filter_map(|op| match *op {
                    ChannelOp::Write { channel, duty } => Some((channel, duty)),
                    _ => None,
                })
                .collect()
        })
    }

    /// Current physical duty of `channel`, if it was ever written
    pub fn duty(&self, channel: ChannelId) -> Option<u8> {
        self.with_state(|s| s.duties.get(&channel).copied())
    }

    /// Forget recorded operations (keeps duties and fault settings)
    pub fn clear_ops(&self) {
        self.with_state(|s| s.ops.clear());
    }

    pub fn is_released(&self) -> bool {
        self.with_state(|s| s.released)
    }
}

impl ChannelDriver for MemoryDriver {
    fn configure_output(&mut self, channel: ChannelId) -> Result<(), ChannelError> {
        let log = self.log_writes;
        self.with_state(|s| {
            if s.released {
                return Err(ChannelError::Released);
            }
            s.ops.push(ChannelOp::Configure(channel));
            if log {
                info!("[DRY RUN] configure channel {} as output (range 255)", channel);
            }
            Ok(())
        })
    }

    fn set_duty(&mut self, channel: ChannelId, duty: u8) -> Result<(), ChannelError> {
        let log = self.log_writes;
        self.with_state(|s| {
            if s.released {
                return Err(ChannelError::Released);
            }
            if s.disconnect_on == Some(channel) {
                s.released = true;
                return Err(ChannelError::Disconnected {
                    reason: "simulated connection drop".to_string(),
                });
            }
            if s.failing.contains(&channel) {
                return Err(ChannelError::Rejected { code: -8 });
            }
            s.ops.push(ChannelOp::Write { channel, duty });
            s.duties.insert(channel, duty);
            if log {
                info!("[DRY RUN] channel {} duty {}/255", channel, duty);
            }
            Ok(())
        })
    }

    fn release(&mut self) -> Result<(), ChannelError> {
        self.with_state(|s| {
            if s.released {
                return Err(ChannelError::Released);
            }
            s.released = true;
            s.ops.push(ChannelOp::Release);
            Ok(())
        })
    }

    fn describe(&self) -> String {
        "in-memory driver".to_string()
    }
}
