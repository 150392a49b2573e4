//! Error handling module for steamctl
//!
//! Provides the error taxonomy of the sequence engine using thiserror.
//! Construction failures (`ConfigError`, `ConnectionError`) are fatal and no
//! engine is produced. Step failures are split into recoverable ones, which
//! skip a single step, and `HardwareWrite`, which ends the run.

use std::path::PathBuf;

use serde::ser::{Serialize, SerializeStruct, Serializer};
use thiserror::Error;

use crate::channel::{ChannelError, ChannelId};

/// Settings file missing or unusable.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The settings file could not be read
    #[error("Settings file {path:?} not found or unreadable: {source}")]
    Missing {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The settings file is not valid YAML or has the wrong shape
    #[error("Error parsing settings: {0}")]
    Malformed(String),

    /// The settings parsed but describe an impossible device table
    #[error("Invalid settings: {0}")]
    Invalid(String),
}

/// The remote control daemon could not be reached or misbehaved.
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// TCP connection to the daemon failed
    #[error("Unable to connect to pigpiod daemon at {endpoint}: {source}")]
    Unreachable {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    /// The daemon answered with something that is not a pigpio reply
    #[error("Protocol error talking to {endpoint}: {reason}")]
    Protocol { endpoint: String, reason: String },

    /// Channel setup at startup failed
    #[error("Channel initialization failed: {0}")]
    Setup(#[from] ChannelError),
}

/// Why a single step did not complete.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StepError {
    /// A concrete device name that is not in the registry
    #[error("Unknown device: {name}")]
    UnknownDevice { name: String },

    /// Unknown step type, unknown action, or missing required field
    #[error("Unrecognized step: {reason}")]
    UnknownStep { reason: String },

    /// A channel write failed; the run stops here
    #[error("Write to channel {channel} ({device}) failed: {source}")]
    HardwareWrite {
        device: String,
        channel: ChannelId,
        #[source]
        source: ChannelError,
    },
}

impl StepError {
    /// Create an unknown-step error
    pub fn unknown_step(reason: impl Into<String>) -> Self {
        Self::UnknownStep {
            reason: reason.into(),
        }
    }

    /// Recoverable errors skip the step; the rest abort the run.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::HardwareWrite { .. })
    }

    /// Short machine-readable kind, used in reports
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnknownDevice { .. } => "unknown_device",
            Self::UnknownStep { .. } => "unknown_step",
            Self::HardwareWrite { .. } => "hardware_write",
        }
    }
}

/// Reports carry the kind and the message, not the error chain
impl Serialize for StepError {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("StepError", 2)?;
        state.serialize_field("kind", self.kind())?;
        state.serialize_field("message", &self.to_string())?;
        state.end()
    }
}

/// Main error type for the engine
#[derive(Error, Debug)]
pub enum EngineError {
    /// Settings could not be loaded
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Daemon unreachable or channel setup failed
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// The daemon connection was lost; the engine must be rebuilt
    #[error("Engine is faulted: {0}")]
    Faulted(String),

    /// `shutdown` already ran
    #[error("Engine has been shut down")]
    ShutDown,

    /// State errors (mutex poisoning, invalid transition)
    #[error("State error: {0}")]
    State(String),

    /// Channel failure outside a run (shutdown, stop-all)
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    /// Task file has the wrong overall shape
    #[error("Task file error: {0}")]
    Task(String),

    /// IO errors (task files)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML errors (task files)
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON errors (reports)
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    /// Create a faulted error
    pub fn faulted(msg: impl Into<String>) -> Self {
        Self::Faulted(msg.into())
    }

    /// Create a task file error
    pub fn task(msg: impl Into<String>) -> Self {
        Self::Task(msg.into())
    }

    /// Create a state error
    pub fn state(msg: impl Into<String>) -> Self {
        Self::State(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StepError::UnknownDevice {
            name: "kettle".to_string(),
        };
        assert_eq!(err.to_string(), "Unknown device: kettle");

        let err = EngineError::from(ConfigError::Invalid("no devices".to_string()));
        assert_eq!(
            err.to_string(),
            "Configuration error: Invalid settings: no devices"
        );
    }

    #[test]
    fn test_recoverability() {
        assert!(StepError::unknown_step("missing device").is_recoverable());
        assert!(
            StepError::UnknownDevice {
                name: "x".to_string()
            }
            .is_recoverable()
        );
        let fatal = StepError::HardwareWrite {
            device: "steam".to_string(),
            channel: 17,
            source: ChannelError::Rejected { code: -3 },
        };
        assert!(!fatal.is_recoverable());
        assert_eq!(fatal.kind(), "hardware_write");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: EngineError = io_err.into();
        assert!(matches!(err, EngineError::Io(_)));
    }
}
