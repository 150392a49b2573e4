//! steamctl library
//!
//! Sequence execution engine for steam/vacuum/extraction appliances. A
//! sequence of start, stop and delay steps is run against PWM channels
//! driven through the pigpio daemon.

pub mod cancel;
pub mod channel;
pub mod cli;
pub mod config_file;
pub mod connection;
pub mod daemon;
pub mod engine_state;
pub mod error;
pub mod executor;
pub mod registry;
pub mod report;
pub mod sequence;
pub mod signals;
pub mod types;
pub mod worker;

// Re-export main types for convenience
pub use cancel::CancelToken;
pub use channel::{ChannelDriver, ChannelError, ChannelId, ChannelOp, MemoryDriver};
pub use config_file::{DaemonEndpoint, Settings};
pub use connection::{CommittedValues, Connection};
pub use daemon::PigpioClient;
pub use engine_state::{EngineState, StateTransitionError};
pub use error::{ConfigError, ConnectionError, EngineError, Result, StepError};
pub use executor::{Engine, check_sequence};
pub use registry::{ALL_DEVICES, Device, DeviceRegistry};
pub use report::{ChannelWrite, RunOutcome, RunReport, StepOutcome, StepStatus};
pub use sequence::{Action, Delay, DeviceRef, Sequence, SequenceEntry, Step};
pub use types::{ActionKind, DelayUnit, Level, MAX_INTENSITY, Polarity};
pub use worker::{RunId, RunRequest, RunResponse, spawn_run_worker};
