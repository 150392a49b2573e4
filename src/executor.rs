//! Sequence execution engine
//!
//! The [`Engine`] owns the device registry and the daemon connection and
//! runs sequences against them, one at a time.
//!
//! # Execution rules
//!
//! - Steps run strictly in list order; a step is complete (write committed
//!   or delay elapsed) before the next one starts.
//! - `start` writes the level's intensity (255 if no level), `stop` writes 0,
//!   to each resolved channel in registry order.
//! - Unknown devices and unrecognized records are logged and skipped.
//! - A failed channel write ends the run. Channels already written in the
//!   same fan-out keep their new value; the rest of the fan-out is abandoned.
//! - Channels keep their last committed value when a run ends. Only
//!   [`Engine::shutdown`] (or dropping the engine) zeroes them.
//!
//! # Concurrency
//!
//! A run holds the connection lock from start to finish, so two runs
//! against one engine never interleave and [`Engine::shutdown`] waits for
//! the current run. The state and the committed-value mirror sit behind
//! their own short-held locks: [`Engine::state`] and [`Engine::committed`]
//! answer immediately while a run is in a delay.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{error, info, warn};

use crate::cancel::CancelToken;
use crate::channel::{ChannelDriver, ChannelId};
use crate::config_file::Settings;
use crate::connection::{CommittedValues, Connection};
use crate::daemon::PigpioClient;
use crate::engine_state::{EngineState, StateMachine};
use crate::error::{ConnectionError, EngineError, Result, StepError};
use crate::registry::{Device, DeviceRegistry};
use crate::report::{ChannelWrite, RunOutcome, RunReport, StepOutcome, StepStatus};
use crate::sequence::{Action, Delay, DeviceRef, Sequence, SequenceEntry, Step};
use crate::types::{ActionKind, Polarity};

/// Sequence engine bound to one daemon connection.
pub struct Engine {
    registry: DeviceRegistry,
    /// Held for the length of a run
    connection: Mutex<Connection>,
    committed: CommittedValues,
    state: Mutex<StateMachine>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("devices", &self.registry.len())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Build an engine talking to the pigpio daemon named in `settings`.
    ///
    /// The device table is checked before any connection is attempted, so
    /// a bad settings file never touches the hardware.
    pub fn connect(settings: &Settings) -> Result<Self> {
        let registry = DeviceRegistry::load(settings)?;
        let client = PigpioClient::connect(&settings.daemon)?;
        Self::with_driver(registry, Box::new(client), settings.polarity)
    }

    /// Build an engine on an already-connected channel driver.
    ///
    /// Every registered channel is configured and stopped before this
    /// returns.
    pub fn with_driver(
        registry: DeviceRegistry,
        driver: Box<dyn ChannelDriver>,
        polarity: Polarity,
    ) -> Result<Self> {
        let mut connection = Connection::new(driver, polarity);
        connection
            .initialize_channels(&registry)
            .map_err(ConnectionError::Setup)?;
        info!(
            "Engine ready: {} device(s), polarity {}",
            registry.len(),
            polarity
        );

        Ok(Self {
            committed: connection.committed_values(),
            registry,
            connection: Mutex::new(connection),
            state: Mutex::new(StateMachine::new()),
        })
    }

    fn lock_connection(&self) -> Result<MutexGuard<'_, Connection>> {
        self.connection
            .lock()
            .map_err(|_| EngineError::state("engine lock poisoned by a panicked run"))
    }

    // Never held across a step, so a poisoned guard still holds a valid state
    fn lock_state(&self) -> MutexGuard<'_, StateMachine> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(&self, to: EngineState) -> Result<()> {
        self.lock_state()
            .transition_to(to)
            .map_err(|e| EngineError::state(e.to_string()))
    }

    /// Current engine state. Does not wait for a run in progress.
    pub fn state(&self) -> EngineState {
        self.lock_state().current()
    }

    /// Registered devices, in registry order
    pub fn devices(&self) -> &[Device] {
        self.registry.devices()
    }

    /// Last intensity the engine committed to `channel`
    pub fn committed(&self, channel: ChannelId) -> Option<u8> {
        self.committed.get(channel)
    }

    /// Run a sequence to completion.
    pub fn execute(&self, sequence: &Sequence) -> Result<RunReport> {
        self.execute_cancellable(sequence, &CancelToken::new())
    }

    /// Run a sequence, stopping early if `cancel` fires.
    ///
    /// Cancellation is checked before each step and polled during delays.
    /// The returned `Err` is reserved for an engine that cannot run at all;
    /// step failures are reported in the [`RunReport`].
    pub fn execute_cancellable(
        &self,
        sequence: &Sequence,
        cancel: &CancelToken,
    ) -> Result<RunReport> {
        let mut connection = self.lock_connection()?;

        match self.state() {
            EngineState::ShutDown => return Err(EngineError::ShutDown),
            EngineState::Faulted if connection.is_lost() => {
                return Err(EngineError::faulted(
                    "daemon connection was lost; rebuild the engine",
                ));
            }
            _ => {}
        }
        self.transition(EngineState::Running)?;

        let report = self.run(&mut connection, sequence, cancel);

        let next = match report.outcome {
            RunOutcome::Failed { .. } => EngineState::Faulted,
            RunOutcome::Completed | RunOutcome::Cancelled { .. } => EngineState::Idle,
        };
        self.transition(next)?;
        Ok(report)
    }

    /// Stop every channel and release the daemon connection.
    ///
    /// Waits for a run in progress. Call once when the engine is retired.
    /// Later calls do nothing. Cleanup still runs if a previous run
    /// panicked.
    pub fn shutdown(&self) -> Result<()> {
        let mut connection = self
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut state = self.lock_state();
        if state.current().is_terminal() {
            return Ok(());
        }

        let result = connection.shutdown();
        if state.transition_to(EngineState::ShutDown).is_err() {
            // Only reachable when a run panicked mid-way
            state.force(EngineState::ShutDown);
        }
        result.map_err(EngineError::from)
    }

    fn run(
        &self,
        connection: &mut Connection,
        sequence: &Sequence,
        cancel: &CancelToken,
    ) -> RunReport {
        info!("Running sequence of {} step(s)", sequence.len());
        let mut steps = Vec::with_capacity(sequence.len());

        for (index, entry) in sequence.entries().iter().enumerate() {
            if cancel.is_cancelled() {
                warn!("Run cancelled before step {}", index + 1);
                return RunReport {
                    outcome: RunOutcome::Cancelled { step: index },
                    steps,
                };
            }

            let step = match entry {
                SequenceEntry::Step(step) => step,
                SequenceEntry::Unrecognized(err) => {
                    warn!("Step {}: skipped: {}", index + 1, err);
                    steps.push(StepOutcome {
                        index,
                        description: "unrecognized step".to_string(),
                        status: StepStatus::Skipped { error: err.clone() },
                    });
                    continue;
                }
            };

            info!("Step {}: {}", index + 1, step);
            let description = step.to_string();

            match step {
                Step::Delay(delay) => {
                    let status = run_delay(delay, cancel);
                    let cancelled = status == StepStatus::Cancelled;
                    steps.push(StepOutcome {
                        index,
                        description,
                        status,
                    });
                    if cancelled {
                        return RunReport {
                            outcome: RunOutcome::Cancelled { step: index },
                            steps,
                        };
                    }
                }
                Step::Action(action) => match self.run_action(connection, action) {
                    Ok(writes) => steps.push(StepOutcome {
                        index,
                        description,
                        status: StepStatus::Applied { writes },
                    }),
                    Err(err) if err.is_recoverable() => {
                        warn!("Step {}: skipped: {}", index + 1, err);
                        steps.push(StepOutcome {
                            index,
                            description,
                            status: StepStatus::Skipped { error: err },
                        });
                    }
                    Err(err) => {
                        error!("Step {}: aborting run: {}", index + 1, err);
                        steps.push(StepOutcome {
                            index,
                            description,
                            status: StepStatus::Failed { error: err.clone() },
                        });
                        return RunReport {
                            outcome: RunOutcome::Failed {
                                step: index,
                                error: err,
                            },
                            steps,
                        };
                    }
                },
            }
        }

        info!("Sequence complete");
        RunReport {
            outcome: RunOutcome::Completed,
            steps,
        }
    }

    /// Write an action's intensity to every device it resolves to.
    fn run_action(
        &self,
        connection: &mut Connection,
        action: &Action,
    ) -> std::result::Result<Vec<ChannelWrite>, StepError> {
        let devices = self.registry.resolve(&action.device)?;
        let intensity = action.intensity();
        let mut writes = Vec::with_capacity(devices.len());

        for device in devices {
            connection
                .write(device.channel, intensity)
                .map_err(|source| StepError::HardwareWrite {
                    device: device.display_name.clone(),
                    channel: device.channel,
                    source,
                })?;

            match action.kind {
                ActionKind::Start => info!(
                    "Started {} at {} level ({}/255 duty cycle)",
                    device.display_name,
                    action.level.map_or("max".to_string(), |l| l.to_string()),
                    intensity
                ),
                ActionKind::Stop => info!("Stopped {}", device.display_name),
            }
            writes.push(ChannelWrite {
                device: device.display_name.clone(),
                channel: device.channel,
                intensity,
            });
        }
        Ok(writes)
    }
}

fn run_delay(delay: &Delay, cancel: &CancelToken) -> StepStatus {
    let seconds = delay.seconds();
    info!("Delaying for {} seconds", seconds);
    match cancel.wait(delay.duration()) {
        Ok(()) => StepStatus::Waited { seconds },
        Err(c) => {
            warn!("Delay cancelled after {:.1}s of {}s", c.waited.as_secs_f64(), seconds);
            StepStatus::Cancelled
        }
    }
}

/// Check a sequence against a registry without running it.
///
/// Returns the zero-based index and problem of every entry that would be
/// skipped.
pub fn check_sequence(sequence: &Sequence, registry: &DeviceRegistry) -> Vec<(usize, StepError)> {
    sequence
        .entries()
        .iter()
        .enumerate()
        .filter_map(|(index, entry)| match entry {
            SequenceEntry::Unrecognized(err) => Some((index, err.clone())),
            SequenceEntry::Step(Step::Action(Action {
                device: device @ DeviceRef::Named(_),
                ..
            })) => registry.resolve(device).err().map(|e| (index, e)),
            SequenceEntry::Step(_) => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MemoryDriver;
    use crate::types::Level;

    fn engine() -> (Engine, MemoryDriver) {
        let driver = MemoryDriver::new();
        let registry = DeviceRegistry::from_pairs([("Steam", 1), ("Vacuum", 2)]).unwrap();
        let engine =
            Engine::with_driver(registry, Box::new(driver.clone()), Polarity::ActiveHigh).unwrap();
        driver.clear_ops();
        (engine, driver)
    }

    fn start(name: &str, level: Option<Level>) -> Step {
        Step::Action(Action::start(DeviceRef::parse(name), level))
    }

    #[test]
    fn test_start_and_stop_single_device() {
        let (engine, driver) = engine();
        let seq = Sequence::new(vec![
            start("steam", Some(Level::Min)),
            Step::Action(Action::stop(DeviceRef::parse("STEAM"))),
        ]);
        let report = engine.execute(&seq).unwrap();
        assert!(report.is_success());
        assert_eq!(driver.writes(), vec![(1, 85), (1, 0)]);
        assert_eq!(engine.state(), EngineState::Idle);
    }

    #[test]
    fn test_channels_keep_value_after_run() {
        let (engine, driver) = engine();
        engine
            .execute(&Sequence::new(vec![start("Vacuum", None)]))
            .unwrap();
        assert_eq!(driver.duty(2), Some(255));
        assert_eq!(engine.committed(2), Some(255));
    }

    #[test]
    fn test_fatal_write_moves_to_faulted_but_accepts_new_runs() {
        let (engine, driver) = engine();
        driver.fail_writes_on(2);
        let report = engine
            .execute(&Sequence::new(vec![start("Vacuum", None)]))
            .unwrap();
        assert!(matches!(report.outcome, RunOutcome::Failed { step: 0, .. }));
        assert_eq!(engine.state(), EngineState::Faulted);

        let report = engine
            .execute(&Sequence::new(vec![start("Steam", None)]))
            .unwrap();
        assert!(report.is_success());
        assert_eq!(engine.state(), EngineState::Idle);
    }

    #[test]
    fn test_lost_connection_stays_faulted() {
        let (engine, driver) = engine();
        driver.disconnect_on(1);
        let report = engine
            .execute(&Sequence::new(vec![start("Steam", None)]))
            .unwrap();
        assert!(!report.is_success());
        assert_eq!(engine.state(), EngineState::Faulted);

        let err = engine.execute(&Sequence::default()).unwrap_err();
        assert!(matches!(err, EngineError::Faulted(_)));
    }

    #[test]
    fn test_shutdown_then_execute_is_refused() {
        let (engine, driver) = engine();
        engine
            .execute(&Sequence::new(vec![start("All", Some(Level::Med))]))
            .unwrap();
        engine.shutdown().unwrap();
        engine.shutdown().unwrap();

        assert_eq!(driver.duty(1), Some(0));
        assert_eq!(driver.duty(2), Some(0));
        assert!(driver.is_released());
        assert_eq!(engine.state(), EngineState::ShutDown);
        assert!(matches!(
            engine.execute(&Sequence::default()),
            Err(EngineError::ShutDown)
        ));
    }

    #[test]
    fn test_state_readable_during_a_delay() {
        use std::sync::Arc;
        use std::time::{Duration, Instant};

        let (engine, _driver) = engine();
        let engine = Arc::new(engine);
        let cancel = CancelToken::new();
        let seq = Sequence::new(vec![
            start("Steam", Some(Level::Med)),
            Step::Delay(Delay::new(30, crate::types::DelayUnit::Seconds).unwrap()),
        ]);

        let runner = {
            let engine = Arc::clone(&engine);
            let cancel = cancel.clone();
            std::thread::spawn(move || engine.execute_cancellable(&seq, &cancel))
        };

        // Wait for the run to reach its delay
        let begin = Instant::now();
        while engine.committed(1) != Some(170) {
            assert!(begin.elapsed() < Duration::from_secs(5), "run never started");
            std::thread::sleep(Duration::from_millis(10));
        }

        let asked = Instant::now();
        assert_eq!(engine.state(), EngineState::Running);
        assert!(asked.elapsed() < Duration::from_secs(1));
        assert_eq!(engine.devices().len(), 2);

        cancel.cancel();
        let report = runner.join().unwrap().unwrap();
        assert_eq!(report.outcome, RunOutcome::Cancelled { step: 1 });
        assert_eq!(engine.state(), EngineState::Idle);
    }

    #[test]
    fn test_check_sequence_reports_skips() {
        let registry = DeviceRegistry::from_pairs([("Steam", 1)]).unwrap();
        let seq = Sequence::from_entries(vec![
            SequenceEntry::Step(start("Steam", None)),
            SequenceEntry::Step(start("Kettle", None)),
            SequenceEntry::Unrecognized(StepError::unknown_step("missing `type`")),
            SequenceEntry::Step(start("all", None)),
        ]);
        let problems = check_sequence(&seq, &registry);
        let indexes: Vec<_> = problems.iter().map(|(i, _)| *i).collect();
        assert_eq!(indexes, vec![1, 2]);
    }
}
