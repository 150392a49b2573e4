//! Sequence data model and task file encoding.
//!
//! A task file is a YAML document with an `actions` list. Each entry is a
//! record tagged by `type`:
//!
//! ```yaml
//! actions:
//!   - type: action
//!     action_type: start
//!     device: Steam
//!     level: med
//!   - type: delay
//!     amount: 5
//!     unit: sec
//!   - "30s"            # legacy delay encoding
//!   - type: action
//!     action_type: stop
//!     device: All
//! ```
//!
//! Records are turned into typed [`Step`]s when the file is read. A record
//! that cannot be understood is kept in place as an unrecognized entry so
//! the executor can report and skip it at the right position.

use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use tracing::{debug, warn};

use crate::error::{EngineError, Result, StepError};
use crate::registry::ALL_DEVICES;
use crate::types::{ActionKind, DelayUnit, Level};

/// Which device(s) an action addresses.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DeviceRef {
    /// Every registered device, in registry order
    All,
    /// A single device, matched case-insensitively
    Named(String),
}

impl DeviceRef {
    pub fn parse(name: &str) -> Self {
        if name.trim().eq_ignore_ascii_case(ALL_DEVICES) {
            Self::All
        } else {
            Self::Named(name.trim().to_string())
        }
    }
}

impl fmt::Display for DeviceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "All"),
            Self::Named(name) => write!(f, "{}", name),
        }
    }
}

/// A timed wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Delay {
    /// Always positive
    pub amount: u64,
    pub unit: DelayUnit,
}

impl Delay {
    /// Create a delay; `None` if `amount` is zero
    pub fn new(amount: u64, unit: DelayUnit) -> Option<Self> {
        (amount > 0).then_some(Self { amount, unit })
    }

    /// Length of the delay in seconds
    pub fn seconds(&self) -> u64 {
        self.amount.saturating_mul(self.unit.seconds())
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.seconds())
    }

    /// Parse the legacy encoding: digits followed by `s` or `m`.
    pub fn parse_legacy(s: &str) -> Option<Self> {
        let s = s.trim();
        let (digits, unit) = match s.char_indices().last()? {
            (i, 's' | 'S') => (&s[..i], DelayUnit::Seconds),
            (i, 'm' | 'M') => (&s[..i], DelayUnit::Minutes),
            _ => return None,
        };
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        Self::new(digits.parse().ok()?, unit)
    }
}

/// Start or stop a device.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Action {
    pub kind: ActionKind,
    pub device: DeviceRef,
    /// Only meaningful for `Start`; absent means `Max`
    pub level: Option<Level>,
}

impl Action {
    pub fn start(device: DeviceRef, level: Option<Level>) -> Self {
        Self {
            kind: ActionKind::Start,
            device,
            level,
        }
    }

    pub fn stop(device: DeviceRef) -> Self {
        Self {
            kind: ActionKind::Stop,
            device,
            level: None,
        }
    }

    /// Logical intensity this action commands
    pub fn intensity(&self) -> u8 {
        match self.kind {
            ActionKind::Start => Level::intensity_or_max(self.level),
            ActionKind::Stop => 0,
        }
    }
}

/// One step of a sequence.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Step {
    Delay(Delay),
    Action(Action),
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Delay(d) => write!(f, "delay {} {}", d.amount, d.unit),
            Self::Action(a) => match (a.kind, a.level) {
                (ActionKind::Start, Some(level)) => write!(f, "start {} at {}", a.device, level),
                (ActionKind::Start, None) => write!(f, "start {}", a.device),
                (ActionKind::Stop, _) => write!(f, "stop {}", a.device),
            },
        }
    }
}

/// A position in a sequence: either a typed step or a record that could
/// not be understood.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SequenceEntry {
    Step(Step),
    Unrecognized(StepError),
}

/// Ordered list of steps, executed top to bottom.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sequence {
    entries: Vec<SequenceEntry>,
}

impl Sequence {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            entries: steps.into_iter().map(SequenceEntry::Step).collect(),
        }
    }

    pub fn from_entries(entries: Vec<SequenceEntry>) -> Self {
        Self { entries }
    }

    pub fn push(&mut self, step: Step) {
        self.entries.push(SequenceEntry::Step(step));
    }

    pub fn entries(&self) -> &[SequenceEntry] {
        &self.entries
    }

    /// Typed steps only, skipping unrecognized entries
    pub fn steps(&self) -> impl Iterator<Item = &Step> {
        self.entries.iter().filter_map(|e| match e {
            SequenceEntry::Step(step) => Some(step),
            SequenceEntry::Unrecognized(_) => None,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of all delays, in seconds
    pub fn total_delay_seconds(&self) -> u64 {
        self.steps()
            .filter_map(|s| match s {
                Step::Delay(d) => Some(d.seconds()),
                Step::Action(_) => None,
            })
            .fold(0u64, u64::saturating_add)
    }

    /// Load a task file (YAML; JSON is accepted as well)
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)?;
        Self::from_yaml_str(&content)
    }

    /// Parse a task document: a mapping with `actions`, or a bare list
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let doc: Value = serde_yaml::from_str(content)?;
        let records = match doc {
            Value::Null => Vec::new(),
            Value::Sequence(items) => items,
            Value::Mapping(mut map) => match map.remove("actions") {
                Some(Value::Sequence(items)) => items,
                Some(Value::Null) | None => Vec::new(),
                Some(other) => {
                    return Err(EngineError::task(format!(
                        "`actions` must be a list, got {}",
                        value_kind(&other)
                    )));
                }
            },
            other => {
                return Err(EngineError::task(format!(
                    "task document must be a mapping or a list, got {}",
                    value_kind(&other)
                )));
            }
        };

        let entries = records
            .into_iter()
            .map(|record| match parse_record(record) {
                Ok(step) => SequenceEntry::Step(step),
                Err(e) => SequenceEntry::Unrecognized(e),
            })
            .collect();
        Ok(Self { entries })
    }

    /// Render as a task document with an `actions` list.
    ///
    /// Unrecognized entries are dropped.
    pub fn to_yaml_string(&self) -> Result<String> {
        let actions: Vec<StepRecord> = self
            .entries
            .iter()
            .filter_map(|entry| match entry {
                SequenceEntry::Step(step) => Some(StepRecord::from(step)),
                SequenceEntry::Unrecognized(e) => {
                    warn!("Dropping unrecognized entry on save: {}", e);
                    None
                }
            })
            .collect();
        Ok(serde_yaml::to_string(&TaskFile { actions })?)
    }

    /// Save as a task file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml = self.to_yaml_string()?;
        if let Some(parent) = path.as_ref().parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, yaml)?;
        debug!("Saved {} step(s) to {:?}", self.len(), path.as_ref());
        Ok(())
    }
}

impl FromIterator<Step> for Sequence {
    fn from_iter<I: IntoIterator<Item = Step>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

#[derive(Debug, Serialize)]
struct TaskFile {
    actions: Vec<StepRecord>,
}

/// Wire shape of one step record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepRecord {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    /// Integer, or a legacy string such as `"5m"`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

impl From<&Step> for StepRecord {
    fn from(step: &Step) -> Self {
        match step {
            Step::Delay(d) => Self {
                kind: Some("delay".to_string()),
                amount: Some(Value::from(d.amount)),
                unit: Some(d.unit.to_string()),
                ..Self::default()
            },
            Step::Action(a) => Self {
                kind: Some("action".to_string()),
                action_type: Some(a.kind.to_string()),
                device: Some(a.device.to_string()),
                level: match a.kind {
                    ActionKind::Start => a.level.map(|l| l.to_string()),
                    ActionKind::Stop => None,
                },
                ..Self::default()
            },
        }
    }
}

impl TryFrom<StepRecord> for Step {
    type Error = StepError;

    fn try_from(record: StepRecord) -> std::result::Result<Self, StepError> {
        let kind = record
            .kind
            .as_deref()
            .map(|k| k.trim().to_ascii_lowercase())
            .ok_or_else(|| StepError::unknown_step("missing `type`"))?;

        match kind.as_str() {
            "action" => action_from_record(record).map(Step::Action),
            "delay" => delay_from_record(record).map(Step::Delay),
            other => Err(StepError::unknown_step(format!(
                "unknown step type {:?}",
                other
            ))),
        }
    }
}

fn action_from_record(record: StepRecord) -> std::result::Result<Action, StepError> {
    let action_type = record
        .action_type
        .ok_or_else(|| StepError::unknown_step("action without `action_type`"))?;
    let kind: ActionKind = action_type
        .trim()
        .parse()
        .map_err(|_| StepError::unknown_step(format!("unknown action_type {:?}", action_type)))?;
    let device = record
        .device
        .filter(|d| !d.trim().is_empty())
        .map(|d| DeviceRef::parse(&d))
        .ok_or_else(|| StepError::unknown_step("action without `device`"))?;

    let level = match (kind, record.level) {
        (ActionKind::Start, Some(raw)) => match raw.trim().parse::<Level>() {
            Ok(level) => Some(level),
            Err(_) => {
                warn!("Unknown level {:?}, using max", raw);
                None
            }
        },
        (ActionKind::Stop, Some(raw)) => {
            debug!("Ignoring level {:?} on stop action", raw);
            None
        }
        (_, None) => None,
    };

    Ok(Action {
        kind,
        device,
        level,
    })
}

fn delay_from_record(record: StepRecord) -> std::result::Result<Delay, StepError> {
    let unit = record
        .unit
        .as_deref()
        .map_or(DelayUnit::Seconds, DelayUnit::parse_lenient);

    match record.amount {
        Some(Value::Number(n)) => n
            .as_u64()
            .and_then(|amount| Delay::new(amount, unit))
            .ok_or_else(|| {
                StepError::unknown_step(format!("delay amount must be a positive integer, got {}", n))
            }),
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            if let Ok(amount) = trimmed.parse::<u64>() {
                return Delay::new(amount, unit).ok_or_else(|| {
                    StepError::unknown_step("delay amount must be a positive integer, got 0")
                });
            }
            Delay::parse_legacy(trimmed)
                .ok_or_else(|| StepError::unknown_step(format!("invalid delay {:?}", s)))
        }
        Some(other) => Err(StepError::unknown_step(format!(
            "delay amount must be a positive integer, got {}",
            value_kind(&other)
        ))),
        None => {
            warn!("Delay without `amount`, waiting 1 {}", unit);
            Delay::new(1, unit).ok_or_else(|| StepError::unknown_step("delay without `amount`"))
        }
    }
}

/// Turn one raw record into a step
pub fn parse_record(record: Value) -> std::result::Result<Step, StepError> {
    match record {
        Value::String(s) => Delay::parse_legacy(&s)
            .map(Step::Delay)
            .ok_or_else(|| StepError::unknown_step(format!("invalid legacy delay {:?}", s))),
        Value::Mapping(_) => {
            let record: StepRecord = serde_yaml::from_value(record)
                .map_err(|e| StepError::unknown_step(e.to_string()))?;
            Step::try_from(record)
        }
        other => Err(StepError::unknown_step(format!(
            "expected a step record, got {}",
            value_kind(&other)
        ))),
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a list",
        Value::Mapping(_) => "a mapping",
        Value::Tagged(_) => "a tagged value",
    }
}
