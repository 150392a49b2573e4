//! Type-safe values for steps and settings
//!
//! Levels, delay units, action kinds and output polarity are enums rather
//! than strings so the executor can match on them exhaustively.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};
use tracing::warn;

/// Highest drive intensity on the 0-255 scale.
pub const MAX_INTENSITY: u8 = 255;

/// Named power level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    /// Roughly a third duty cycle
    Min,
    /// Roughly two thirds duty cycle
    Med,
    /// Full duty cycle
    #[default]
    Max,
}

impl Level {
    /// Drive intensity for this level.
    ///
    /// | Level | Intensity |
    /// |-------|-----------|
    /// | `Min` | 85        |
    /// | `Med` | 170       |
    /// | `Max` | 255       |
    pub const fn intensity(self) -> u8 {
        match self {
            Self::Min => 85,
            Self::Med => 170,
            Self::Max => MAX_INTENSITY,
        }
    }

    /// Intensity for an optional level; absent means full power.
    pub fn intensity_or_max(level: Option<Self>) -> u8 {
        level.map_or(MAX_INTENSITY, Self::intensity)
    }
}

/// Time unit of a delay step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[derive(Display, EnumIter)]
pub enum DelayUnit {
    #[default]
    #[strum(serialize = "sec")]
    #[serde(rename = "sec")]
    Seconds,
    #[strum(serialize = "min")]
    #[serde(rename = "min")]
    Minutes,
    #[strum(serialize = "hour")]
    #[serde(rename = "hour")]
    Hours,
}

impl DelayUnit {
    /// Seconds in one of this unit
    pub const fn seconds(self) -> u64 {
        match self {
            Self::Seconds => 1,
            Self::Minutes => 60,
            Self::Hours => 3600,
        }
    }

    /// Parse a unit by prefix (`sec`, `min`, `hour`), ignoring case.
    pub fn from_prefix(s: &str) -> Option<Self> {
        let s = s.trim().to_ascii_lowercase();
        if s.starts_with("sec") {
            Some(Self::Seconds)
        } else if s.starts_with("min") {
            Some(Self::Minutes)
        } else if s.starts_with("hour") {
            Some(Self::Hours)
        } else {
            None
        }
    }

    /// Like [`DelayUnit::from_prefix`], but an unrecognized unit is seconds.
    pub fn parse_lenient(s: &str) -> Self {
        Self::from_prefix(s).unwrap_or_else(|| {
            warn!("Unknown delay unit: {}, defaulting to seconds", s);
            Self::Seconds
        })
    }
}

/// What an action step does to its device(s).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Start,
    Stop,
}

/// Which physical signal level means "on" for the output channels.
///
/// Hardware revisions of the appliance disagree, so this is a setting
/// rather than an assumption in the write path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[serde(rename_all = "snake_case")]
pub enum Polarity {
    /// Intensity is written as-is
    #[default]
    ActiveHigh,
    /// Intensity is inverted: 0 drives the line high
    ActiveLow,
}

impl Polarity {
    /// Physical duty cycle for a logical intensity
    pub const fn apply(self, intensity: u8) -> u8 {
        match self {
            Self::ActiveHigh => intensity,
            Self::ActiveLow => MAX_INTENSITY - intensity,
        }
    }
}
