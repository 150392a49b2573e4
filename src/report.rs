//! Run results
//!
//! A run ends with one [`RunOutcome`]. The report also carries what each
//! step did so a front end can show more than the final status line.
//! Every type here serializes to the `--json` output of the CLI.

use serde::Serialize;

use crate::channel::ChannelId;
use crate::error::StepError;

/// One committed channel write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelWrite {
    pub device: String,
    pub channel: ChannelId,
    /// Logical intensity, before polarity
    pub intensity: u8,
}

/// What happened to a single step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepStatus {
    /// Action written to every resolved channel
    Applied { writes: Vec<ChannelWrite> },
    /// Delay elapsed in full
    Waited { seconds: u64 },
    /// Recoverable error; the run went on
    Skipped { error: StepError },
    /// Fatal error; the run stopped here
    Failed { error: StepError },
    /// Cancelled while this step was pending or waiting
    Cancelled,
}

/// Per-step entry of a report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepOutcome {
    /// Zero-based position in the sequence
    pub index: usize,
    /// Text form of the step, for logs and UI
    #[serde(rename = "step")]
    pub description: String,
    #[serde(flatten)]
    pub status: StepStatus,
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every step was visited (some may have been skipped)
    Completed,
    /// Cancelled before or during step `step`
    Cancelled { step: usize },
    /// Fatal error at step `step`; later steps never ran
    Failed { step: usize, error: StepError },
}

/// End-of-run result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub steps: Vec<StepOutcome>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, RunOutcome::Completed)
    }

    /// Steps skipped because of recoverable errors
    pub fn skipped(&self) -> impl Iterator<Item = &StepOutcome> {
        self.steps
            .iter()
            .filter(|s| matches!(s.status, StepStatus::Skipped { .. }))
    }

    /// Every write committed during the run, in order
    pub fn writes(&self) -> impl Iterator<Item = &ChannelWrite> {
        self.steps.iter().flat_map(|s| match &s.status {
            StepStatus::Applied { writes } => writes.as_slice(),
            _ => &[][..],
        })
    }

    /// One-line status message for the operator.
    ///
    /// Step numbers in the text are one-based.
    pub fn summary(&self, label: &str) -> String {
        match &self.outcome {
            RunOutcome::Completed => {
                let skipped = self.skipped().count();
                if skipped == 0 {
                    format!("Task from {} executed successfully!", label)
                } else {
                    format!(
                        "Task from {} executed successfully! ({} step(s) skipped)",
                        label, skipped
                    )
                }
            }
            RunOutcome::Cancelled { step } => {
                format!("Task from {} cancelled at step {}", label, step + 1)
            }
            RunOutcome::Failed { step, error } => {
                format!("Error executing {}: step {}: {}", label, step + 1, error)
            }
        }
    }
}
