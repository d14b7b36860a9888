//! Stage status and kind enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The role a stage plays in the task graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// A stage that performs side effects (extract, load, truncate, run a job).
    #[default]
    Work,
    /// A stage that polls an external condition until it holds.
    Sensor,
    /// A stage that picks which direct children run.
    Branch,
    /// A stage with no work of its own, marking where paths meet or split.
    Join,
    /// A stage that ends the run in the failed state when reached.
    Terminal,
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Work => write!(f, "work"),
            Self::Sensor => write!(f, "sensor"),
            Self::Branch => write!(f, "branch"),
            Self::Join => write!(f, "join"),
            Self::Terminal => write!(f, "terminal"),
        }
    }
}

/// The execution status of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Stage is waiting for its upstream stages.
    #[default]
    Pending,
    /// Stage is currently running.
    Running,
    /// Stage completed successfully.
    Ok,
    /// Stage failed after exhausting its retries.
    Fail,
    /// Stage was not on the chosen path.
    Skip,
    /// Stage did not run because an upstream stage failed.
    UpstreamFailed,
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Ok => write!(f, "ok"),
            Self::Fail => write!(f, "fail"),
            Self::Skip => write!(f, "skip"),
            Self::UpstreamFailed => write!(f, "upstream_failed"),
        }
    }
}

impl StageStatus {
    /// Returns true if the status represents a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Ok | Self::Skip | Self::Fail | Self::UpstreamFailed
        )
    }

    /// Returns true if the status indicates success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Ok | Self::Skip)
    }

    /// Returns true if the status indicates failure.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Fail | Self::UpstreamFailed)
    }
}
