//! The concrete tasks of the chart graph.
//!
//! Each task wraps one call into an external collaborator and reports the
//! outcome as a [`StageOutput`](crate::core::StageOutput). Errors become
//! `fail` outputs; the scheduler decides whether to retry.

mod extract;
mod job;
mod quality;
mod sensor;
mod terminal;
mod warehouse;

pub use extract::{ExtractLauncher, ExtractStage, InProcessLauncher, SubprocessLauncher};
pub use job::{AwaitJobDefinitionStage, DeregisterJobStage, RegisterJobStage, RunJobStage};
pub use quality::QualityGateStage;
pub use sensor::ObjectSensorStage;
pub use terminal::FailRunStage;
pub use warehouse::{CopyIntoStagingStage, CreateStagingTableStage, TruncateStagingStage};

use crate::core::StageOutput;
use std::fmt::Display;
use tracing::error;

pub(crate) fn failed(stage: &str, err: impl Display) -> StageOutput {
    error!(stage, error = %err, "Task failed");
    StageOutput::fail(err.to_string())
}
