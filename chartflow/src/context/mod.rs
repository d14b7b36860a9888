//! Context management for pipeline execution.
//!
//! This module provides:
//! - The run identity (run id plus the logical run date)
//! - Mutable execution contexts for the run and for each stage attempt
//! - Read-only views of upstream stage outputs

mod execution;
mod identity;
mod inputs;

pub use execution::{ExecutionContext, PipelineContext, StageContext};
pub use identity::RunIdentity;
pub use inputs::StageInputs;
