//! Graph building and execution.
//!
//! This module provides:
//! - Stage specifications and trigger rules
//! - A builder with structural validation
//! - The concurrent graph executor
//! - Retry policies shared by the scheduler and the uploader

mod builder;
mod dag;
mod retry;
mod spec;

pub use builder::PipelineBuilder;
pub use dag::{GraphExecutionResult, RunState, StageGraph};
pub use retry::{
    should_retry, BackoffStrategy, JitterStrategy, RetryConfig, RetryDecision, RetryState,
};
pub use spec::{StageSpec, TriggerRule};
