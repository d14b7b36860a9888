//! # Chartflow
//!
//! Extracts a music chart and per-track audio features into dated CSV
//! objects, then stages, checks and transforms them through an in-process
//! task graph.
//!
//! - **Extraction**: token, playlist, audio features, CSV upload with backoff
//! - **Task graph**: sensors, trigger rules, branching, terminal stages and
//!   scheduler retries
//! - **Staging**: warehouse tables loaded by COPY and always truncated
//! - **Quality gate**: declarative checks choosing the pass or fail path
//! - **Transformation job**: registered, run and deregistered on ECS
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use chartflow::prelude::*;
//!
//! let config = ChartflowConfig::load(None)?;
//! let graph = build_chart_graph(&config, &components)?;
//! let ctx = Arc::new(PipelineContext::new(RunIdentity::today()));
//! let result = graph.execute(ctx).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod charts;
pub mod config;
pub mod container;
pub mod context;
pub mod core;
pub mod errors;
pub mod events;
pub mod extract;
pub mod observability;
pub mod pipeline;
pub mod quality;
pub mod stages;
pub mod storage;
pub mod tasks;
pub mod warehouse;

#[cfg(test)]
pub(crate) mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::charts::{build_chart_graph, ChartComponents};
    pub use crate::config::{ChartflowConfig, ConfigScope};
    pub use crate::context::{
        ExecutionContext, PipelineContext, RunIdentity, StageContext, StageInputs,
    };
    pub use crate::core::{StageKind, StageOutput, StageStatus};
    pub use crate::errors::{
        ChartflowError, ContractErrorInfo, CycleDetectedError, PipelineValidationError,
        UndeclaredDependencyError,
    };
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::pipeline::{
        GraphExecutionResult, PipelineBuilder, RetryConfig, RunState, StageGraph, StageSpec,
        TriggerRule,
    };
    pub use crate::stages::Stage;
}
