//! Event sinks for run observability.
//!
//! The scheduler reports every state change (`run.started`, `stage.started`,
//! `stage.retrying`, `stage.completed`, `stage.failed`, `stage.skipped`,
//! `stage.upstream_failed`, `run.completed`) to the sink attached to the
//! pipeline context.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

/// Event type names emitted by the scheduler.
pub mod names {
    /// A run has begun.
    pub const RUN_STARTED: &str = "run.started";
    /// A run has finished, successfully or not.
    pub const RUN_COMPLETED: &str = "run.completed";
    /// A stage attempt has begun.
    pub const STAGE_STARTED: &str = "stage.started";
    /// A stage attempt failed and will be retried.
    pub const STAGE_RETRYING: &str = "stage.retrying";
    /// A stage finished with `ok`.
    pub const STAGE_COMPLETED: &str = "stage.completed";
    /// A stage exhausted its attempts.
    pub const STAGE_FAILED: &str = "stage.failed";
    /// A stage was skipped.
    pub const STAGE_SKIPPED: &str = "stage.skipped";
    /// A stage was not run because something upstream failed.
    pub const STAGE_UPSTREAM_FAILED: &str = "stage.upstream_failed";
}
