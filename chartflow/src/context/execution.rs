//! Mutable execution contexts for pipeline and stage execution.

use super::{RunIdentity, StageInputs};
use crate::events::{EventSink, NoOpEventSink};
use chrono::NaiveDate;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Behaviour shared by the run context and the per-stage context.
pub trait ExecutionContext: Send + Sync {
    /// Returns the pipeline run ID.
    fn pipeline_run_id(&self) -> Uuid;

    /// Returns the logical run date.
    fn run_date(&self) -> NaiveDate;

    /// Returns the topology name.
    fn topology(&self) -> Option<&str>;

    /// Emits an event enriched with the run's identifiers.
    fn try_emit_event(&self, event_type: &str, data: Option<serde_json::Value>);

    /// Checks if the run has been cancelled.
    fn is_cancelled(&self) -> bool;
}

/// The context for one run of the graph.
pub struct PipelineContext {
    run_id: RunIdentity,
    topology: Option<String>,
    event_sink: Arc<dyn EventSink>,
    cancelled: AtomicBool,
    cancel_reason: RwLock<Option<String>>,
}

impl std::fmt::Debug for PipelineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineContext")
            .field("run_id", &self.run_id)
            .field("topology", &self.topology)
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl PipelineContext {
    /// Creates a new pipeline context with a no-op event sink.
    #[must_use]
    pub fn new(run_id: RunIdentity) -> Self {
        Self {
            run_id,
            topology: None,
            event_sink: Arc::new(NoOpEventSink),
            cancelled: AtomicBool::new(false),
            cancel_reason: RwLock::new(None),
        }
    }

    /// Sets the topology name.
    #[must_use]
    pub fn with_topology(mut self, topology: impl Into<String>) -> Self {
        self.topology = Some(topology.into());
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    /// Marks the context as cancelled with a reason.
    ///
    /// Stages already running finish; nothing new is scheduled.
    pub fn mark_cancelled_with_reason(&self, reason: impl Into<String>) {
        self.cancelled.store(true, Ordering::SeqCst);
        *self.cancel_reason.write() = Some(reason.into());
    }

    /// Returns the cancel reason, if any.
    #[must_use]
    pub fn cancel_reason(&self) -> Option<String> {
        self.cancel_reason.read().clone()
    }

    /// Returns the run identity.
    #[must_use]
    pub fn run_id(&self) -> &RunIdentity {
        &self.run_id
    }

    /// Returns the event sink.
    #[must_use]
    pub fn event_sink(&self) -> &Arc<dyn EventSink> {
        &self.event_sink
    }

    fn enrich(&self, data: Option<serde_json::Value>) -> serde_json::Value {
        let mut enriched = data.unwrap_or_else(|| serde_json::json!({}));
        if let serde_json::Value::Object(ref mut map) = enriched {
            map.insert(
                "pipeline_run_id".to_string(),
                serde_json::json!(self.run_id.pipeline_run_id.to_string()),
            );
            map.insert("run_date".to_string(), serde_json::json!(self.run_id.run_date_str()));
            if let Some(ref topology) = self.topology {
                map.insert("topology".to_string(), serde_json::json!(topology));
            }
        }
        enriched
    }
}

impl ExecutionContext for PipelineContext {
    fn pipeline_run_id(&self) -> Uuid {
        self.run_id.pipeline_run_id
    }

    fn run_date(&self) -> NaiveDate {
        self.run_id.run_date
    }

    fn topology(&self) -> Option<&str> {
        self.topology.as_deref()
    }

    fn try_emit_event(&self, event_type: &str, data: Option<serde_json::Value>) {
        self.event_sink.try_emit(event_type, Some(self.enrich(data)));
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// The context for a single attempt of a stage.
#[derive(Debug)]
pub struct StageContext {
    pipeline_ctx: Arc<PipelineContext>,
    stage_name: String,
    inputs: StageInputs,
    attempt: usize,
}

impl StageContext {
    /// Creates a new stage context for the first attempt.
    #[must_use]
    pub fn new(
        pipeline_ctx: Arc<PipelineContext>,
        stage_name: impl Into<String>,
        inputs: StageInputs,
    ) -> Self {
        Self {
            pipeline_ctx,
            stage_name: stage_name.into(),
            inputs,
            attempt: 1,
        }
    }

    /// Sets the 1-based attempt number.
    #[must_use]
    pub fn with_attempt(mut self, attempt: usize) -> Self {
        self.attempt = attempt;
        self
    }

    /// Returns the stage name.
    #[must_use]
    pub fn stage_name(&self) -> &str {
        &self.stage_name
    }

    /// Returns the stage inputs.
    #[must_use]
    pub fn inputs(&self) -> &StageInputs {
        &self.inputs
    }

    /// Returns the 1-based attempt number.
    #[must_use]
    pub fn attempt(&self) -> usize {
        self.attempt
    }

    /// Returns the pipeline context.
    #[must_use]
    pub fn pipeline_ctx(&self) -> &Arc<PipelineContext> {
        &self.pipeline_ctx
    }
}

impl ExecutionContext for StageContext {
    fn pipeline_run_id(&self) -> Uuid {
        self.pipeline_ctx.pipeline_run_id()
    }

    fn run_date(&self) -> NaiveDate {
        self.pipeline_ctx.run_date()
    }

    fn topology(&self) -> Option<&str> {
        self.pipeline_ctx.topology()
    }

    fn try_emit_event(&self, event_type: &str, data: Option<serde_json::Value>) {
        let mut enriched = self.pipeline_ctx.enrich(data);
        if let serde_json::Value::Object(ref mut map) = enriched {
            map.insert("stage".to_string(), serde_json::json!(&self.stage_name));
            map.insert("attempt".to_string(), serde_json::json!(self.attempt));
        }
        self.pipeline_ctx.event_sink.try_emit(event_type, Some(enriched));
    }

    fn is_cancelled(&self) -> bool {
        self.pipeline_ctx.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CollectingEventSink;

    fn run_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()
    }

    #[test]
    fn test_pipeline_context_cancellation() {
        let ctx = PipelineContext::new(RunIdentity::new(run_date()));
        assert!(!ctx.is_cancelled());

        ctx.mark_cancelled_with_reason("operator stop");
        assert!(ctx.is_cancelled());
        assert_eq!(ctx.cancel_reason().as_deref(), Some("operator stop"));
    }

    #[test]
    fn test_stage_context_enriches_events() {
        let sink = Arc::new(CollectingEventSink::new());
        let pipeline_ctx = Arc::new(
            PipelineContext::new(RunIdentity::new(run_date()))
                .with_topology("chart_songs")
                .with_event_sink(sink.clone()),
        );
        let stage_ctx = StageContext::new(pipeline_ctx.clone(), "copy", StageInputs::default())
            .with_attempt(2);

        stage_ctx.try_emit_event("stage.started", None);

        let events = sink.events();
        let data = events[0].1.clone().unwrap();
        assert_eq!(data["stage"], "copy");
        assert_eq!(data["attempt"], 2);
        assert_eq!(data["run_date"], "2024-01-15");
        assert_eq!(data["topology"], "chart_songs");
        assert_eq!(stage_ctx.pipeline_run_id(), pipeline_ctx.pipeline_run_id());
    }
}
