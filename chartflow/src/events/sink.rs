//! Event sink trait and implementations.

use async_trait::async_trait;
use tracing::{info, warn};

/// Trait for event sinks that can receive events.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Emits an event asynchronously.
    ///
    /// # Arguments
    ///
    /// * `event_type` - The type of event (e.g., "stage.started")
    /// * `data` - Optional event data
    async fn emit(&self, event_type: &str, data: Option<serde_json::Value>);

    /// Emits an event without awaiting. Must never panic.
    fn try_emit(&self, event_type: &str, data: Option<serde_json::Value>);
}

/// A no-op event sink that discards all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

#[async_trait]
impl EventSink for NoOpEventSink {
    async fn emit(&self, _event_type: &str, _data: Option<serde_json::Value>) {}

    fn try_emit(&self, _event_type: &str, _data: Option<serde_json::Value>) {}
}

/// An event sink that forwards events to `tracing`.
///
/// Failure events are logged at `WARN`, everything else at `INFO`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingEventSink;

impl LoggingEventSink {
    fn log_event(event_type: &str, data: Option<&serde_json::Value>) {
        let stage = data
            .and_then(|d| d.get("stage"))
            .and_then(serde_json::Value::as_str)
            .unwrap_or("-");

        if event_type.ends_with("failed") || event_type.ends_with("retrying") {
            warn!(event_type, stage, event_data = ?data, "{}", event_type);
        } else {
            info!(event_type, stage, event_data = ?data, "{}", event_type);
        }
    }
}

#[async_trait]
impl EventSink for LoggingEventSink {
    async fn emit(&self, event_type: &str, data: Option<serde_json::Value>) {
        Self::log_event(event_type, data.as_ref());
    }

    fn try_emit(&self, event_type: &str, data: Option<serde_json::Value>) {
        Self::log_event(event_type, data.as_ref());
    }
}

/// An event sink that keeps every event in memory, for tests.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: parking_lot::RwLock<Vec<(String, Option<serde_json::Value>)>>,
}

impl CollectingEventSink {
    /// Creates a new collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events.
    #[must_use]
    pub fn events(&self) -> Vec<(String, Option<serde_json::Value>)> {
        self.events.read().clone()
    }

    /// Returns the number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if no events have been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Returns events matching a type prefix.
    #[must_use]
    pub fn events_of_type(&self, type_prefix: &str) -> Vec<(String, Option<serde_json::Value>)> {
        self.events
            .read()
            .iter()
            .filter(|(t, _)| t.starts_with(type_prefix))
            .cloned()
            .collect()
    }

    /// Returns the `stage` field of every event with exactly this type, in order.
    #[must_use]
    pub fn stages_with(&self, event_type: &str) -> Vec<String> {
        self.events
            .read()
            .iter()
            .filter(|(t, _)| t == event_type)
            .filter_map(|(_, data)| {
                data.as_ref()
                    .and_then(|d| d.get("stage"))
                    .and_then(serde_json::Value::as_str)
                    .map(str::to_string)
            })
            .collect()
    }
}

#[async_trait]
impl EventSink for CollectingEventSink {
    async fn emit(&self, event_type: &str, data: Option<serde_json::Value>) {
        self.events.write().push((event_type.to_string(), data));
    }

    fn try_emit(&self, event_type: &str, data: Option<serde_json::Value>) {
        self.events.write().push((event_type.to_string(), data));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_logging_sink_accepts_any_payload() {
        let sink = LoggingEventSink;
        sink.emit("stage.failed", Some(serde_json::json!({"stage": "copy"}))).await;
        sink.try_emit("run.started", None);
    }

    #[tokio::test]
    async fn test_collecting_sink_filters_by_prefix() {
        let sink = CollectingEventSink::new();
        assert!(sink.is_empty());

        sink.emit("stage.started", Some(serde_json::json!({"stage": "a"}))).await;
        sink.emit("stage.completed", Some(serde_json::json!({"stage": "a"}))).await;
        sink.try_emit("run.completed", None);

        assert_eq!(sink.len(), 3);
        assert_eq!(sink.events_of_type("stage.").len(), 2);
        assert_eq!(sink.events()[2].0, "run.completed");
    }

    #[tokio::test]
    async fn test_stages_with_preserves_order() {
        let sink = CollectingEventSink::new();
        sink.emit("stage.skipped", Some(serde_json::json!({"stage": "b"}))).await;
        sink.emit("stage.completed", Some(serde_json::json!({"stage": "a"}))).await;
        sink.emit("stage.skipped", Some(serde_json::json!({"stage": "c"}))).await;

        assert_eq!(sink.stages_with("stage.skipped"), vec!["b", "c"]);
    }
}
