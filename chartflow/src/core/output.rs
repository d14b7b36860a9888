//! Stage output type with factory methods.

use super::StageStatus;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The output of a stage execution.
///
/// `StageOutput` is immutable once created and provides factory methods
/// for creating outputs with different statuses. Branch stages return the
/// names of the children that should run in `branch`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageOutput {
    /// The status of the stage execution.
    pub status: StageStatus,

    /// The output data (for successful executions).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<HashMap<String, serde_json::Value>>,

    /// Additional metadata.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,

    /// Error message (for failed executions).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Skip reason (for skipped executions).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,

    /// Children chosen by a branch stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<Vec<String>>,
}

impl Default for StageOutput {
    fn default() -> Self {
        Self::ok_empty()
    }
}

impl StageOutput {
    fn with_status(status: StageStatus) -> Self {
        Self {
            status,
            data: None,
            metadata: HashMap::new(),
            error: None,
            skip_reason: None,
            branch: None,
        }
    }

    /// Creates a successful output with data.
    #[must_use]
    pub fn ok(data: HashMap<String, serde_json::Value>) -> Self {
        Self {
            data: Some(data),
            ..Self::with_status(StageStatus::Ok)
        }
    }

    /// Creates a successful output with no data.
    #[must_use]
    pub fn ok_empty() -> Self {
        Self::with_status(StageStatus::Ok)
    }

    /// Creates a successful output with a single value.
    #[must_use]
    pub fn ok_value(key: impl Into<String>, value: serde_json::Value) -> Self {
        let mut data = HashMap::new();
        data.insert(key.into(), value);
        Self::ok(data)
    }

    /// Creates a skip output with a reason.
    #[must_use]
    pub fn skip(reason: impl Into<String>) -> Self {
        Self {
            skip_reason: Some(reason.into()),
            ..Self::with_status(StageStatus::Skip)
        }
    }

    /// Creates a failure output with an error message.
    #[must_use]
    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::with_status(StageStatus::Fail)
        }
    }

    /// Creates the output recorded for a stage that never ran because an
    /// upstream stage failed.
    #[must_use]
    pub fn upstream_failed(reason: impl Into<String>) -> Self {
        Self {
            error: Some(reason.into()),
            ..Self::with_status(StageStatus::UpstreamFailed)
        }
    }

    /// Creates a successful branch output selecting the given children.
    #[must_use]
    pub fn branch<I, S>(chosen: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            branch: Some(chosen.into_iter().map(Into::into).collect()),
            ..Self::with_status(StageStatus::Ok)
        }
    }

    /// Adds a single metadata entry.
    #[must_use]
    pub fn add_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Adds data to the output (merges with existing data).
    #[must_use]
    pub fn with_data(mut self, data: HashMap<String, serde_json::Value>) -> Self {
        match &mut self.data {
            Some(existing) => existing.extend(data),
            None => self.data = Some(data),
        }
        self
    }

    /// Returns true if the output indicates success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Returns true if the output indicates failure.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.status.is_failure()
    }

    /// Gets a value from the data.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.data.as_ref().and_then(|d| d.get(key))
    }

    /// Gets a string value from the data.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(serde_json::Value::as_str)
    }
}
