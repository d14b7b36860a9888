//! The terminal stage of the failure path.

use crate::context::StageContext;
use crate::core::StageOutput;
use crate::stages::Stage;
use async_trait::async_trait;
use tracing::error;

/// Marks the run failed once cleanup has finished.
#[derive(Debug, Clone)]
pub struct FailRunStage {
    name: String,
    gate_stage: String,
}

impl FailRunStage {
    /// Creates the stage; `gate_stage` is read for the list of failed checks.
    #[must_use]
    pub fn new(name: impl Into<String>, gate_stage: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            gate_stage: gate_stage.into(),
        }
    }
}

#[async_trait]
impl Stage for FailRunStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &StageContext) -> StageOutput {
        let failed = ctx
            .inputs()
            .get_value(&self.gate_stage, "failed_checks")
            .ok()
            .flatten()
            .and_then(|v| v.as_array().map(Vec::len))
            .unwrap_or(0);

        let reason = if failed == 0 {
            "data quality checks failed".to_string()
        } else {
            format!("{failed} data quality check(s) failed")
        };
        error!(stage = %self.name, %reason, "Run ends on the failure path");
        StageOutput::ok_value("reason", serde_json::json!(reason))
    }
}
