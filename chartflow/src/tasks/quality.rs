//! The data-quality gate.

use crate::context::StageContext;
use crate::core::StageOutput;
use crate::quality::{scan, QualityCheck};
use crate::stages::Stage;
use crate::warehouse::Warehouse;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Runs every check and routes to the pass or the fail path.
///
/// The gate never fails itself: a failing check is a routing decision.
#[derive(Debug, Clone)]
pub struct QualityGateStage {
    name: String,
    warehouse: Arc<dyn Warehouse>,
    checks: Vec<QualityCheck>,
    on_pass: String,
    on_fail: String,
}

impl QualityGateStage {
    /// Creates the gate.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        warehouse: Arc<dyn Warehouse>,
        checks: Vec<QualityCheck>,
        on_pass: impl Into<String>,
        on_fail: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            warehouse,
            checks,
            on_pass: on_pass.into(),
            on_fail: on_fail.into(),
        }
    }
}

#[async_trait]
impl Stage for QualityGateStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _ctx: &StageContext) -> StageOutput {
        let report = scan(self.warehouse.as_ref(), &self.checks).await;
        let failed: Vec<String> = report.failed().iter().map(|o| o.check.clone()).collect();

        let chosen = if failed.is_empty() {
            info!(checks = report.outcomes.len(), "All quality checks passed");
            &self.on_pass
        } else {
            warn!(failed = failed.len(), checks = report.outcomes.len(), "Quality checks failed");
            &self.on_fail
        };

        let mut data = HashMap::new();
        data.insert("passed".to_string(), serde_json::json!(failed.is_empty()));
        data.insert("failed_checks".to_string(), serde_json::json!(failed));
        data.insert(
            "report".to_string(),
            serde_json::to_value(&report).unwrap_or(serde_json::Value::Null),
        );

        StageOutput::branch([chosen.as_str()]).with_data(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QualityConfig;
    use crate::context::{PipelineContext, RunIdentity, StageInputs};
    use crate::testing::MemoryWarehouse;
    use crate::warehouse::TableKind;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    fn ctx() -> StageContext {
        StageContext::new(
            Arc::new(PipelineContext::new(RunIdentity::new(
                NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
            ))),
            "stage_data_tests",
            StageInputs::default(),
        )
    }

    async fn gate(warehouse: MemoryWarehouse) -> StageOutput {
        let warehouse = Arc::new(warehouse);
        for table in TableKind::ALL {
            warehouse.create_table(table).await.unwrap();
        }
        QualityGateStage::new(
            "stage_data_tests",
            warehouse,
            QualityConfig::default().parsed().unwrap(),
            "checks_succeeded",
            "checks_failed",
        )
        .execute(&ctx())
        .await
    }

    #[tokio::test]
    async fn test_clean_data_takes_pass_path() {
        let warehouse = MemoryWarehouse::new();
        warehouse.insert_chart_rows(&[("s1", 40), ("s2", 90)]);
        warehouse.insert_attribute_ids(&["s1", "s2"]);

        let output = gate(warehouse).await;

        assert_eq!(output.branch, Some(vec!["checks_succeeded".to_string()]));
        assert_eq!(output.get("passed"), Some(&serde_json::json!(true)));
    }

    #[tokio::test]
    async fn test_empty_tables_take_fail_path() {
        let output = gate(MemoryWarehouse::new()).await;

        assert_eq!(output.branch, Some(vec!["checks_failed".to_string()]));
        let failed = output.get("failed_checks").unwrap().as_array().unwrap();
        assert!(failed.contains(&serde_json::json!("stg_chart_songs: row_count > 0")));
        assert!(failed.contains(&serde_json::json!("stg_song_attributes: row_count > 0")));
    }
}
