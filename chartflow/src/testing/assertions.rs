//! Assertions for stage outputs and finished runs.

use crate::core::{StageOutput, StageStatus};
use crate::pipeline::GraphExecutionResult;
use crate::warehouse::TableKind;

use super::MemoryWarehouse;

/// Asserts that the output has the expected status.
pub fn assert_output_status(output: &StageOutput, expected: StageStatus) {
    assert_eq!(
        output.status, expected,
        "Expected status {:?}, got {:?} (error: {:?})",
        expected, output.status, output.error
    );
}

/// Asserts that the output data contains a specific value.
pub fn assert_output_value(output: &StageOutput, key: &str, expected: &serde_json::Value) {
    let actual = output.get(key);
    assert_eq!(
        actual,
        Some(expected),
        "Expected value {expected:?} for key '{key}', got {actual:?}"
    );
}

/// Asserts the final status of every listed stage.
pub fn assert_stage_statuses(result: &GraphExecutionResult, expected: &[(&str, StageStatus)]) {
    for (stage, status) in expected {
        assert_eq!(
            result.status(stage),
            *status,
            "Stage '{stage}' ended {:?}, expected {status:?} (output: {:?})",
            result.status(stage),
            result.outputs.get(*stage)
        );
    }
}

/// Asserts that both staging tables hold no rows.
pub fn assert_staging_empty(warehouse: &MemoryWarehouse) {
    for table in TableKind::ALL {
        assert_eq!(warehouse.rows(table), 0, "{table} still holds rows");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assert_output_status() {
        let output = StageOutput::skip("reason");
        assert_output_status(&output, StageStatus::Skip);
    }

    #[test]
    #[should_panic(expected = "Expected status Ok")]
    fn test_assert_output_status_fails() {
        assert_output_status(&StageOutput::fail("error"), StageStatus::Ok);
    }

    #[test]
    fn test_assert_output_value() {
        let output = StageOutput::ok_value("count", serde_json::json!(42));
        assert_output_value(&output, "count", &serde_json::json!(42));
    }

    #[test]
    #[should_panic(expected = "still holds rows")]
    fn test_assert_staging_empty_fails() {
        let warehouse = MemoryWarehouse::new();
        warehouse.insert_attribute_ids(&["s1"]);
        assert_staging_empty(&warehouse);
    }
}
