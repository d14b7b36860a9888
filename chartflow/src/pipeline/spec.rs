//! Stage specifications.

use super::RetryConfig;
use crate::core::StageKind;
use crate::errors::PipelineValidationError;
use crate::stages::Stage;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// When a stage becomes runnable relative to its upstream stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TriggerRule {
    /// Run only if every upstream stage finished `ok`.
    #[default]
    AllSuccess,
    /// Run once every upstream stage is finished, whatever the outcome,
    /// unless all of them were skipped.
    AllDone,
}

impl fmt::Display for TriggerRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AllSuccess => write!(f, "all_success"),
            Self::AllDone => write!(f, "all_done"),
        }
    }
}

/// Specification for a single stage in a graph.
#[derive(Debug, Clone)]
pub struct StageSpec {
    /// The unique name of the stage.
    pub name: String,
    /// The stage implementation.
    pub runner: Arc<dyn Stage>,
    /// Names of stages this stage depends on.
    pub dependencies: HashSet<String>,
    /// The kind of stage.
    pub kind: StageKind,
    /// The trigger rule.
    pub trigger_rule: TriggerRule,
    /// Retry policy overriding the graph default.
    pub retry: Option<RetryConfig>,
}

impl StageSpec {
    /// Creates a new stage specification.
    #[must_use]
    pub fn new(name: impl Into<String>, runner: Arc<dyn Stage>) -> Self {
        Self {
            name: name.into(),
            runner,
            dependencies: HashSet::new(),
            kind: StageKind::Work,
            trigger_rule: TriggerRule::AllSuccess,
            retry: None,
        }
    }

    /// Sets the dependencies.
    #[must_use]
    pub fn with_dependencies(mut self, deps: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    /// Adds a dependency.
    #[must_use]
    pub fn with_dependency(mut self, dep: impl Into<String>) -> Self {
        self.dependencies.insert(dep.into());
        self
    }

    /// Sets the stage kind.
    #[must_use]
    pub fn with_kind(mut self, kind: StageKind) -> Self {
        self.kind = kind;
        self
    }

    /// Sets the trigger rule.
    #[must_use]
    pub fn with_trigger_rule(mut self, rule: TriggerRule) -> Self {
        self.trigger_rule = rule;
        self
    }

    /// Overrides the retry policy for this stage.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Returns the dependencies in sorted order.
    #[must_use]
    pub fn sorted_dependencies(&self) -> Vec<&str> {
        let mut deps: Vec<&str> = self.dependencies.iter().map(String::as_str).collect();
        deps.sort_unstable();
        deps
    }

    /// Validates the stage specification.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is blank or the stage depends on itself.
    pub fn validate(&self) -> Result<(), PipelineValidationError> {
        if self.name.trim().is_empty() {
            return Err(PipelineValidationError::new("Stage name cannot be empty"));
        }
        if self.dependencies.contains(&self.name) {
            return Err(PipelineValidationError::new(format!(
                "Stage '{}' cannot depend on itself",
                self.name
            ))
            .with_stages(vec![self.name.clone()]));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::NoOpStage;

    #[test]
    fn test_stage_spec_creation() {
        let spec = StageSpec::new("deregister_task", Arc::new(NoOpStage::new("deregister_task")))
            .with_dependencies(["run_dbt_container"])
            .with_trigger_rule(TriggerRule::AllDone);

        assert_eq!(spec.kind, StageKind::Work);
        assert_eq!(spec.trigger_rule, TriggerRule::AllDone);
        assert_eq!(spec.sorted_dependencies(), vec!["run_dbt_container"]);
        assert!(spec.retry.is_none());
    }

    #[test]
    fn test_stage_spec_self_dependency() {
        let spec = StageSpec::new("a", Arc::new(NoOpStage::new("a"))).with_dependency("a");
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_blank_name_rejected() {
        let spec = StageSpec::new("  ", Arc::new(NoOpStage::new("x")));
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_trigger_rule_display() {
        assert_eq!(TriggerRule::AllSuccess.to_string(), "all_success");
        assert_eq!(TriggerRule::AllDone.to_string(), "all_done");
    }
}
