//! Graph builder with validation.

use super::{RetryConfig, StageGraph, StageSpec};
use crate::core::StageKind;
use crate::errors::{ContractErrorInfo, CycleDetectedError, PipelineValidationError};
use crate::stages::Stage;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Builder for creating validated stage graphs.
///
/// Stages must be added after the stages they depend on, so the graph is
/// acyclic by construction; the cycle check guards specs inserted through
/// [`PipelineBuilder::add_stage_spec`] with stale dependency sets.
#[derive(Debug, Clone)]
pub struct PipelineBuilder {
    name: String,
    stages: HashMap<String, StageSpec>,
    stage_order: Vec<String>,
    default_retry: RetryConfig,
    strict_inputs: bool,
}

impl PipelineBuilder {
    /// Creates a new pipeline builder. Stages do not retry unless a default
    /// retry policy is set.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: HashMap::new(),
            stage_order: Vec::new(),
            default_retry: RetryConfig::none(),
            strict_inputs: true,
        }
    }

    /// Sets the retry policy for stages without their own.
    #[must_use]
    pub fn with_default_retry(mut self, retry: RetryConfig) -> Self {
        self.default_retry = retry;
        self
    }

    /// Enables or disables strict input access (on by default).
    #[must_use]
    pub fn with_strict_inputs(mut self, strict: bool) -> Self {
        self.strict_inputs = strict;
        self
    }

    /// Adds a plain work stage.
    ///
    /// # Errors
    ///
    /// Returns an error if validation fails (missing dependency, duplicate name, etc.)
    pub fn stage(
        mut self,
        name: impl Into<String>,
        runner: Arc<dyn Stage>,
        dependencies: &[&str],
    ) -> Result<Self, PipelineValidationError> {
        let spec = StageSpec::new(name, runner).with_dependencies(dependencies.iter().copied());
        self.add_stage_spec(spec)?;
        Ok(self)
    }

    /// Adds a fully configured stage.
    ///
    /// # Errors
    ///
    /// Returns an error if validation fails.
    pub fn spec(mut self, spec: StageSpec) -> Result<Self, PipelineValidationError> {
        self.add_stage_spec(spec)?;
        Ok(self)
    }

    /// Adds a stage with a specification.
    ///
    /// # Errors
    ///
    /// Returns an error if validation fails.
    pub fn add_stage_spec(&mut self, spec: StageSpec) -> Result<(), PipelineValidationError> {
        spec.validate()?;

        if self.stages.contains_key(&spec.name) {
            return Err(PipelineValidationError::new(format!(
                "Stage '{}' is defined twice",
                spec.name
            ))
            .with_stages(vec![spec.name.clone()])
            .with_error_info(
                ContractErrorInfo::new(
                    "CONTRACT-004-CONFLICT",
                    format!("Stage name '{}' is already taken", spec.name),
                )
                .with_fix_hint("Give every stage a unique name."),
            ));
        }

        for dep in spec.sorted_dependencies() {
            if !self.stages.contains_key(dep) {
                return Err(PipelineValidationError::new(format!(
                    "Stage '{}' depends on unknown stage '{}'",
                    spec.name, dep
                ))
                .with_stages(vec![spec.name.clone(), dep.to_string()])
                .with_error_info(
                    ContractErrorInfo::new(
                        "CONTRACT-004-MISSING_DEP",
                        format!("Dependency '{dep}' not found"),
                    )
                    .with_fix_hint(
                        "Ensure the dependency is added before the stage that depends on it.",
                    ),
                ));
            }
        }

        self.stage_order.push(spec.name.clone());
        self.stages.insert(spec.name.clone(), spec);

        self.detect_cycles()?;

        Ok(())
    }

    /// Builds the graph.
    ///
    /// # Errors
    ///
    /// Returns an error if the builder has no stages, a terminal stage has
    /// dependents, or a branch stage has no children.
    pub fn build(self) -> Result<StageGraph, PipelineValidationError> {
        if self.stages.is_empty() {
            return Err(PipelineValidationError::new("Pipeline has no stages").with_error_info(
                ContractErrorInfo::new("CONTRACT-004-EMPTY", "Cannot build an empty pipeline")
                    .with_fix_hint("Add at least one stage to the pipeline before building."),
            ));
        }

        for name in &self.stage_order {
            let Some(spec) = self.stages.get(name) else {
                continue;
            };
            let dependents: Vec<String> = self
                .stage_order
                .iter()
                .filter(|other| {
                    self.stages
                        .get(*other)
                        .is_some_and(|s| s.dependencies.contains(name))
                })
                .cloned()
                .collect();

            match spec.kind {
                StageKind::Terminal if !dependents.is_empty() => {
                    return Err(PipelineValidationError::new(format!(
                        "Terminal stage '{name}' has dependents: {}",
                        dependents.join(", ")
                    ))
                    .with_stages(dependents)
                    .with_error_info(
                        ContractErrorInfo::new(
                            "CONTRACT-004-TERMINAL",
                            "A terminal stage ends the run and cannot have dependents",
                        )
                        .with_context_entry("stage", name.clone()),
                    ));
                }
                StageKind::Branch if dependents.is_empty() => {
                    return Err(PipelineValidationError::new(format!(
                        "Branch stage '{name}' has no children to choose from"
                    ))
                    .with_stages(vec![name.clone()])
                    .with_error_info(
                        ContractErrorInfo::new("CONTRACT-004-BRANCH", "Branch stage without children")
                            .with_fix_hint("Add the stages the branch selects between."),
                    ));
                }
                _ => {}
            }
        }

        Ok(StageGraph::new(
            self.name,
            self.stages,
            &self.stage_order,
            self.default_retry,
            self.strict_inputs,
        ))
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    fn detect_cycles(&self) -> Result<(), CycleDetectedError> {
        let mut visited = HashSet::new();
        let mut rec_stack = HashSet::new();
        let mut path = Vec::new();

        for name in &self.stage_order {
            if !visited.contains(name) {
                if let Some(cycle) = self.dfs_cycle(name, &mut visited, &mut rec_stack, &mut path) {
                    return Err(CycleDetectedError::new(cycle));
                }
            }
        }

        Ok(())
    }

    fn dfs_cycle(
        &self,
        node: &str,
        visited: &mut HashSet<String>,
        rec_stack: &mut HashSet<String>,
        path: &mut Vec<String>,
    ) -> Option<Vec<String>> {
        visited.insert(node.to_string());
        rec_stack.insert(node.to_string());
        path.push(node.to_string());

        if let Some(spec) = self.stages.get(node) {
            for dep in spec.sorted_dependencies() {
                if !visited.contains(dep) {
                    if let Some(cycle) = self.dfs_cycle(dep, visited, rec_stack, path) {
                        return Some(cycle);
                    }
                } else if rec_stack.contains(dep) {
                    let cycle_start = path.iter().position(|n| n == dep).unwrap_or(0);
                    let mut cycle: Vec<String> = path[cycle_start..].to_vec();
                    cycle.push(dep.to_string());
                    return Some(cycle);
                }
            }
        }

        path.pop();
        rec_stack.remove(node);
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::NoOpStage;

    fn noop(name: &str) -> Arc<dyn Stage> {
        Arc::new(NoOpStage::new(name))
    }

    #[test]
    fn test_builder_with_dependencies() {
        let builder = PipelineBuilder::new("test")
            .stage("stage1", noop("stage1"), &[])
            .unwrap()
            .stage("stage2", noop("stage2"), &["stage1"])
            .unwrap();

        assert_eq!(builder.name(), "test");
        assert_eq!(builder.stage_count(), 2);
    }

    #[test]
    fn test_builder_missing_dependency() {
        let err = PipelineBuilder::new("test")
            .stage("stage1", noop("stage1"), &["missing"])
            .unwrap_err();

        assert_eq!(err.code(), Some("CONTRACT-004-MISSING_DEP"));
    }

    #[test]
    fn test_builder_duplicate_stage() {
        let err = PipelineBuilder::new("test")
            .stage("a", noop("a"), &[])
            .unwrap()
            .stage("a", noop("a"), &[])
            .unwrap_err();

        assert_eq!(err.code(), Some("CONTRACT-004-CONFLICT"));
    }

    #[test]
    fn test_builder_cycle_detection() {
        let mut builder = PipelineBuilder::new("test")
            .stage("a", noop("a"), &[])
            .unwrap()
            .stage("b", noop("b"), &["a"])
            .unwrap();

        // Rewire "a" behind the builder's back to close the loop.
        if let Some(spec) = builder.stages.get_mut("a") {
            spec.dependencies.insert("b".to_string());
        }

        let err = builder.detect_cycles().unwrap_err();
        assert_eq!(err.error_info.code, "CONTRACT-004-CYCLE");
        assert_eq!(err.cycle_path.first(), err.cycle_path.last());
    }

    #[test]
    fn test_builder_empty_build() {
        let err = PipelineBuilder::new("test").build().unwrap_err();
        assert_eq!(err.code(), Some("CONTRACT-004-EMPTY"));
    }

    #[test]
    fn test_terminal_with_dependents_rejected() {
        let err = PipelineBuilder::new("test")
            .spec(StageSpec::new("fail_run", noop("fail_run")).with_kind(StageKind::Terminal))
            .unwrap()
            .stage("after", noop("after"), &["fail_run"])
            .unwrap()
            .build()
            .unwrap_err();

        assert_eq!(err.code(), Some("CONTRACT-004-TERMINAL"));
        assert_eq!(err.stages, vec!["after".to_string()]);
    }

    #[test]
    fn test_childless_branch_rejected() {
        let err = PipelineBuilder::new("test")
            .spec(StageSpec::new("gate", noop("gate")).with_kind(StageKind::Branch))
            .unwrap()
            .build()
            .unwrap_err();

        assert_eq!(err.code(), Some("CONTRACT-004-BRANCH"));
    }

    #[test]
    fn test_builder_build_success() {
        let graph = PipelineBuilder::new("test")
            .stage("stage1", noop("stage1"), &[])
            .unwrap()
            .stage("stage2", noop("stage2"), &["stage1"])
            .unwrap()
            .build()
            .unwrap();

        assert_eq!(graph.name(), "test");
        assert_eq!(graph.execution_order(), ["stage1", "stage2"]);
    }
}
