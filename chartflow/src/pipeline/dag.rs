//! Stage graph execution engine.
//!
//! Stages are started as soon as their trigger rule is satisfied, so
//! independent stages run concurrently. Readiness is re-evaluated after
//! every completion until nothing else can be decided; skips and upstream
//! failures propagate without spawning anything.

use super::{should_retry, RetryConfig, RetryDecision, RetryState, StageSpec, TriggerRule};
use crate::context::{ExecutionContext, PipelineContext, StageContext, StageInputs};
use crate::core::{StageKind, StageOutput, StageStatus};
use crate::errors::{ChartflowError, ContractErrorInfo, PipelineValidationError};
use crate::events::names;
use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;

type StageData = HashMap<String, HashMap<String, serde_json::Value>>;

/// Final state of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunState {
    /// No stage failed and no terminal stage was reached.
    Succeeded,
    /// A stage failed, a terminal stage was reached, or the run was cancelled.
    Failed {
        /// Human-readable cause.
        reason: String,
    },
}

impl RunState {
    /// Returns true for [`RunState::Succeeded`].
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

/// Result of executing a stage graph.
#[derive(Debug)]
pub struct GraphExecutionResult {
    /// Per-stage outputs, including the synthetic outputs of skipped stages.
    pub outputs: HashMap<String, StageOutput>,
    /// Final per-stage status.
    pub statuses: HashMap<String, StageStatus>,
    /// Attempts made per executed stage.
    pub attempts: HashMap<String, usize>,
    /// Total execution time in milliseconds.
    pub duration_ms: f64,
    /// Final run state.
    pub state: RunState,
}

impl GraphExecutionResult {
    /// Returns the final status of a stage (`Pending` if it never resolved).
    #[must_use]
    pub fn status(&self, stage: &str) -> StageStatus {
        self.statuses.get(stage).copied().unwrap_or_default()
    }

    /// Returns true if the run succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.state.is_success()
    }
}

struct StageRun {
    name: String,
    output: StageOutput,
    attempts: usize,
}

enum Readiness {
    Wait,
    Run,
    Skip(String),
    UpstreamFailed(String),
}

/// A directed acyclic graph of stages.
#[derive(Debug)]
pub struct StageGraph {
    name: String,
    stages: HashMap<String, StageSpec>,
    execution_order: Vec<String>,
    children: HashMap<String, Vec<String>>,
    ancestors: HashMap<String, HashSet<String>>,
    default_retry: RetryConfig,
    strict_inputs: bool,
}

impl StageGraph {
    /// Creates a new stage graph. Use [`super::PipelineBuilder`] for validation.
    #[must_use]
    pub fn new(
        name: String,
        stages: HashMap<String, StageSpec>,
        stage_order: &[String],
        default_retry: RetryConfig,
        strict_inputs: bool,
    ) -> Self {
        let execution_order = topological_sort(&stages, stage_order);

        let mut children: HashMap<String, Vec<String>> = HashMap::new();
        let mut ancestors: HashMap<String, HashSet<String>> = HashMap::new();
        for name in &execution_order {
            let mut upstream = HashSet::new();
            if let Some(spec) = stages.get(name) {
                for dep in spec.sorted_dependencies() {
                    children.entry(dep.to_string()).or_default().push(name.clone());
                    upstream.insert(dep.to_string());
                    if let Some(above) = ancestors.get(dep) {
                        upstream.extend(above.iter().cloned());
                    }
                }
            }
            ancestors.insert(name.clone(), upstream);
        }

        Self {
            name,
            stages,
            execution_order,
            children,
            ancestors,
            default_retry,
            strict_inputs,
        }
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

    /// Returns the execution order.
    #[must_use]
    pub fn execution_order(&self) -> &[String] {
        &self.execution_order
    }

    /// Returns a stage specification by name.
    #[must_use]
    pub fn stage(&self, name: &str) -> Option<&StageSpec> {
        self.stages.get(name)
    }

    /// Returns stage specifications in execution order.
    pub fn specs(&self) -> impl Iterator<Item = &StageSpec> {
        self.execution_order
            .iter()
            .filter_map(|name| self.stages.get(name))
    }

    /// Returns the direct children of a stage in execution order.
    #[must_use]
    pub fn children(&self, name: &str) -> &[String] {
        self.children.get(name).map_or(&[], Vec::as_slice)
    }

    /// Returns the retry policy a stage runs with.
    #[must_use]
    pub fn retry_policy(&self, spec: &StageSpec) -> RetryConfig {
        if spec.kind == StageKind::Terminal {
            return RetryConfig::none();
        }
        spec.retry.clone().unwrap_or_else(|| self.default_retry.clone())
    }

    /// Executes the graph to completion.
    ///
    /// # Errors
    ///
    /// Returns an error if a branch stage selects a stage that is not one of
    /// its children, if a stage task panics, or if the graph deadlocks.
    /// Stage failures are not errors; they are reported in the result.
    pub async fn execute(
        &self,
        ctx: Arc<PipelineContext>,
    ) -> Result<GraphExecutionResult, ChartflowError> {
        let start = Instant::now();

        let completed: Arc<RwLock<StageData>> = Arc::new(RwLock::new(HashMap::new()));
        let mut statuses: HashMap<String, StageStatus> = self
            .stages
            .keys()
            .map(|name| (name.clone(), StageStatus::Pending))
            .collect();
        let mut outputs: HashMap<String, StageOutput> = HashMap::new();
        let mut attempts: HashMap<String, usize> = HashMap::new();
        let mut excluded: HashMap<String, String> = HashMap::new();
        let mut terminal_reason: Option<String> = None;
        let mut active: FuturesUnordered<JoinHandle<StageRun>> = FuturesUnordered::new();

        ctx.try_emit_event(
            names::RUN_STARTED,
            Some(serde_json::json!({
                "pipeline": &self.name,
                "stages": self.stages.len(),
            })),
        );

        loop {
            if !ctx.is_cancelled() {
                self.schedule_ready(&ctx, &completed, &mut statuses, &mut outputs, &excluded, &mut active);
            }

            let Some(joined) = active.next().await else {
                break;
            };
            let run = match joined {
                Ok(run) => run,
                Err(e) => {
                    let err = ChartflowError::Internal(format!("Task join error: {e}"));
                    return Err(self.abandon(&ctx, &active, start, err));
                }
            };

            if run.output.status == StageStatus::Ok {
                if let Some(chosen) = &run.output.branch {
                    if let Err(e) = self.apply_branch(&run.name, chosen, &mut excluded) {
                        return Err(self.abandon(&ctx, &active, start, e.into()));
                    }
                }
                if self.stages.get(&run.name).is_some_and(|s| s.kind == StageKind::Terminal) {
                    let detail = run
                        .output
                        .get_str("reason")
                        .map_or_else(String::new, |r| format!(": {r}"));
                    terminal_reason = Some(format!("Terminal stage '{}' reached{detail}", run.name));
                }
            }
            if let Some(data) = &run.output.data {
                completed.write().insert(run.name.clone(), data.clone());
            }

            statuses.insert(run.name.clone(), run.output.status);
            attempts.insert(run.name.clone(), run.attempts);
            outputs.insert(run.name, run.output);
        }

        let pending: Vec<&String> = self
            .execution_order
            .iter()
            .filter(|name| statuses.get(*name) == Some(&StageStatus::Pending))
            .collect();

        let state = if ctx.is_cancelled() {
            RunState::Failed {
                reason: format!(
                    "Run cancelled: {}",
                    ctx.cancel_reason().unwrap_or_else(|| "no reason given".to_string())
                ),
            }
        } else if !pending.is_empty() {
            let err = ChartflowError::Internal(format!(
                "Deadlocked stage graph; remaining stages: {pending:?}"
            ));
            return Err(self.abandon(&ctx, &active, start, err));
        } else if let Some(reason) = terminal_reason {
            RunState::Failed { reason }
        } else {
            let failed: Vec<&str> = self
                .execution_order
                .iter()
                .filter(|name| statuses.get(*name) == Some(&StageStatus::Fail))
                .map(String::as_str)
                .collect();
            if failed.is_empty() {
                RunState::Succeeded
            } else {
                RunState::Failed {
                    reason: format!("Stage(s) failed: {}", failed.join(", ")),
                }
            }
        };

        let duration_ms = start.elapsed().as_secs_f64() * 1000.0;
        ctx.try_emit_event(
            names::RUN_COMPLETED,
            Some(serde_json::json!({
                "pipeline": &self.name,
                "result": &state,
                "duration_ms": duration_ms,
            })),
        );

        Ok(GraphExecutionResult {
            outputs,
            statuses,
            attempts,
            duration_ms,
            state,
        })
    }

    fn schedule_ready(
        &self,
        ctx: &Arc<PipelineContext>,
        completed: &Arc<RwLock<StageData>>,
        statuses: &mut HashMap<String, StageStatus>,
        outputs: &mut HashMap<String, StageOutput>,
        excluded: &HashMap<String, String>,
        active: &mut FuturesUnordered<JoinHandle<StageRun>>,
    ) {
        loop {
            let mut changed = false;

            for name in &self.execution_order {
                if statuses.get(name) != Some(&StageStatus::Pending) {
                    continue;
                }
                let Some(spec) = self.stages.get(name) else {
                    continue;
                };

                match self.readiness(spec, statuses, excluded) {
                    Readiness::Wait => {}
                    Readiness::Run => {
                        statuses.insert(name.clone(), StageStatus::Running);
                        active.push(self.spawn_stage_task(spec, ctx.clone(), completed.clone()));
                    }
                    Readiness::Skip(reason) => {
                        ctx.try_emit_event(
                            names::STAGE_SKIPPED,
                            Some(serde_json::json!({"stage": name, "reason": &reason})),
                        );
                        statuses.insert(name.clone(), StageStatus::Skip);
                        outputs.insert(name.clone(), StageOutput::skip(reason));
                        changed = true;
                    }
                    Readiness::UpstreamFailed(reason) => {
                        ctx.try_emit_event(
                            names::STAGE_UPSTREAM_FAILED,
                            Some(serde_json::json!({"stage": name, "reason": &reason})),
                        );
                        statuses.insert(name.clone(), StageStatus::UpstreamFailed);
                        outputs.insert(name.clone(), StageOutput::upstream_failed(reason));
                        changed = true;
                    }
                }
            }

            if !changed {
                break;
            }
        }
    }

    fn readiness(
        &self,
        spec: &StageSpec,
        statuses: &HashMap<String, StageStatus>,
        excluded: &HashMap<String, String>,
    ) -> Readiness {
        let upstream: Vec<(&str, StageStatus)> = spec
            .sorted_dependencies()
            .into_iter()
            .map(|dep| (dep, statuses.get(dep).copied().unwrap_or_default()))
            .collect();

        if upstream.iter().any(|(_, status)| !status.is_terminal()) {
            return Readiness::Wait;
        }

        if let Some(branch) = excluded.get(&spec.name) {
            return Readiness::Skip(format!("Not selected by branch '{branch}'"));
        }

        match spec.trigger_rule {
            TriggerRule::AllSuccess => {
                if let Some((dep, _)) = upstream.iter().find(|(_, s)| s.is_failure()) {
                    Readiness::UpstreamFailed(format!("Upstream stage '{dep}' did not succeed"))
                } else if let Some((dep, _)) =
                    upstream.iter().find(|(_, s)| *s == StageStatus::Skip)
                {
                    Readiness::Skip(format!("Upstream stage '{dep}' was skipped"))
                } else {
                    Readiness::Run
                }
            }
            TriggerRule::AllDone => {
                if !upstream.is_empty()
                    && upstream.iter().all(|(_, s)| *s == StageStatus::Skip)
                {
                    Readiness::Skip("All upstream stages were skipped".to_string())
                } else {
                    Readiness::Run
                }
            }
        }
    }

    /// Stops every in-flight stage and reports the run as ended by `error`.
    fn abandon(
        &self,
        ctx: &PipelineContext,
        active: &FuturesUnordered<JoinHandle<StageRun>>,
        start: Instant,
        error: ChartflowError,
    ) -> ChartflowError {
        for handle in active.iter() {
            handle.abort();
        }
        ctx.try_emit_event(
            names::RUN_COMPLETED,
            Some(serde_json::json!({
                "pipeline": &self.name,
                "error": error.to_string(),
                "aborted_stages": active.len(),
                "duration_ms": start.elapsed().as_secs_f64() * 1000.0,
            })),
        );
        error
    }

    fn apply_branch(
        &self,
        name: &str,
        chosen: &[String],
        excluded: &mut HashMap<String, String>,
    ) -> Result<(), PipelineValidationError> {
        let children = self.children(name);

        if let Some(unknown) = chosen.iter().find(|c| !children.contains(c)) {
            return Err(PipelineValidationError::new(format!(
                "Branch stage '{name}' selected '{unknown}', which is not one of its children"
            ))
            .with_stages(vec![name.to_string(), unknown.clone()])
            .with_error_info(
                ContractErrorInfo::new("CONTRACT-004-BRANCH", "Branch selected an unknown stage")
                    .with_context_entry("stage", name)
                    .with_fix_hint("Return only the names of direct children."),
            ));
        }

        for child in children {
            if !chosen.contains(child) {
                excluded
                    .entry(child.clone())
                    .or_insert_with(|| name.to_string());
            }
        }
        Ok(())
    }

    fn spawn_stage_task(
        &self,
        spec: &StageSpec,
        ctx: Arc<PipelineContext>,
        completed: Arc<RwLock<StageData>>,
    ) -> JoinHandle<StageRun> {
        let spec = spec.clone();
        let retry = self.retry_policy(&spec);
        let ancestors = self.ancestors.get(&spec.name).cloned().unwrap_or_default();
        let strict = self.strict_inputs;

        tokio::spawn(async move {
            let mut state = RetryState::new();

            loop {
                let attempt = state.attempts();
                let inputs =
                    StageInputs::new(completed.read().clone(), ancestors.clone(), &spec.name, strict);
                let stage_ctx =
                    StageContext::new(ctx.clone(), &spec.name, inputs).with_attempt(attempt);

                stage_ctx.try_emit_event(
                    names::STAGE_STARTED,
                    Some(serde_json::json!({"kind": spec.kind})),
                );

                let stage_start = Instant::now();
                let mut output = spec.runner.execute(&stage_ctx).await;
                let duration_ms = stage_start.elapsed().as_secs_f64() * 1000.0;

                if !matches!(
                    output.status,
                    StageStatus::Ok | StageStatus::Fail | StageStatus::Skip
                ) {
                    output = StageOutput::fail(format!(
                        "Stage returned non-final status '{}'",
                        output.status
                    ));
                }

                if output.status == StageStatus::Fail && !ctx.is_cancelled() {
                    if let RetryDecision::Retry(delay) = should_retry(&mut state, &retry) {
                        stage_ctx.try_emit_event(
                            names::STAGE_RETRYING,
                            Some(serde_json::json!({
                                "error": &output.error,
                                "delay_ms": u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                                "duration_ms": duration_ms,
                            })),
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                }

                let event = match output.status {
                    StageStatus::Ok => names::STAGE_COMPLETED,
                    StageStatus::Skip => names::STAGE_SKIPPED,
                    _ => names::STAGE_FAILED,
                };
                stage_ctx.try_emit_event(
                    event,
                    Some(serde_json::json!({
                        "duration_ms": duration_ms,
                        "error": &output.error,
                        "reason": &output.skip_reason,
                    })),
                );

                break StageRun {
                    name: spec.name.clone(),
                    output,
                    attempts: attempt,
                };
            }
        })
    }
}

/// Orders stages so that every stage follows its dependencies, keeping
/// insertion order where the graph allows it.
fn topological_sort(stages: &HashMap<String, StageSpec>, stage_order: &[String]) -> Vec<String> {
    fn visit(
        node: &str,
        stages: &HashMap<String, StageSpec>,
        visited: &mut HashSet<String>,
        temp_visited: &mut HashSet<String>,
        result: &mut Vec<String>,
    ) {
        if visited.contains(node) || temp_visited.contains(node) {
            return;
        }

        temp_visited.insert(node.to_string());

        if let Some(spec) = stages.get(node) {
            for dep in spec.sorted_dependencies() {
                visit(dep, stages, visited, temp_visited, result);
            }
        }

        temp_visited.remove(node);
        visited.insert(node.to_string());
        result.push(node.to_string());
    }

    let mut result = Vec::new();
    let mut visited = HashSet::new();
    let mut temp_visited = HashSet::new();

    for name in stage_order {
        visit(name, stages, &mut visited, &mut temp_visited, &mut result);
    }

    result
}
