//! Stage trait and generic implementations.
//!
//! Stages are the units of work in a chartflow graph. The concrete chart
//! tasks live in [`crate::tasks`].

use crate::context::StageContext;
use crate::core::StageOutput;
use async_trait::async_trait;
use std::fmt::Debug;

/// Trait for pipeline stages.
///
/// A stage reports its outcome through [`StageOutput`] rather than a
/// `Result`, so that skips and branch choices travel the same path as
/// success and failure.
#[async_trait]
pub trait Stage: Send + Sync + Debug {
    /// Returns the name of the stage.
    fn name(&self) -> &str;

    /// Executes one attempt of the stage.
    async fn execute(&self, ctx: &StageContext) -> StageOutput;
}

/// A stage backed by a synchronous closure. Mostly used in tests.
pub struct FnStage<F>
where
    F: Fn(&StageContext) -> StageOutput + Send + Sync,
{
    name: String,
    func: F,
}

impl<F> FnStage<F>
where
    F: Fn(&StageContext) -> StageOutput + Send + Sync,
{
    /// Creates a new function-based stage.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> Debug for FnStage<F>
where
    F: Fn(&StageContext) -> StageOutput + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnStage").field("name", &self.name).finish()
    }
}

#[async_trait]
impl<F> Stage for FnStage<F>
where
    F: Fn(&StageContext) -> StageOutput + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &StageContext) -> StageOutput {
        (self.func)(ctx)
    }
}

/// A stage that does nothing and succeeds. Used for join points.
#[derive(Debug, Clone)]
pub struct NoOpStage {
    name: String,
}

impl NoOpStage {
    /// Creates a new no-op stage.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Stage for NoOpStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _ctx: &StageContext) -> StageOutput {
        StageOutput::ok_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{PipelineContext, RunIdentity, StageInputs};
    use std::sync::Arc;

    fn test_stage_context() -> StageContext {
        let pipeline_ctx = Arc::new(PipelineContext::new(RunIdentity::today()));
        StageContext::new(pipeline_ctx, "test", StageInputs::default())
    }

    #[tokio::test]
    async fn test_fn_stage_sees_attempt() {
        let stage = FnStage::new("test", |ctx| {
            StageOutput::ok_value("attempt", serde_json::json!(ctx.attempt()))
        });
        assert_eq!(stage.name(), "test");

        let ctx = test_stage_context().with_attempt(3);
        let output = stage.execute(&ctx).await;
        assert_eq!(output.get("attempt"), Some(&serde_json::json!(3)));
    }

    #[tokio::test]
    async fn test_noop_stage() {
        let stage = NoOpStage::new("checks_succeeded");
        let output = stage.execute(&test_stage_context()).await;
        assert!(output.is_success());
        assert!(output.data.is_none());
    }
}
