//! Transformation job lifecycle tasks.
//!
//! `register` publishes the definition ARN as `task_definition_arn`; the
//! later steps read it back from the register stage's output.

use super::failed;
use crate::container::{
    await_definition_active, run_to_completion, ContainerPlatform, LaunchSpec, TaskDefinitionSpec,
};
use crate::context::StageContext;
use crate::core::StageOutput;
use crate::stages::Stage;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Output key holding the registered definition ARN.
pub const DEFINITION_ARN_KEY: &str = "task_definition_arn";

fn definition_arn<'a>(ctx: &'a StageContext, register_stage: &str) -> Result<Option<&'a str>, String> {
    ctx.inputs()
        .get_str(register_stage, DEFINITION_ARN_KEY)
        .map_err(|e| e.to_string())
}

/// Registers the job definition.
#[derive(Debug, Clone)]
pub struct RegisterJobStage {
    name: String,
    platform: Arc<dyn ContainerPlatform>,
    spec: TaskDefinitionSpec,
}

impl RegisterJobStage {
    /// Creates the stage.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        platform: Arc<dyn ContainerPlatform>,
        spec: TaskDefinitionSpec,
    ) -> Self {
        Self {
            name: name.into(),
            platform,
            spec,
        }
    }
}

#[async_trait]
impl Stage for RegisterJobStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _ctx: &StageContext) -> StageOutput {
        match self.platform.register_task_definition(&self.spec).await {
            Ok(arn) => {
                info!(task_definition = %arn, family = %self.spec.family, "Registered job");
                StageOutput::ok_value(DEFINITION_ARN_KEY, serde_json::json!(arn))
            }
            Err(e) => failed(&self.name, e),
        }
    }
}

/// Waits for the registered definition to become active.
#[derive(Debug, Clone)]
pub struct AwaitJobDefinitionStage {
    name: String,
    platform: Arc<dyn ContainerPlatform>,
    register_stage: String,
    poll: Duration,
    timeout: Duration,
}

impl AwaitJobDefinitionStage {
    /// Creates the stage.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        platform: Arc<dyn ContainerPlatform>,
        register_stage: impl Into<String>,
        poll: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            platform,
            register_stage: register_stage.into(),
            poll,
            timeout,
        }
    }
}

#[async_trait]
impl Stage for AwaitJobDefinitionStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &StageContext) -> StageOutput {
        let arn = match definition_arn(ctx, &self.register_stage) {
            Ok(Some(arn)) => arn,
            Ok(None) => return failed(&self.name, "no task definition was registered"),
            Err(e) => return failed(&self.name, e),
        };
        match await_definition_active(self.platform.as_ref(), arn, self.poll, self.timeout).await {
            Ok(()) => StageOutput::ok_value(DEFINITION_ARN_KEY, serde_json::json!(arn)),
            Err(e) => failed(&self.name, e),
        }
    }
}

/// Launches the job and waits for it to stop with exit code 0.
#[derive(Debug, Clone)]
pub struct RunJobStage {
    name: String,
    platform: Arc<dyn ContainerPlatform>,
    register_stage: String,
    launch: LaunchSpec,
    poll: Duration,
    timeout: Duration,
}

impl RunJobStage {
    /// Creates the stage.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        platform: Arc<dyn ContainerPlatform>,
        register_stage: impl Into<String>,
        launch: LaunchSpec,
    ) -> Self {
        Self {
            name: name.into(),
            platform,
            register_stage: register_stage.into(),
            launch,
            poll: Duration::from_secs(15),
            timeout: Duration::from_secs(3600),
        }
    }

    /// Sets the status poll interval and the run deadline.
    #[must_use]
    pub fn with_timing(mut self, poll: Duration, timeout: Duration) -> Self {
        self.poll = poll;
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Stage for RunJobStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &StageContext) -> StageOutput {
        let arn = match definition_arn(ctx, &self.register_stage) {
            Ok(Some(arn)) => arn,
            Ok(None) => return failed(&self.name, "no task definition was registered"),
            Err(e) => return failed(&self.name, e),
        };
        match run_to_completion(self.platform.as_ref(), arn, &self.launch, self.poll, self.timeout)
            .await
        {
            Ok(state) => StageOutput::ok_value("task_arn", serde_json::json!(state.task_arn)),
            Err(e) => failed(&self.name, e),
        }
    }
}

/// Deregisters the definition, whatever happened to the job.
#[derive(Debug, Clone)]
pub struct DeregisterJobStage {
    name: String,
    platform: Arc<dyn ContainerPlatform>,
    register_stage: String,
}

impl DeregisterJobStage {
    /// Creates the stage.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        platform: Arc<dyn ContainerPlatform>,
        register_stage: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            platform,
            register_stage: register_stage.into(),
        }
    }
}

#[async_trait]
impl Stage for DeregisterJobStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &StageContext) -> StageOutput {
        let arn = match definition_arn(ctx, &self.register_stage) {
            Ok(Some(arn)) => arn,
            Ok(None) => {
                warn!(stage = %self.name, "Nothing registered, nothing to deregister");
                return StageOutput::ok_value("deregistered", serde_json::json!(false));
            }
            Err(e) => return failed(&self.name, e),
        };
        match self.platform.deregister_task_definition(arn).await {
            Ok(()) => {
                info!(task_definition = %arn, "Deregistered job");
                StageOutput::ok_value("deregistered", serde_json::json!(true))
            }
            Err(e) => failed(&self.name, e),
        }
    }
}
