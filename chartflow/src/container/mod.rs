//! The container platform running the transformation job.
//!
//! A job is a task definition registered for one run, launched once on the
//! cluster, and deregistered afterwards. The definition ARN is the identity
//! threaded through all three steps.

mod ecs;
mod sigv4;

pub use ecs::EcsClient;
pub use sigv4::{sign_post, SignableRequest, Signature};

use crate::config::{ContainerConfig, WarehouseConfig};
use crate::errors::ContainerError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// A container definition to register.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskDefinitionSpec {
    /// Family name.
    pub family: String,
    /// Container name.
    pub container_name: String,
    /// Image reference.
    pub image: String,
    /// Working directory.
    pub working_directory: String,
    /// Entry point.
    pub entry_point: Vec<String>,
    /// Command.
    pub command: Vec<String>,
    /// Environment passed to the container.
    pub environment: Vec<(String, String)>,
    /// Execution role.
    pub execution_role_arn: Option<String>,
    /// Task role.
    pub task_role_arn: Option<String>,
    /// CPU units.
    pub cpu: String,
    /// Memory in MiB.
    pub memory: String,
}

impl TaskDefinitionSpec {
    /// The transformation job, with warehouse credentials in its environment.
    #[must_use]
    pub fn from_config(container: &ContainerConfig, warehouse: &WarehouseConfig) -> Self {
        Self {
            family: container.family.clone(),
            container_name: container.container_name.clone(),
            image: container.image.clone(),
            working_directory: container.working_directory.clone(),
            entry_point: container.entry_point.clone(),
            command: container.command.clone(),
            environment: vec![
                ("REDSHIFT_HOST".to_string(), warehouse.host.clone()),
                ("REDSHIFT_USER".to_string(), warehouse.user.clone()),
                ("REDSHIFT_PW".to_string(), warehouse.password.expose().to_string()),
            ],
            execution_role_arn: container.execution_role_arn.clone(),
            task_role_arn: container.task_role_arn.clone(),
            cpu: container.cpu.clone(),
            memory: container.memory.clone(),
        }
    }
}

/// Where and how a task is launched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LaunchSpec {
    /// Cluster name.
    pub cluster: String,
    /// Subnets.
    pub subnets: Vec<String>,
    /// Security groups.
    pub security_groups: Vec<String>,
    /// Assign a public IP.
    pub assign_public_ip: bool,
}

impl LaunchSpec {
    /// Launch settings from configuration.
    #[must_use]
    pub fn from_config(container: &ContainerConfig) -> Self {
        Self {
            cluster: container.cluster.clone(),
            subnets: container.subnets.clone(),
            security_groups: container.security_groups.clone(),
            assign_public_ip: container.assign_public_ip,
        }
    }
}

/// Lifecycle state of a task definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DefinitionStatus {
    /// Usable.
    Active,
    /// Deregistered.
    Inactive,
    /// Being deleted.
    DeleteInProgress,
}

/// Snapshot of a launched task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskState {
    /// Task ARN.
    pub task_arn: String,
    /// `PROVISIONING`, `RUNNING`, `STOPPED`, ...
    pub last_status: String,
    /// Why the task stopped.
    pub stopped_reason: Option<String>,
    /// Exit code of the job container.
    pub exit_code: Option<i32>,
}

impl TaskState {
    /// True once the task has stopped.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.last_status == "STOPPED"
    }
}

/// Calls against the container platform.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContainerPlatform: Send + Sync + std::fmt::Debug {
    /// Registers a definition and returns its ARN.
    async fn register_task_definition(
        &self,
        spec: &TaskDefinitionSpec,
    ) -> Result<String, ContainerError>;

    /// Returns the definition's status, or `None` if it is not visible yet.
    async fn describe_task_definition(
        &self,
        arn: &str,
    ) -> Result<Option<DefinitionStatus>, ContainerError>;

    /// Launches one task and returns its ARN.
    async fn run_task(&self, definition_arn: &str, launch: &LaunchSpec) -> Result<String, ContainerError>;

    /// Returns the task's current state.
    async fn describe_task(&self, cluster: &str, task_arn: &str) -> Result<TaskState, ContainerError>;

    /// Deregisters a definition.
    async fn deregister_task_definition(&self, arn: &str) -> Result<(), ContainerError>;
}

/// Polls until the definition is active.
///
/// A definition the platform does not report yet is polled again.
///
/// # Errors
///
/// Returns [`ContainerError::Timeout`] after `timeout`, and
/// [`ContainerError::Rejected`] if the definition went inactive.
pub async fn await_definition_active(
    platform: &dyn ContainerPlatform,
    arn: &str,
    poll: Duration,
    timeout: Duration,
) -> Result<(), ContainerError> {
    let deadline = Instant::now() + timeout;
    loop {
        match platform.describe_task_definition(arn).await? {
            Some(DefinitionStatus::Active) => {
                info!(task_definition = arn, "Task definition active");
                return Ok(());
            }
            Some(status) => {
                return Err(ContainerError::Rejected(format!(
                    "task definition {arn} is {status:?}"
                )));
            }
            None => debug!(task_definition = arn, "Task definition not visible yet"),
        }

        if Instant::now() + poll > deadline {
            return Err(ContainerError::Timeout {
                what: format!("task definition {arn}"),
            });
        }
        tokio::time::sleep(poll).await;
    }
}

/// Launches the job and waits for it to stop.
///
/// # Errors
///
/// Returns [`ContainerError::TaskFailed`] if the job container exits
/// non-zero or without an exit code, and [`ContainerError::Timeout`] if it
/// is still running after `timeout`.
pub async fn run_to_completion(
    platform: &dyn ContainerPlatform,
    definition_arn: &str,
    launch: &LaunchSpec,
    poll: Duration,
    timeout: Duration,
) -> Result<TaskState, ContainerError> {
    let task_arn = platform.run_task(definition_arn, launch).await?;
    info!(task = %task_arn, cluster = %launch.cluster, "Job started");

    let deadline = Instant::now() + timeout;
    loop {
        let state = platform.describe_task(&launch.cluster, &task_arn).await?;
        debug!(task = %task_arn, status = %state.last_status, "Polled job");

        if state.is_stopped() {
            return match state.exit_code {
                Some(0) => {
                    info!(task = %task_arn, "Job finished");
                    Ok(state)
                }
                exit_code => Err(ContainerError::TaskFailed {
                    task_arn,
                    exit_code,
                    reason: state
                        .stopped_reason
                        .unwrap_or_else(|| "no stop reason reported".to_string()),
                }),
            };
        }

        if Instant::now() + poll > deadline {
            return Err(ContainerError::Timeout {
                what: format!("task {task_arn}"),
            });
        }
        tokio::time::sleep(poll).await;
    }
}
