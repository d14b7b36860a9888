//! An in-memory container platform.

use crate::container::{ContainerPlatform, DefinitionStatus, LaunchSpec, TaskDefinitionSpec, TaskState};
use crate::errors::ContainerError;
use async_trait::async_trait;
use parking_lot::Mutex;

#[derive(Debug, Default)]
struct Ledger {
    registered: Vec<(String, TaskDefinitionSpec)>,
    deregistered: Vec<String>,
    runs: Vec<(String, LaunchSpec)>,
}

/// Registers definitions and "runs" tasks that stop immediately.
#[derive(Debug, Default)]
pub struct MemoryContainerPlatform {
    exit_code: Option<i32>,
    ledger: Mutex<Ledger>,
}

impl MemoryContainerPlatform {
    /// Tasks exit with code 0.
    pub fn new() -> Self {
        Self {
            exit_code: Some(0),
            ..Self::default()
        }
    }

    /// Tasks exit with `code`.
    pub fn with_exit_code(mut self, code: i32) -> Self {
        self.exit_code = Some(code);
        self
    }

    /// Definitions registered so far.
    pub fn registered(&self) -> Vec<TaskDefinitionSpec> {
        self.ledger.lock().registered.iter().map(|(_, s)| s.clone()).collect()
    }

    /// ARNs deregistered so far.
    pub fn deregistered(&self) -> Vec<String> {
        self.ledger.lock().deregistered.clone()
    }

    /// Tasks launched so far.
    pub fn runs(&self) -> usize {
        self.ledger.lock().runs.len()
    }
}

#[async_trait]
impl ContainerPlatform for MemoryContainerPlatform {
    async fn register_task_definition(
        &self,
        spec: &TaskDefinitionSpec,
    ) -> Result<String, ContainerError> {
        let mut ledger = self.ledger.lock();
        let arn = format!(
            "arn:aws:ecs:us-east-1:000000000000:task-definition/{}:{}",
            spec.family,
            ledger.registered.len() + 1
        );
        ledger.registered.push((arn.clone(), spec.clone()));
        Ok(arn)
    }

    async fn describe_task_definition(
        &self,
        arn: &str,
    ) -> Result<Option<DefinitionStatus>, ContainerError> {
        let ledger = self.ledger.lock();
        if ledger.deregistered.iter().any(|a| a == arn) {
            return Ok(Some(DefinitionStatus::Inactive));
        }
        Ok(ledger
            .registered
            .iter()
            .any(|(a, _)| a == arn)
            .then_some(DefinitionStatus::Active))
    }

    async fn run_task(&self, definition_arn: &str, launch: &LaunchSpec) -> Result<String, ContainerError> {
        let mut ledger = self.ledger.lock();
        if !ledger.registered.iter().any(|(a, _)| a == definition_arn) {
            return Err(ContainerError::Rejected(format!(
                "unknown task definition {definition_arn}"
            )));
        }
        ledger.runs.push((definition_arn.to_string(), launch.clone()));
        Ok(format!(
            "arn:aws:ecs:us-east-1:000000000000:task/{}/{}",
            launch.cluster,
            ledger.runs.len()
        ))
    }

    async fn describe_task(&self, _cluster: &str, task_arn: &str) -> Result<TaskState, ContainerError> {
        Ok(TaskState {
            task_arn: task_arn.to_string(),
            last_status: "STOPPED".to_string(),
            stopped_reason: Some("Essential container in task exited".to_string()),
            exit_code: self.exit_code,
        })
    }

    async fn deregister_task_definition(&self, arn: &str) -> Result<(), ContainerError> {
        self.ledger.lock().deregistered.push(arn.to_string());
        Ok(())
    }
}
