//! ECS over its JSON 1.1 API.

use super::sigv4::{sign_post, SignableRequest};
use super::{ContainerPlatform, DefinitionStatus, LaunchSpec, TaskDefinitionSpec, TaskState};
use crate::config::{AwsCredentials, ChartflowConfig};
use crate::errors::ContainerError;
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde_json::{json, Value};
use tracing::debug;

const TARGET_PREFIX: &str = "AmazonEC2ContainerServiceV20141113";
const CONTENT_TYPE: &str = "application/x-amz-json-1.1";

/// Signed JSON client for the ECS control plane.
#[derive(Debug, Clone)]
pub struct EcsClient {
    http: Client,
    endpoint: Url,
    region: String,
    credentials: AwsCredentials,
    container_name: String,
}

impl EcsClient {
    /// Creates a client for an explicit endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::Rejected`] for an unparsable endpoint.
    pub fn new(
        endpoint: &str,
        region: impl Into<String>,
        credentials: AwsCredentials,
        container_name: impl Into<String>,
    ) -> Result<Self, ContainerError> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| ContainerError::Rejected(format!("invalid ECS endpoint {endpoint}: {e}")))?;
        Ok(Self {
            http: Client::new(),
            endpoint,
            region: region.into(),
            credentials,
            container_name: container_name.into(),
        })
    }

    /// Creates a client from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::MissingCredentials`] without an AWS key pair.
    pub fn from_config(config: &ChartflowConfig) -> Result<Self, ContainerError> {
        let credentials = config
            .aws
            .credentials()
            .ok_or(ContainerError::MissingCredentials)?;
        let region = config.container_region().to_string();
        let endpoint = config
            .container
            .endpoint
            .clone()
            .unwrap_or_else(|| format!("https://ecs.{region}.amazonaws.com/"));
        Self::new(
            &endpoint,
            region,
            credentials,
            config.container.container_name.clone(),
        )
    }

    async fn call(&self, action: &str, body: &Value) -> Result<Value, ContainerError> {
        let payload = serde_json::to_vec(body).map_err(|source| ContainerError::Decode {
            action: action.to_string(),
            source,
        })?;
        let target = format!("{TARGET_PREFIX}.{action}");
        let host = match (self.endpoint.host_str(), self.endpoint.port()) {
            (Some(h), Some(p)) => format!("{h}:{p}"),
            (Some(h), None) => h.to_string(),
            (None, _) => return Err(ContainerError::Rejected("ECS endpoint has no host".into())),
        };

        let signature = sign_post(
            &SignableRequest {
                host: &host,
                path: self.endpoint.path(),
                headers: &[("content-type", CONTENT_TYPE), ("x-amz-target", target.as_str())],
                body: &payload,
            },
            &self.credentials,
            &self.region,
            "ecs",
            chrono::Utc::now(),
        )?;

        debug!(action, "Calling ECS");
        let mut request = self
            .http
            .post(self.endpoint.clone())
            .header("Content-Type", CONTENT_TYPE)
            .header("X-Amz-Target", &target)
            .header("X-Amz-Date", &signature.amz_date)
            .header("Authorization", &signature.authorization);
        if let Some(token) = &signature.security_token {
            request = request.header("X-Amz-Security-Token", token);
        }

        let response = request
            .body(payload)
            .send()
            .await
            .map_err(|source| ContainerError::Request {
                action: action.to_string(),
                source,
            })?;

        let status = response.status();
        let text = response.text().await.map_err(|source| ContainerError::Request {
            action: action.to_string(),
            source,
        })?;

        if !status.is_success() {
            let message = serde_json::from_str::<Value>(&text)
                .ok()
                .map_or(text.clone(), |v| {
                    format!(
                        "{}: {}",
                        v["__type"].as_str().unwrap_or("UnknownError"),
                        v["message"]
                            .as_str()
                            .or_else(|| v["Message"].as_str())
                            .unwrap_or("")
                    )
                });
            return Err(ContainerError::Api {
                action: action.to_string(),
                status: status.as_u16(),
                message,
            });
        }

        serde_json::from_str(&text).map_err(|source| ContainerError::Decode {
            action: action.to_string(),
            source,
        })
    }
}

fn missing(action: &str, field: &str) -> ContainerError {
    ContainerError::MissingField {
        action: action.to_string(),
        field: field.to_string(),
    }
}

fn register_body(spec: &TaskDefinitionSpec) -> Value {
    let environment: Vec<Value> = spec
        .environment
        .iter()
        .map(|(name, value)| json!({"name": name, "value": value}))
        .collect();

    let mut body = json!({
        "family": spec.family,
        "requiresCompatibilities": ["FARGATE"],
        "networkMode": "awsvpc",
        "cpu": spec.cpu,
        "memory": spec.memory,
        "containerDefinitions": [{
            "name": spec.container_name,
            "image": spec.image,
            "essential": true,
            "workingDirectory": spec.working_directory,
            "entryPoint": spec.entry_point,
            "command": spec.command,
            "environment": environment,
        }],
    });
    if let Some(arn) = &spec.execution_role_arn {
        body["executionRoleArn"] = json!(arn);
    }
    if let Some(arn) = &spec.task_role_arn {
        body["taskRoleArn"] = json!(arn);
    }
    body
}

fn run_task_body(definition_arn: &str, launch: &LaunchSpec) -> Value {
    json!({
        "cluster": launch.cluster,
        "taskDefinition": definition_arn,
        "launchType": "FARGATE",
        "count": 1,
        "networkConfiguration": {
            "awsvpcConfiguration": {
                "subnets": launch.subnets,
                "securityGroups": launch.security_groups,
                "assignPublicIp": if launch.assign_public_ip { "ENABLED" } else { "DISABLED" },
            }
        },
    })
}

#[async_trait]
impl ContainerPlatform for EcsClient {
    async fn register_task_definition(
        &self,
        spec: &TaskDefinitionSpec,
    ) -> Result<String, ContainerError> {
        const ACTION: &str = "RegisterTaskDefinition";
        let response = self.call(ACTION, &register_body(spec)).await?;
        response["taskDefinition"]["taskDefinitionArn"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| missing(ACTION, "taskDefinition.taskDefinitionArn"))
    }

    async fn describe_task_definition(
        &self,
        arn: &str,
    ) -> Result<Option<DefinitionStatus>, ContainerError> {
        const ACTION: &str = "DescribeTaskDefinition";
        let response = match self.call(ACTION, &json!({"taskDefinition": arn})).await {
            Ok(response) => response,
            Err(ContainerError::Api { message, .. })
                if message.starts_with("ClientException") && message.contains("Unable to describe") =>
            {
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        let status = response["taskDefinition"]["status"].clone();
        serde_json::from_value(status)
            .map(Some)
            .map_err(|source| ContainerError::Decode {
                action: ACTION.to_string(),
                source,
            })
    }

    async fn run_task(&self, definition_arn: &str, launch: &LaunchSpec) -> Result<String, ContainerError> {
        const ACTION: &str = "RunTask";
        let response = self.call(ACTION, &run_task_body(definition_arn, launch)).await?;

        if let Some(failure) = response["failures"].as_array().and_then(|f| f.first()) {
            return Err(ContainerError::Rejected(
                failure["reason"].as_str().unwrap_or("unknown failure").to_string(),
            ));
        }
        response["tasks"][0]["taskArn"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| missing(ACTION, "tasks[0].taskArn"))
    }

    async fn describe_task(&self, cluster: &str, task_arn: &str) -> Result<TaskState, ContainerError> {
        const ACTION: &str = "DescribeTasks";
        let response = self
            .call(ACTION, &json!({"cluster": cluster, "tasks": [task_arn]}))
            .await?;
        let task = &response["tasks"][0];
        let last_status = task["lastStatus"]
            .as_str()
            .ok_or_else(|| missing(ACTION, "tasks[0].lastStatus"))?;

        let containers = task["containers"].as_array().cloned().unwrap_or_default();
        let container = containers
            .iter()
            .find(|c| c["name"].as_str() == Some(self.container_name.as_str()))
            .or_else(|| containers.first());
        let exit_code = container
            .and_then(|c| c["exitCode"].as_i64())
            .and_then(|c| i32::try_from(c).ok());

        Ok(TaskState {
            task_arn: task_arn.to_string(),
            last_status: last_status.to_string(),
            stopped_reason: task["stoppedReason"].as_str().map(str::to_string),
            exit_code,
        })
    }

    async fn deregister_task_definition(&self, arn: &str) -> Result<(), ContainerError> {
        self.call("DeregisterTaskDefinition", &json!({"taskDefinition": arn}))
            .await
            .map(|_| ())
    }
}
