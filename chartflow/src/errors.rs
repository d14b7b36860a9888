//! Error types for the chartflow pipeline.
//!
//! Every external collaborator gets its own error enum so that callers can
//! tell transient failures from fatal ones without string matching.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// The main error type for chartflow operations.
#[derive(Debug, Error)]
pub enum ChartflowError {
    /// A pipeline validation error occurred.
    #[error("{0}")]
    Validation(#[from] PipelineValidationError),

    /// A cycle was detected in the pipeline.
    #[error("{0}")]
    CycleDetected(#[from] CycleDetectedError),

    /// An undeclared dependency was accessed.
    #[error("{0}")]
    UndeclaredDependency(#[from] UndeclaredDependencyError),

    /// A stage execution error.
    #[error("Stage execution error: {0}")]
    StageExecution(String),

    /// Configuration could not be loaded or is incomplete.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// Extraction from the music API failed.
    #[error("{0}")]
    Extract(#[from] ExtractError),

    /// An object storage call failed.
    #[error("{0}")]
    Storage(#[from] StorageError),

    /// A CSV upload failed.
    #[error("{0}")]
    Upload(#[from] UploadError),

    /// A warehouse statement failed.
    #[error("{0}")]
    Warehouse(#[from] WarehouseError),

    /// A container platform call failed.
    #[error("{0}")]
    Container(#[from] ContainerError),

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Metadata about a contract error for better diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ContractErrorInfo {
    /// Error code (e.g., "CONTRACT-004-CYCLE").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ContractErrorInfo {
    /// Creates a new contract error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Error raised when pipeline validation fails.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct PipelineValidationError {
    /// The error message.
    pub message: String,
    /// The stages involved in the error.
    pub stages: Vec<String>,
    /// Optional contract error info.
    pub error_info: Option<ContractErrorInfo>,
}

impl PipelineValidationError {
    /// Creates a new pipeline validation error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stages: Vec::new(),
            error_info: None,
        }
    }

    /// Sets the stages involved.
    #[must_use]
    pub fn with_stages(mut self, stages: Vec<String>) -> Self {
        self.stages = stages;
        self
    }

    /// Sets the contract error info.
    #[must_use]
    pub fn with_error_info(mut self, info: ContractErrorInfo) -> Self {
        self.error_info = Some(info);
        self
    }

    /// Returns the contract code, if any.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        self.error_info.as_ref().map(|info| info.code.as_str())
    }
}

/// Error raised when a cycle is detected in the pipeline graph.
#[derive(Debug, Clone, Error)]
#[error("Cycle detected in pipeline: {}", cycle_path.join(" -> "))]
pub struct CycleDetectedError {
    /// The path of stages forming the cycle.
    pub cycle_path: Vec<String>,
    /// Contract error info.
    pub error_info: ContractErrorInfo,
}

impl CycleDetectedError {
    /// Creates a new cycle detected error.
    #[must_use]
    pub fn new(cycle_path: Vec<String>) -> Self {
        let info = ContractErrorInfo::new(
            "CONTRACT-004-CYCLE",
            format!("Pipeline contains a dependency cycle: {}", cycle_path.join(" -> ")),
        )
        .with_fix_hint("Remove one of the dependencies in the cycle to break it.");

        Self {
            cycle_path,
            error_info: info,
        }
    }
}

impl From<CycleDetectedError> for PipelineValidationError {
    fn from(err: CycleDetectedError) -> Self {
        Self {
            message: err.to_string(),
            stages: err.cycle_path.clone(),
            error_info: Some(err.error_info),
        }
    }
}

/// Error raised when a stage reads the output of a stage that is not upstream of it.
#[derive(Debug, Clone, Error)]
#[error("Undeclared dependency: stage '{stage}' attempted to access '{key}' which is not upstream of it")]
pub struct UndeclaredDependencyError {
    /// The stage attempting access.
    pub stage: String,
    /// The undeclared key.
    pub key: String,
}

impl UndeclaredDependencyError {
    /// Creates a new undeclared dependency error.
    #[must_use]
    pub fn new(stage: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            key: key.into(),
        }
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The layered configuration could not be extracted.
    #[error("Failed to load configuration: {0}")]
    Load(#[from] figment::Error),

    /// A required value is absent.
    #[error("Missing required configuration value '{field}'")]
    Missing {
        /// Dotted path of the missing field.
        field: String,
    },

    /// A value is present but unusable.
    #[error("Invalid configuration value '{field}': {message}")]
    Invalid {
        /// Dotted path of the field.
        field: String,
        /// What is wrong with it.
        message: String,
    },

    /// A data-quality check expression could not be parsed.
    #[error("Invalid quality check '{check}': {message}")]
    InvalidCheck {
        /// The check expression.
        check: String,
        /// Parse failure detail.
        message: String,
    },
}

impl ConfigError {
    /// Creates a missing-field error.
    #[must_use]
    pub fn missing(field: impl Into<String>) -> Self {
        Self::Missing { field: field.into() }
    }

    /// Creates an invalid-field error.
    #[must_use]
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Errors raised while pulling data from the music API.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// The token endpoint rejected the client credentials.
    #[error("Token request rejected with HTTP {status}")]
    TokenRejected {
        /// HTTP status returned by the token endpoint.
        status: u16,
    },

    /// Connection errors or timeouts persisted past the retry budget.
    #[error("Gave up on {url} after {attempts} attempts: {source}")]
    RetriesExhausted {
        /// Requested URL.
        url: String,
        /// Requests made, including the first.
        attempts: usize,
        /// The last transport error.
        #[source]
        source: reqwest::Error,
    },

    /// The server redirected too many times.
    #[error("Too many redirects requesting {url}; check the URL")]
    TooManyRedirects {
        /// Requested URL.
        url: String,
    },

    /// The server answered with an error status.
    #[error("{url} returned HTTP {status}")]
    HttpStatus {
        /// Requested URL.
        url: String,
        /// HTTP status code.
        status: u16,
    },

    /// Any other transport failure.
    #[error("Request to {url} failed: {source}")]
    Request {
        /// Requested URL.
        url: String,
        /// Underlying error.
        #[source]
        source: reqwest::Error,
    },

    /// The body was not the JSON we expected.
    #[error("Unexpected response shape ({context}): {source}")]
    Decode {
        /// What was being decoded.
        context: String,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },

    /// An audio-features body described a different track than requested.
    #[error("Requested audio features of {requested} but got {returned}")]
    IdMismatch {
        /// Song id that was requested.
        requested: String,
        /// Song id in the response body.
        returned: String,
    },

    /// A required field is absent from a playlist item.
    #[error("Missing field '{field}' in playlist item {index}")]
    MissingField {
        /// Field path.
        field: String,
        /// Zero-based item position.
        index: usize,
    },

    /// A release date could not be parsed.
    #[error("Invalid release date '{0}'")]
    InvalidDate(String),

    /// CSV serialization failed.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Uploading a CSV failed.
    #[error("{0}")]
    Upload(#[from] UploadError),
}

impl ExtractError {
    /// Creates a decode error with context.
    #[must_use]
    pub fn decode(context: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Decode {
            context: context.into(),
            source,
        }
    }
}

/// Errors returned by object storage.
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    /// The service answered 503/SlowDown.
    #[error("Storage service unavailable: {message}")]
    ServiceUnavailable {
        /// Error detail.
        message: String,
    },

    /// The endpoint could not be reached.
    #[error("Could not reach storage endpoint: {message}")]
    Endpoint {
        /// Error detail.
        message: String,
    },

    /// The bucket does not exist.
    #[error("Bucket '{bucket}' does not exist")]
    NoSuchBucket {
        /// Bucket name.
        bucket: String,
    },

    /// The object does not exist.
    #[error("Object not found: {key}")]
    NotFound {
        /// Object key.
        key: String,
    },

    /// The backend could not be configured.
    #[error("Invalid storage configuration: {message}")]
    Config {
        /// Error detail.
        message: String,
    },

    /// Any other failure.
    #[error("Storage operation failed: {message}")]
    Other {
        /// Error detail.
        message: String,
    },
}

impl StorageError {
    /// Returns true for failures worth retrying with backoff.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ServiceUnavailable { .. } | Self::Endpoint { .. })
    }

    /// Returns true if the error means the object is absent.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Errors returned by a CSV upload.
#[derive(Debug, Clone, Error)]
pub enum UploadError {
    /// The target bucket is missing. Never retried.
    #[error("Bucket '{bucket}' does not exist; upload of '{key}' abandoned")]
    BucketNotFound {
        /// Bucket name.
        bucket: String,
        /// Object key.
        key: String,
    },

    /// Every attempt hit a retryable error.
    #[error("Upload of '{key}' failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        /// Object key.
        key: String,
        /// Attempts made.
        attempts: usize,
        /// The last error.
        #[source]
        source: StorageError,
    },

    /// A non-retryable storage error.
    #[error("Upload of '{key}' failed: {source}")]
    Failed {
        /// Object key.
        key: String,
        /// The error.
        #[source]
        source: StorageError,
    },
}

/// Errors raised by the data warehouse.
#[derive(Debug, Error)]
pub enum WarehouseError {
    /// The statement failed on the server or the connection broke.
    #[error("Warehouse statement failed ({statement}): {source}")]
    Query {
        /// A short label of the statement.
        statement: String,
        /// Underlying driver error.
        #[source]
        source: sqlx::Error,
    },

    /// The table does not exist.
    #[error("Table '{0}' does not exist")]
    UnknownTable(String),

    /// The staged file could not be read for loading.
    #[error("Could not load '{key}': {message}")]
    Load {
        /// Object key.
        key: String,
        /// Error detail.
        message: String,
    },

    /// The statement is not supported by this warehouse.
    #[error("Unsupported statement: {0}")]
    Unsupported(String),
}

/// Errors raised by the container platform.
#[derive(Debug, Error)]
pub enum ContainerError {
    /// The HTTP call itself failed.
    #[error("{action} request failed: {source}")]
    Request {
        /// API action name.
        action: String,
        /// Underlying error.
        #[source]
        source: reqwest::Error,
    },

    /// The platform returned an API error.
    #[error("{action} returned HTTP {status}: {message}")]
    Api {
        /// API action name.
        action: String,
        /// HTTP status code.
        status: u16,
        /// Error type and message from the body.
        message: String,
    },

    /// The response could not be decoded.
    #[error("{action} response could not be decoded: {source}")]
    Decode {
        /// API action name.
        action: String,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },

    /// The response lacked an expected field.
    #[error("{action} response is missing '{field}'")]
    MissingField {
        /// API action name.
        action: String,
        /// Field name.
        field: String,
    },

    /// The platform refused to start the task.
    #[error("Task could not be started: {0}")]
    Rejected(String),

    /// The task ran and stopped unsuccessfully.
    #[error("Task {task_arn} failed (exit code {exit_code:?}): {reason}")]
    TaskFailed {
        /// Task ARN.
        task_arn: String,
        /// Container exit code, if reported.
        exit_code: Option<i32>,
        /// Stop reason.
        reason: String,
    },

    /// Polling did not observe the expected state in time.
    #[error("Timed out waiting for {what}")]
    Timeout {
        /// What was awaited.
        what: String,
    },

    /// The request could not be signed.
    #[error("Request signing failed: {0}")]
    Signing(String),

    /// No AWS credentials are configured.
    #[error("No AWS credentials configured for the container platform")]
    MissingCredentials,
}
