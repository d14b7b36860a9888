//! Layered configuration.
//!
//! Sources, lowest precedence first:
//! 1. Built-in defaults
//! 2. `chartflow.toml` (or the file passed with `--config`)
//! 3. The standard `AWS_*` credential variables
//! 4. `CHARTFLOW_*` variables, `__` separating nested keys
//!    (`CHARTFLOW_WAREHOUSE__PASSWORD`)
//! 5. `CLIENTID` / `CLIENTSECRET`, the variables the extractor subprocess
//!    receives its API credentials through
//!
//! Configuration is loaded at the start of every invocation and never cached
//! across runs, so rotated credentials are picked up by the next run.

use crate::errors::ConfigError;
use crate::quality::QualityCheck;
use crate::warehouse::TableKind;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Config file read when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "chartflow.toml";

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "CHARTFLOW_";

/// A string that never shows up in `Debug` output.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    /// Wraps a value.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the wrapped value.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Returns true if the value is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            f.write_str("Secret(<empty>)")
        } else {
            f.write_str("Secret(***)")
        }
    }
}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChartflowConfig {
    /// Music API access.
    pub spotify: SpotifyConfig,
    /// AWS credentials shared by storage, warehouse COPY and the container platform.
    pub aws: AwsConfig,
    /// Object storage layout and upload policy.
    pub storage: StorageConfig,
    /// Warehouse connection.
    pub warehouse: WarehouseConfig,
    /// Transformation job definition.
    pub container: ContainerConfig,
    /// Scheduler policies.
    pub scheduler: SchedulerConfig,
    /// Data-quality checks.
    pub quality: QualityConfig,
}

/// Music API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpotifyConfig {
    /// OAuth client id.
    pub client_id: Secret,
    /// OAuth client secret.
    pub client_secret: Secret,
    /// Token endpoint.
    pub token_url: String,
    /// API base URL, without trailing slash.
    pub api_base_url: String,
    /// Playlist whose tracks are extracted.
    pub playlist_id: String,
    /// `limit` query parameter.
    pub page_limit: u32,
    /// Re-attempts after a connection error or timeout.
    pub max_retries: usize,
    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
    /// Concurrent audio-feature requests.
    pub feature_concurrency: usize,
}

impl Default for SpotifyConfig {
    fn default() -> Self {
        Self {
            client_id: Secret::default(),
            client_secret: Secret::default(),
            token_url: "https://accounts.spotify.com/api/token".to_string(),
            api_base_url: "https://api.spotify.com/v1".to_string(),
            playlist_id: "37i9dQZEVXbMDoHDwVN2tF".to_string(),
            page_limit: 50,
            max_retries: 5,
            request_timeout_secs: 30,
            feature_concurrency: 1,
        }
    }
}

impl SpotifyConfig {
    /// Per-request timeout.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// AWS credentials and region.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AwsConfig {
    /// Access key id.
    pub access_key_id: Option<String>,
    /// Secret access key.
    pub secret_access_key: Option<Secret>,
    /// Session token for temporary credentials.
    pub session_token: Option<Secret>,
    /// Default region.
    pub region: String,
}

impl Default for AwsConfig {
    fn default() -> Self {
        Self {
            access_key_id: None,
            secret_access_key: None,
            session_token: None,
            region: "us-east-1".to_string(),
        }
    }
}

/// A resolved AWS key pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AwsCredentials {
    /// Access key id.
    pub access_key_id: String,
    /// Secret access key.
    pub secret_access_key: Secret,
    /// Session token for temporary credentials.
    pub session_token: Option<Secret>,
}

impl AwsConfig {
    /// Returns the key pair if both halves are configured.
    #[must_use]
    pub fn credentials(&self) -> Option<AwsCredentials> {
        match (&self.access_key_id, &self.secret_access_key) {
            (Some(id), Some(secret)) if !id.is_empty() && !secret.is_empty() => {
                Some(AwsCredentials {
                    access_key_id: id.clone(),
                    secret_access_key: secret.clone(),
                    session_token: self.session_token.clone().filter(|t| !t.is_empty()),
                })
            }
            _ => None,
        }
    }
}

/// Object storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Bucket name, or `file:///path` for a local directory.
    pub bucket: String,
    /// Custom S3 endpoint (MinIO, LocalStack).
    pub endpoint: Option<String>,
    /// Allow plain-HTTP endpoints.
    pub allow_http: bool,
    /// Key prefix of the chart CSV.
    pub chart_songs_prefix: String,
    /// File name of the chart CSV.
    pub chart_songs_file: String,
    /// Key prefix of the audio-feature CSV.
    pub song_attributes_prefix: String,
    /// File name of the audio-feature CSV.
    pub song_attributes_file: String,
    /// Upload attempts, including the first.
    pub upload_attempts: usize,
    /// Delay before the first upload retry; doubles after each retry.
    pub upload_initial_delay_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            bucket: "spotify-project1".to_string(),
            endpoint: None,
            allow_http: false,
            chart_songs_prefix: "raw/chart_songs".to_string(),
            chart_songs_file: "songs.csv".to_string(),
            song_attributes_prefix: "raw/song_attributes".to_string(),
            song_attributes_file: "song_attributes.csv".to_string(),
            upload_attempts: 3,
            upload_initial_delay_secs: 5,
        }
    }
}

impl StorageConfig {
    /// Returns the local root if the bucket is a `file://` URL.
    #[must_use]
    pub fn local_root(&self) -> Option<PathBuf> {
        self.bucket.strip_prefix("file://").map(PathBuf::from)
    }

    /// Delay before the first upload retry.
    #[must_use]
    pub fn upload_initial_delay(&self) -> Duration {
        Duration::from_secs(self.upload_initial_delay_secs)
    }
}

/// Warehouse connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WarehouseConfig {
    /// Cluster endpoint host.
    pub host: String,
    /// Port.
    pub port: u16,
    /// Database holding the staging schema.
    pub database: String,
    /// Staging schema.
    pub schema: String,
    /// Login user.
    pub user: String,
    /// Login password.
    pub password: Secret,
    /// IAM role for COPY; when absent the AWS key pair is embedded instead.
    pub iam_role: Option<String>,
    /// Region of the source bucket, if it differs from the cluster's.
    pub copy_region: Option<String>,
    /// Pool size.
    pub max_connections: u32,
    /// Connection timeout in seconds.
    pub connect_timeout_secs: u64,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 5439,
            database: "spotify_project".to_string(),
            schema: "stage".to_string(),
            user: String::new(),
            password: Secret::default(),
            iam_role: None,
            copy_region: None,
            max_connections: 5,
            connect_timeout_secs: 30,
        }
    }
}

/// Transformation job settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    /// Region of the cluster; defaults to `aws.region`.
    pub region: Option<String>,
    /// Custom API endpoint.
    pub endpoint: Option<String>,
    /// Task definition family.
    pub family: String,
    /// Container name inside the task definition.
    pub container_name: String,
    /// Container image.
    pub image: String,
    /// Working directory inside the container.
    pub working_directory: String,
    /// Entry point.
    pub entry_point: Vec<String>,
    /// Command passed to the entry point.
    pub command: Vec<String>,
    /// Role the platform uses to pull the image and write logs.
    pub execution_role_arn: Option<String>,
    /// Role the container runs as.
    pub task_role_arn: Option<String>,
    /// CPU units.
    pub cpu: String,
    /// Memory in MiB.
    pub memory: String,
    /// Cluster to run in.
    pub cluster: String,
    /// Subnets of the task network interface.
    pub subnets: Vec<String>,
    /// Security groups of the task network interface.
    pub security_groups: Vec<String>,
    /// Assign a public IP to the task.
    pub assign_public_ip: bool,
    /// Seconds between status polls.
    pub poll_interval_secs: u64,
    /// Seconds to wait for the definition to become active.
    pub definition_timeout_secs: u64,
    /// Seconds to wait for the job to stop.
    pub run_timeout_secs: u64,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            region: None,
            endpoint: None,
            family: "dbt".to_string(),
            container_name: "dbt_spotify_charts".to_string(),
            image: String::new(),
            working_directory: "/dbt_project".to_string(),
            entry_point: vec!["bash".to_string(), "-c".to_string()],
            command: vec!["dbt run".to_string()],
            execution_role_arn: None,
            task_role_arn: None,
            cpu: "256".to_string(),
            memory: "512".to_string(),
            cluster: "dbt-cluster".to_string(),
            subnets: Vec::new(),
            security_groups: Vec::new(),
            assign_public_ip: true,
            poll_interval_secs: 15,
            definition_timeout_secs: 300,
            run_timeout_secs: 3600,
        }
    }
}

impl ContainerConfig {
    /// Seconds between status polls.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// How long a new definition may take to become active.
    #[must_use]
    pub fn definition_timeout(&self) -> Duration {
        Duration::from_secs(self.definition_timeout_secs)
    }

    /// How long the job may run.
    #[must_use]
    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }
}

/// Scheduler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Re-runs of a failed task.
    pub retries: usize,
    /// Seconds between re-runs.
    pub retry_delay_secs: u64,
    /// Randomize re-run spacing.
    pub retry_jitter: bool,
    /// Seconds between sensor checks.
    pub sensor_poke_interval_secs: u64,
    /// Seconds before a sensor gives up.
    pub sensor_timeout_secs: u64,
    /// Extractor executable; defaults to the running binary.
    pub extractor_command: Option<PathBuf>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            retries: 3,
            retry_delay_secs: 300,
            retry_jitter: false,
            sensor_poke_interval_secs: 60,
            sensor_timeout_secs: 60 * 60 * 24 * 7,
            extractor_command: None,
        }
    }
}

impl SchedulerConfig {
    /// Spacing between re-runs.
    #[must_use]
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    /// Spacing between sensor checks.
    #[must_use]
    pub fn sensor_poke_interval(&self) -> Duration {
        Duration::from_secs(self.sensor_poke_interval_secs)
    }

    /// Sensor deadline.
    #[must_use]
    pub fn sensor_timeout(&self) -> Duration {
        Duration::from_secs(self.sensor_timeout_secs)
    }
}

/// One configured data-quality check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityCheckConfig {
    /// Table the check runs against.
    pub table: TableKind,
    /// Check expression, e.g. `missing_count(song_id) = 0`.
    pub check: String,
}

impl QualityCheckConfig {
    fn new(table: TableKind, check: &str) -> Self {
        Self {
            table,
            check: check.to_string(),
        }
    }
}

/// Data-quality settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    /// Checks evaluated by the quality gate.
    pub checks: Vec<QualityCheckConfig>,
}

impl Default for QualityConfig {
    fn default() -> Self {
        use TableKind::{ChartSongs, SongAttributes};
        Self {
            checks: vec![
                QualityCheckConfig::new(ChartSongs, "row_count > 0"),
                QualityCheckConfig::new(ChartSongs, "missing_count(song_id) = 0"),
                QualityCheckConfig::new(ChartSongs, "duplicate_count(song_id) = 0"),
                QualityCheckConfig::new(ChartSongs, "min(popularity) >= 0"),
                QualityCheckConfig::new(ChartSongs, "max(popularity) <= 100"),
                QualityCheckConfig::new(SongAttributes, "row_count > 0"),
                QualityCheckConfig::new(SongAttributes, "missing_count(song_id) = 0"),
                QualityCheckConfig::new(SongAttributes, "duplicate_count(song_id) = 0"),
                QualityCheckConfig::new(SongAttributes, "orphan_count(song_id) = 0"),
            ],
        }
    }
}

impl QualityConfig {
    /// Parses every configured check.
    ///
    /// # Errors
    ///
    /// Returns the first check that does not parse.
    pub fn parsed(&self) -> Result<Vec<QualityCheck>, ConfigError> {
        self.checks
            .iter()
            .map(|c| QualityCheck::parse(c.table, &c.check))
            .collect()
    }
}

/// What the configuration is about to be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigScope {
    /// The standalone extractor.
    Extract,
    /// A full graph run.
    Run,
}

impl ChartflowConfig {
    /// Loads configuration from all sources.
    ///
    /// A missing config file is not an error; every value has a default or
    /// can come from the environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Load`] if a source cannot be parsed or a value
    /// has the wrong type.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::figment(path).extract().map_err(ConfigError::from)
    }

    /// Returns the layered provider without extracting it.
    #[must_use]
    pub fn figment(path: Option<&Path>) -> Figment {
        let path = path.map_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE), Path::to_path_buf);

        Figment::new()
            .merge(Toml::file(path))
            .merge(
                Env::raw()
                    .only(&[
                        "AWS_ACCESS_KEY_ID",
                        "AWS_SECRET_ACCESS_KEY",
                        "AWS_SESSION_TOKEN",
                        "AWS_REGION",
                    ])
                    .map(|key| {
                        let field = key.as_str().to_ascii_lowercase();
                        let field = field.trim_start_matches("aws_");
                        format!("aws.{field}").into()
                    }),
            )
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .merge(Env::raw().only(&["CLIENTID", "CLIENTSECRET"]).map(|key| {
                if key.as_str().eq_ignore_ascii_case("CLIENTID") {
                    "spotify.client_id".into()
                } else {
                    "spotify.client_secret".into()
                }
            }))
    }

    /// Returns every problem that would stop the given command.
    #[must_use]
    pub fn problems(&self, scope: ConfigScope) -> Vec<ConfigError> {
        let mut problems = Vec::new();

        if self.spotify.client_id.is_empty() {
            problems.push(ConfigError::missing("spotify.client_id"));
        }
        if self.spotify.client_secret.is_empty() {
            problems.push(ConfigError::missing("spotify.client_secret"));
        }
        if self.spotify.page_limit == 0 || self.spotify.page_limit > 50 {
            problems.push(ConfigError::invalid("spotify.page_limit", "must be between 1 and 50"));
        }
        if self.spotify.feature_concurrency == 0 {
            problems.push(ConfigError::invalid(
                "spotify.feature_concurrency",
                "must be at least 1",
            ));
        }
        if self.storage.bucket.trim().is_empty() {
            problems.push(ConfigError::missing("storage.bucket"));
        }
        if self.storage.upload_attempts == 0 {
            problems.push(ConfigError::invalid("storage.upload_attempts", "must be at least 1"));
        }

        if scope == ConfigScope::Run {
            for (field, value) in [
                ("warehouse.host", &self.warehouse.host),
                ("warehouse.user", &self.warehouse.user),
                ("container.image", &self.container.image),
            ] {
                if value.trim().is_empty() {
                    problems.push(ConfigError::missing(field));
                }
            }
            if self.warehouse.password.is_empty() {
                problems.push(ConfigError::missing("warehouse.password"));
            }
            // The ECS client signs with the key pair even when COPY uses a role.
            if self.aws.credentials().is_none() {
                problems.push(ConfigError::invalid(
                    "aws.access_key_id",
                    "the container platform and COPY need aws.access_key_id/aws.secret_access_key",
                ));
            }
            if self.container.subnets.is_empty() {
                problems.push(ConfigError::missing("container.subnets"));
            }
            if let Err(e) = self.quality.parsed() {
                problems.push(e);
            }
        }

        problems
    }

    /// Fails with the first problem, if any.
    ///
    /// # Errors
    ///
    /// Returns the first entry of [`ChartflowConfig::problems`].
    pub fn validate(&self, scope: ConfigScope) -> Result<(), ConfigError> {
        match self.problems(scope).into_iter().next() {
            Some(problem) => Err(problem),
            None => Ok(()),
        }
    }

    /// Region of the container platform.
    #[must_use]
    pub fn container_region(&self) -> &str {
        self.container.region.as_deref().unwrap_or(&self.aws.region)
    }
}
