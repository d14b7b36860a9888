//! The chart pipeline graph.
//!
//! ```text
//! extract_and_upload_to_s3
//!   -> check_songs_file_exists     -> create_songs_stage      -> copy_in_chart_songs_stage
//!   -> check_attribute_file_exists -> create_attributes_stage -> copy_in_song_attributes_stage
//!   -> stage_data_tests (branch)
//!        checks_failed    -> truncate_stage_songs -> truncate_stage_attributes -> fail_run
//!        checks_succeeded -> register_dbt_task -> await_task_definition -> run_dbt_container
//!                         -> deregister_task -> truncate_stage_songs_2, truncate_stage_attributes_2
//! ```

use crate::config::ChartflowConfig;
use crate::container::{
    ContainerPlatform, DefinitionStatus, LaunchSpec, TaskDefinitionSpec, TaskState,
};
use crate::core::StageKind;
use crate::errors::{ChartflowError, ContainerError, WarehouseError};
use crate::pipeline::{JitterStrategy, PipelineBuilder, RetryConfig, StageGraph, StageSpec, TriggerRule};
use crate::quality::Metric;
use crate::stages::{NoOpStage, Stage};
use crate::storage::{ObjectStorage, ObjectStoreStorage};
use crate::tasks::{
    AwaitJobDefinitionStage, CopyIntoStagingStage, CreateStagingTableStage, DeregisterJobStage,
    ExtractLauncher, ExtractStage, FailRunStage, ObjectSensorStage, QualityGateStage,
    RegisterJobStage, RunJobStage, TruncateStagingStage,
};
use crate::warehouse::{TableKind, Warehouse};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::fmt::Write as _;
use std::sync::Arc;

/// Graph name.
pub const PIPELINE_NAME: &str = "spotify_charts";

/// Task ids.
pub mod ids {
    #![allow(missing_docs)]
    pub const EXTRACT: &str = "extract_and_upload_to_s3";
    pub const CHECK_SONGS_FILE: &str = "check_songs_file_exists";
    pub const CHECK_ATTRIBUTES_FILE: &str = "check_attribute_file_exists";
    pub const CREATE_SONGS: &str = "create_songs_stage";
    pub const COPY_SONGS: &str = "copy_in_chart_songs_stage";
    pub const CREATE_ATTRIBUTES: &str = "create_attributes_stage";
    pub const COPY_ATTRIBUTES: &str = "copy_in_song_attributes_stage";
    pub const DATA_TESTS: &str = "stage_data_tests";
    pub const CHECKS_FAILED: &str = "checks_failed";
    pub const TRUNCATE_SONGS: &str = "truncate_stage_songs";
    pub const TRUNCATE_ATTRIBUTES: &str = "truncate_stage_attributes";
    pub const FAIL_RUN: &str = "fail_run";
    pub const CHECKS_SUCCEEDED: &str = "checks_succeeded";
    pub const REGISTER_JOB: &str = "register_dbt_task";
    pub const AWAIT_JOB_DEFINITION: &str = "await_task_definition";
    pub const RUN_JOB: &str = "run_dbt_container";
    pub const DEREGISTER_JOB: &str = "deregister_task";
    pub const TRUNCATE_SONGS_AFTER: &str = "truncate_stage_songs_2";
    pub const TRUNCATE_ATTRIBUTES_AFTER: &str = "truncate_stage_attributes_2";
}

/// The external services the graph drives.
#[derive(Debug, Clone)]
pub struct ChartComponents {
    /// Runs the extractor.
    pub launcher: Arc<dyn ExtractLauncher>,
    /// Where the extractor writes.
    pub storage: Arc<dyn ObjectStorage>,
    /// Holds the staging tables.
    pub warehouse: Arc<dyn Warehouse>,
    /// Runs the transformation job.
    pub platform: Arc<dyn ContainerPlatform>,
}

impl ChartComponents {
    /// Components that refuse every call, for inspecting the graph offline.
    #[must_use]
    pub fn detached(bucket: &str) -> Self {
        let detached = Arc::new(Detached);
        Self {
            launcher: detached.clone(),
            storage: Arc::new(ObjectStoreStorage::in_memory(bucket)),
            warehouse: detached.clone(),
            platform: detached,
        }
    }
}

#[derive(Debug)]
struct Detached;

#[async_trait]
impl ExtractLauncher for Detached {
    async fn launch(&self, _date: NaiveDate) -> Result<(), ChartflowError> {
        Err(ChartflowError::Internal("detached graph cannot extract".to_string()))
    }
}

#[async_trait]
impl Warehouse for Detached {
    async fn create_table(&self, table: TableKind) -> Result<(), WarehouseError> {
        Err(WarehouseError::Unsupported(format!("create {table}")))
    }

    async fn copy_from_storage(
        &self,
        table: TableKind,
        _bucket: &str,
        _key: &str,
    ) -> Result<(), WarehouseError> {
        Err(WarehouseError::Unsupported(format!("copy into {table}")))
    }

    async fn truncate(&self, table: TableKind) -> Result<(), WarehouseError> {
        Err(WarehouseError::Unsupported(format!("truncate {table}")))
    }

    async fn measure(&self, table: TableKind, _metric: &Metric) -> Result<Option<f64>, WarehouseError> {
        Err(WarehouseError::Unsupported(format!("measure {table}")))
    }

    async fn row_count(&self, table: TableKind) -> Result<u64, WarehouseError> {
        Err(WarehouseError::Unsupported(format!("count {table}")))
    }
}

#[async_trait]
impl ContainerPlatform for Detached {
    async fn register_task_definition(
        &self,
        spec: &TaskDefinitionSpec,
    ) -> Result<String, ContainerError> {
        Err(ContainerError::Rejected(format!("detached: {}", spec.family)))
    }

    async fn describe_task_definition(
        &self,
        arn: &str,
    ) -> Result<Option<DefinitionStatus>, ContainerError> {
        Err(ContainerError::Rejected(format!("detached: {arn}")))
    }

    async fn run_task(&self, definition_arn: &str, _launch: &LaunchSpec) -> Result<String, ContainerError> {
        Err(ContainerError::Rejected(format!("detached: {definition_arn}")))
    }

    async fn describe_task(&self, _cluster: &str, task_arn: &str) -> Result<TaskState, ContainerError> {
        Err(ContainerError::Rejected(format!("detached: {task_arn}")))
    }

    async fn deregister_task_definition(&self, arn: &str) -> Result<(), ContainerError> {
        Err(ContainerError::Rejected(format!("detached: {arn}")))
    }
}

/// The scheduler's default retry policy from configuration.
#[must_use]
pub fn default_retry(config: &ChartflowConfig) -> RetryConfig {
    let retry = RetryConfig::scheduler(config.scheduler.retries, config.scheduler.retry_delay());
    if config.scheduler.retry_jitter {
        retry.with_jitter(JitterStrategy::Equal)
    } else {
        retry
    }
}

fn spec(name: &str, runner: impl Stage + 'static, deps: &[&str]) -> StageSpec {
    StageSpec::new(name, Arc::new(runner)).with_dependencies(deps.iter().copied())
}

/// Builds the chart graph.
///
/// # Errors
///
/// Returns [`ChartflowError::Config`] if a quality check does not parse, and
/// [`ChartflowError::Validation`] if the graph is malformed.
pub fn build_chart_graph(
    config: &ChartflowConfig,
    components: &ChartComponents,
) -> Result<StageGraph, ChartflowError> {
    use ids::*;

    let layout = &config.storage;
    let scheduler = &config.scheduler;
    let container = &config.container;
    let checks = config.quality.parsed()?;
    let bucket = components.storage.bucket().to_string();
    let warehouse = &components.warehouse;
    let platform = &components.platform;

    let sensor = |name: &str, prefix: &str, file: &str| {
        ObjectSensorStage::new(name, components.storage.clone(), prefix, file)
            .with_timing(scheduler.sensor_poke_interval(), scheduler.sensor_timeout())
    };
    let truncate =
        |name: &str, table| TruncateStagingStage::new(name, warehouse.clone(), table);

    let graph = PipelineBuilder::new(PIPELINE_NAME)
        .with_default_retry(default_retry(config))
        .spec(spec(EXTRACT, ExtractStage::new(EXTRACT, components.launcher.clone()), &[]))?
        .spec(
            spec(
                CHECK_SONGS_FILE,
                sensor(CHECK_SONGS_FILE, &layout.chart_songs_prefix, &layout.chart_songs_file),
                &[EXTRACT],
            )
            .with_kind(StageKind::Sensor),
        )?
        .spec(
            spec(
                CHECK_ATTRIBUTES_FILE,
                sensor(
                    CHECK_ATTRIBUTES_FILE,
                    &layout.song_attributes_prefix,
                    &layout.song_attributes_file,
                ),
                &[EXTRACT],
            )
            .with_kind(StageKind::Sensor),
        )?
        .spec(spec(
            CREATE_SONGS,
            CreateStagingTableStage::new(CREATE_SONGS, warehouse.clone(), TableKind::ChartSongs),
            &[CHECK_SONGS_FILE],
        ))?
        .spec(spec(
            COPY_SONGS,
            CopyIntoStagingStage::new(
                COPY_SONGS,
                warehouse.clone(),
                TableKind::ChartSongs,
                bucket.clone(),
                layout.chart_songs_prefix.clone(),
                layout.chart_songs_file.clone(),
            ),
            &[CREATE_SONGS],
        ))?
        .spec(spec(
            CREATE_ATTRIBUTES,
            CreateStagingTableStage::new(
                CREATE_ATTRIBUTES,
                warehouse.clone(),
                TableKind::SongAttributes,
            ),
            &[CHECK_ATTRIBUTES_FILE],
        ))?
        .spec(spec(
            COPY_ATTRIBUTES,
            CopyIntoStagingStage::new(
                COPY_ATTRIBUTES,
                warehouse.clone(),
                TableKind::SongAttributes,
                bucket,
                layout.song_attributes_prefix.clone(),
                layout.song_attributes_file.clone(),
            ),
            &[CREATE_ATTRIBUTES],
        ))?
        .spec(
            spec(
                DATA_TESTS,
                QualityGateStage::new(
                    DATA_TESTS,
                    warehouse.clone(),
                    checks,
                    CHECKS_SUCCEEDED,
                    CHECKS_FAILED,
                ),
                &[COPY_SONGS, COPY_ATTRIBUTES],
            )
            .with_kind(StageKind::Branch),
        )?
        // Failure path.
        .spec(spec(CHECKS_FAILED, NoOpStage::new(CHECKS_FAILED), &[DATA_TESTS]).with_kind(StageKind::Join))?
        .spec(spec(
            TRUNCATE_SONGS,
            truncate(TRUNCATE_SONGS, TableKind::ChartSongs),
            &[CHECKS_FAILED],
        ))?
        .spec(spec(
            TRUNCATE_ATTRIBUTES,
            truncate(TRUNCATE_ATTRIBUTES, TableKind::SongAttributes),
            &[TRUNCATE_SONGS],
        ))?
        .spec(
            spec(FAIL_RUN, FailRunStage::new(FAIL_RUN, DATA_TESTS), &[TRUNCATE_ATTRIBUTES])
                .with_kind(StageKind::Terminal),
        )?
        // Success path.
        .spec(
            spec(CHECKS_SUCCEEDED, NoOpStage::new(CHECKS_SUCCEEDED), &[DATA_TESTS])
                .with_kind(StageKind::Join),
        )?
        .spec(spec(
            REGISTER_JOB,
            RegisterJobStage::new(
                REGISTER_JOB,
                platform.clone(),
                TaskDefinitionSpec::from_config(container, &config.warehouse),
            ),
            &[CHECKS_SUCCEEDED],
        ))?
        .spec(spec(
            AWAIT_JOB_DEFINITION,
            AwaitJobDefinitionStage::new(
                AWAIT_JOB_DEFINITION,
                platform.clone(),
                REGISTER_JOB,
                container.poll_interval(),
                container.definition_timeout(),
            ),
            &[REGISTER_JOB],
        ))?
        .spec(spec(
            RUN_JOB,
            RunJobStage::new(RUN_JOB, platform.clone(), REGISTER_JOB, LaunchSpec::from_config(container))
                .with_timing(container.poll_interval(), container.run_timeout()),
            &[AWAIT_JOB_DEFINITION],
        ))?
        .spec(
            spec(
                DEREGISTER_JOB,
                DeregisterJobStage::new(DEREGISTER_JOB, platform.clone(), REGISTER_JOB),
                &[RUN_JOB],
            )
            .with_trigger_rule(TriggerRule::AllDone),
        )?
        .spec(
            spec(
                TRUNCATE_SONGS_AFTER,
                truncate(TRUNCATE_SONGS_AFTER, TableKind::ChartSongs),
                &[DEREGISTER_JOB],
            )
            .with_trigger_rule(TriggerRule::AllDone),
        )?
        .spec(
            spec(
                TRUNCATE_ATTRIBUTES_AFTER,
                truncate(TRUNCATE_ATTRIBUTES_AFTER, TableKind::SongAttributes),
                &[DEREGISTER_JOB],
            )
            .with_trigger_rule(TriggerRule::AllDone),
        )?
        .build()?;

    Ok(graph)
}

/// Renders tasks with their kind, trigger rule and upstream tasks.
#[must_use]
pub fn render_graph(graph: &StageGraph) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{} ({} tasks)", graph.name(), graph.stage_count());
    for spec in graph.specs() {
        let deps = spec.sorted_dependencies();
        let upstream = if deps.is_empty() {
            "-".to_string()
        } else {
            deps.join(", ")
        };
        let _ = writeln!(
            out,
            "  {:<32} {:<9} {:<12} <- {upstream}",
            spec.name, spec.kind, spec.trigger_rule
        );
    }
    out
}
