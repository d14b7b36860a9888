//! Staging table tasks.

use super::failed;
use crate::context::{ExecutionContext, StageContext};
use crate::core::StageOutput;
use crate::stages::Stage;
use crate::storage::dated_key;
use crate::warehouse::{TableKind, Warehouse};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

/// `CREATE TABLE IF NOT EXISTS` for one staging table.
#[derive(Debug, Clone)]
pub struct CreateStagingTableStage {
    name: String,
    warehouse: Arc<dyn Warehouse>,
    table: TableKind,
}

impl CreateStagingTableStage {
    /// Creates the stage.
    #[must_use]
    pub fn new(name: impl Into<String>, warehouse: Arc<dyn Warehouse>, table: TableKind) -> Self {
        Self {
            name: name.into(),
            warehouse,
            table,
        }
    }
}

#[async_trait]
impl Stage for CreateStagingTableStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _ctx: &StageContext) -> StageOutput {
        match self.warehouse.create_table(self.table).await {
            Ok(()) => StageOutput::ok_value("table", serde_json::json!(self.table.table_name())),
            Err(e) => failed(&self.name, e),
        }
    }
}

/// COPY of the run date's CSV into a staging table.
#[derive(Debug, Clone)]
pub struct CopyIntoStagingStage {
    name: String,
    warehouse: Arc<dyn Warehouse>,
    table: TableKind,
    bucket: String,
    prefix: String,
    file: String,
}

impl CopyIntoStagingStage {
    /// Creates the stage.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        warehouse: Arc<dyn Warehouse>,
        table: TableKind,
        bucket: impl Into<String>,
        prefix: impl Into<String>,
        file: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            warehouse,
            table,
            bucket: bucket.into(),
            prefix: prefix.into(),
            file: file.into(),
        }
    }
}

#[async_trait]
impl Stage for CopyIntoStagingStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &StageContext) -> StageOutput {
        let key = dated_key(&self.prefix, ctx.run_date(), &self.file);
        match self
            .warehouse
            .copy_from_storage(self.table, &self.bucket, &key)
            .await
        {
            Ok(()) => {
                info!(table = %self.table, key = %key, "Staged");
                StageOutput::ok_value("key", serde_json::json!(key))
            }
            Err(e) => failed(&self.name, e),
        }
    }
}

/// `TRUNCATE TABLE` for one staging table.
#[derive(Debug, Clone)]
pub struct TruncateStagingStage {
    name: String,
    warehouse: Arc<dyn Warehouse>,
    table: TableKind,
}

impl TruncateStagingStage {
    /// Creates the stage.
    #[must_use]
    pub fn new(name: impl Into<String>, warehouse: Arc<dyn Warehouse>, table: TableKind) -> Self {
        Self {
            name: name.into(),
            warehouse,
            table,
        }
    }
}

#[async_trait]
impl Stage for TruncateStagingStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _ctx: &StageContext) -> StageOutput {
        match self.warehouse.truncate(self.table).await {
            Ok(()) => StageOutput::ok_value("table", serde_json::json!(self.table.table_name())),
            Err(e) => failed(&self.name, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{PipelineContext, RunIdentity, StageInputs};
    use crate::core::StageStatus;
    use crate::extract::{to_csv, ChartTrackRecord};
    use crate::storage::{ObjectStorage, ObjectStoreStorage};
    use crate::testing::MemoryWarehouse;
    use bytes::Bytes;
    use chrono::NaiveDate;

    fn ctx(date: NaiveDate) -> StageContext {
        StageContext::new(
            Arc::new(PipelineContext::new(RunIdentity::new(date))),
            "task",
            StageInputs::default(),
        )
    }

    fn record(id: &str) -> ChartTrackRecord {
        ChartTrackRecord {
            song_id: id.into(),
            song_name: "n".into(),
            artist_name: "a".into(),
            artist_id: "ai".into(),
            number_on_album: 1,
            song_duration_ms: 1000,
            popularity: 10,
            explicit: false,
            album_id: "al".into(),
            album_name: "alb".into(),
            album_release_date: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
            album_total_tracks: 1,
        }
    }

    #[tokio::test]
    async fn test_create_copy_truncate() {
        let date = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        let storage = Arc::new(ObjectStoreStorage::in_memory("spotify-project1"));
        storage
            .put(
                "raw/chart_songs/2024-01-15/songs.csv",
                Bytes::from(to_csv(&[record("s1"), record("s2")]).unwrap()),
            )
            .await
            .unwrap();
        let warehouse = Arc::new(MemoryWarehouse::with_storage(storage));

        let create = CreateStagingTableStage::new("c", warehouse.clone(), TableKind::ChartSongs);
        let copy = CopyIntoStagingStage::new(
            "l",
            warehouse.clone(),
            TableKind::ChartSongs,
            "spotify-project1",
            "raw/chart_songs",
            "songs.csv",
        );
        let truncate = TruncateStagingStage::new("t", warehouse.clone(), TableKind::ChartSongs);

        assert_eq!(create.execute(&ctx(date)).await.status, StageStatus::Ok);
        assert!(warehouse.is_created(TableKind::ChartSongs));
        assert_eq!(copy.execute(&ctx(date)).await.status, StageStatus::Ok);
        assert_eq!(warehouse.rows(TableKind::ChartSongs), 2);
        assert_eq!(truncate.execute(&ctx(date)).await.status, StageStatus::Ok);
        assert_eq!(warehouse.rows(TableKind::ChartSongs), 0);
        // Truncating an empty table is fine.
        assert_eq!(truncate.execute(&ctx(date)).await.status, StageStatus::Ok);
    }

    #[tokio::test]
    async fn test_copy_of_missing_file_fails() {
        let storage = Arc::new(ObjectStoreStorage::in_memory("spotify-project1"));
        let warehouse = Arc::new(MemoryWarehouse::with_storage(storage));
        warehouse.create_table(TableKind::ChartSongs).await.unwrap();

        let copy = CopyIntoStagingStage::new(
            "l",
            warehouse,
            TableKind::ChartSongs,
            "spotify-project1",
            "raw/chart_songs",
            "songs.csv",
        );
        let output = copy
            .execute(&ctx(NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()))
            .await;

        assert_eq!(output.status, StageStatus::Fail);
    }
}
