//! The data warehouse holding the staging tables.

mod redshift;
pub mod sql;

pub use redshift::RedshiftWarehouse;

use crate::errors::WarehouseError;
use crate::quality::Metric;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the two staging tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableKind {
    /// `stg_chart_songs`
    ChartSongs,
    /// `stg_song_attributes`
    SongAttributes,
}

const CHART_SONGS_COLUMNS: &[(&str, &str)] = &[
    ("song_id", "varchar(22)"),
    ("song_name", "varchar(200)"),
    ("artist_name", "varchar(200)"),
    ("artist_id", "varchar(22)"),
    ("number_on_album", "smallint"),
    ("song_duration_ms", "bigint"),
    ("popularity", "smallint"),
    ("explicit", "boolean"),
    ("album_id", "varchar(22)"),
    ("album_name", "varchar(200)"),
    ("album_release_date", "date"),
    ("album_total_tracks", "smallint"),
];

const SONG_ATTRIBUTES_COLUMNS: &[(&str, &str)] = &[
    ("song_id", "varchar(22)"),
    ("danceability", "double precision"),
    ("energy", "double precision"),
    ("loudness", "double precision"),
    ("speechiness", "double precision"),
    ("acousticness", "double precision"),
    ("instrumentalness", "double precision"),
    ("liveness", "double precision"),
    ("valence", "double precision"),
    ("tempo", "double precision"),
    ("duration_ms", "bigint"),
];

impl TableKind {
    /// Both tables.
    pub const ALL: [Self; 2] = [Self::ChartSongs, Self::SongAttributes];

    /// Unqualified table name.
    #[must_use]
    pub fn table_name(self) -> &'static str {
        match self {
            Self::ChartSongs => "stg_chart_songs",
            Self::SongAttributes => "stg_song_attributes",
        }
    }

    /// Column names and types, in CSV order.
    #[must_use]
    pub fn columns(self) -> &'static [(&'static str, &'static str)] {
        match self {
            Self::ChartSongs => CHART_SONGS_COLUMNS,
            Self::SongAttributes => SONG_ATTRIBUTES_COLUMNS,
        }
    }

    /// Returns true if the table has the column.
    #[must_use]
    pub fn has_column(self, column: &str) -> bool {
        self.columns().iter().any(|(name, _)| *name == column)
    }

    /// The other staging table.
    #[must_use]
    pub fn other(self) -> Self {
        match self {
            Self::ChartSongs => Self::SongAttributes,
            Self::SongAttributes => Self::ChartSongs,
        }
    }
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table_name())
    }
}

/// Statements the pipeline runs against the warehouse.
#[async_trait]
pub trait Warehouse: Send + Sync + fmt::Debug {
    /// Creates the table if it does not exist.
    async fn create_table(&self, table: TableKind) -> Result<(), WarehouseError>;

    /// Bulk-loads a staged CSV (header row skipped) into the table.
    async fn copy_from_storage(
        &self,
        table: TableKind,
        bucket: &str,
        key: &str,
    ) -> Result<(), WarehouseError>;

    /// Empties the table. Succeeds on an empty table.
    async fn truncate(&self, table: TableKind) -> Result<(), WarehouseError>;

    /// Computes one scalar metric; `None` when the aggregate is NULL.
    async fn measure(&self, table: TableKind, metric: &Metric) -> Result<Option<f64>, WarehouseError>;

    /// Rows currently in the table.
    async fn row_count(&self, table: TableKind) -> Result<u64, WarehouseError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_columns_match_record_fields() {
        use crate::extract::{AudioFeatureRecord, ChartTrackRecord};

        fn header<T: crate::extract::CsvRecord>(record: &T) -> String {
            let body = crate::extract::to_csv(std::slice::from_ref(record)).unwrap();
            String::from_utf8(body).unwrap().lines().next().unwrap().to_string()
        }

        let chart = ChartTrackRecord {
            song_id: String::new(),
            song_name: String::new(),
            artist_name: String::new(),
            artist_id: String::new(),
            number_on_album: 0,
            song_duration_ms: 0,
            popularity: 0,
            explicit: false,
            album_id: String::new(),
            album_name: String::new(),
            album_release_date: chrono::NaiveDate::MIN,
            album_total_tracks: 0,
        };
        let features = AudioFeatureRecord {
            song_id: String::new(),
            danceability: 0.0,
            energy: 0.0,
            loudness: 0.0,
            speechiness: 0.0,
            acousticness: 0.0,
            instrumentalness: 0.0,
            liveness: 0.0,
            valence: 0.0,
            tempo: 0.0,
            duration_ms: 0,
        };

        let names = |t: TableKind| t.columns().iter().map(|(n, _)| *n).collect::<Vec<_>>().join(",");
        assert_eq!(header(&chart), names(TableKind::ChartSongs));
        assert_eq!(header(&features), names(TableKind::SongAttributes));
    }

    #[test]
    fn test_table_names() {
        assert_eq!(TableKind::ChartSongs.to_string(), "stg_chart_songs");
        assert_eq!(TableKind::ChartSongs.other(), TableKind::SongAttributes);
        assert!(TableKind::SongAttributes.has_column("tempo"));
        assert!(!TableKind::SongAttributes.has_column("popularity"));
    }
}
