//! Record builders and a launcher that stages files without the API.

use crate::errors::ChartflowError;
use crate::extract::{to_csv, AudioFeatureRecord, ChartTrackRecord};
use crate::storage::{dated_key, ObjectStorage};
use crate::tasks::ExtractLauncher;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::NaiveDate;
use std::sync::Arc;

/// A chart record with the given id and popularity.
pub fn chart_record(song_id: &str, popularity: i64) -> ChartTrackRecord {
    ChartTrackRecord {
        song_id: song_id.to_string(),
        song_name: format!("Song {song_id}"),
        artist_name: "Artist".to_string(),
        artist_id: "artist-1".to_string(),
        number_on_album: 1,
        song_duration_ms: 180_000,
        popularity,
        explicit: false,
        album_id: "album-1".to_string(),
        album_name: "Album".to_string(),
        album_release_date: NaiveDate::from_ymd_opt(2023, 10, 6).unwrap(),
        album_total_tracks: 10,
    }
}

/// An audio-feature record for the given id.
pub fn feature_record(song_id: &str) -> AudioFeatureRecord {
    AudioFeatureRecord {
        song_id: song_id.to_string(),
        danceability: 0.7,
        energy: 0.6,
        loudness: -5.2,
        speechiness: 0.04,
        acousticness: 0.1,
        instrumentalness: 0.0,
        liveness: 0.12,
        valence: 0.5,
        tempo: 120.0,
        duration_ms: 180_000,
    }
}

/// Writes fixed CSVs under the default layout instead of calling the API.
#[derive(Debug)]
pub struct SeedingLauncher {
    storage: Arc<dyn ObjectStorage>,
    songs: Vec<ChartTrackRecord>,
    attributes: Vec<AudioFeatureRecord>,
    fail_with: Option<String>,
}

impl SeedingLauncher {
    /// Seeds the given records.
    pub fn new(
        storage: Arc<dyn ObjectStorage>,
        songs: Vec<ChartTrackRecord>,
        attributes: Vec<AudioFeatureRecord>,
    ) -> Self {
        Self {
            storage,
            songs,
            attributes,
            fail_with: None,
        }
    }

    /// A launcher whose extraction always fails.
    pub fn failing(storage: Arc<dyn ObjectStorage>, message: impl Into<String>) -> Self {
        Self {
            fail_with: Some(message.into()),
            ..Self::new(storage, Vec::new(), Vec::new())
        }
    }
}

#[async_trait]
impl ExtractLauncher for SeedingLauncher {
    async fn launch(&self, date: NaiveDate) -> Result<(), ChartflowError> {
        if let Some(message) = &self.fail_with {
            return Err(ChartflowError::StageExecution(message.clone()));
        }
        self.storage
            .put(
                &dated_key("raw/chart_songs", date, "songs.csv"),
                Bytes::from(to_csv(&self.songs)?),
            )
            .await?;
        self.storage
            .put(
                &dated_key("raw/song_attributes", date, "song_attributes.csv"),
                Bytes::from(to_csv(&self.attributes)?),
            )
            .await?;
        Ok(())
    }
}
