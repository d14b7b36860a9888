//! The extractor: music API to dated CSV objects.
//!
//! A run fetches a token, pulls the playlist, flattens it into
//! [`ChartTrackRecord`]s and uploads them; then it fetches a fresh token,
//! pulls one audio-features body per track and uploads those.

mod client;
mod models;
mod tabular;

pub use client::{basic_auth_header, SpotifyClient};
pub use models::{parse_release_date, transform_chart_json, AudioFeatureRecord, ChartTrackRecord};
pub use tabular::{from_csv, to_csv, CsvRecord};

use crate::config::{Secret, StorageConfig};
use crate::errors::ExtractError;
use crate::storage::{dated_key, upload_csv, ObjectStorage, UploadReport, UploadTarget};
use chrono::NaiveDate;
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument};

/// What one extraction wrote.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractReport {
    /// Date partition written.
    pub run_date: NaiveDate,
    /// Chart records uploaded.
    pub tracks: usize,
    /// Audio-feature records uploaded.
    pub features: usize,
    /// One entry per uploaded object.
    pub uploads: Vec<UploadReport>,
}

/// Runs the extraction against a client and a storage.
#[derive(Debug, Clone)]
pub struct Extractor {
    client: SpotifyClient,
    storage: Arc<dyn ObjectStorage>,
    layout: StorageConfig,
}

impl Extractor {
    /// Creates an extractor.
    #[must_use]
    pub fn new(client: SpotifyClient, storage: Arc<dyn ObjectStorage>, layout: StorageConfig) -> Self {
        Self {
            client,
            storage,
            layout,
        }
    }

    /// Key of the chart CSV for a date.
    #[must_use]
    pub fn chart_songs_key(&self, date: NaiveDate) -> String {
        dated_key(&self.layout.chart_songs_prefix, date, &self.layout.chart_songs_file)
    }

    /// Key of the audio-feature CSV for a date.
    #[must_use]
    pub fn song_attributes_key(&self, date: NaiveDate) -> String {
        dated_key(
            &self.layout.song_attributes_prefix,
            date,
            &self.layout.song_attributes_file,
        )
    }

    fn target(&self, key: String) -> UploadTarget {
        UploadTarget::new(
            key,
            self.layout.upload_attempts,
            self.layout.upload_initial_delay(),
        )
    }

    /// Fetches and flattens the playlist.
    ///
    /// # Errors
    ///
    /// Propagates request and transform errors.
    pub async fn chart_tracks(&self, token: &Secret) -> Result<Vec<ChartTrackRecord>, ExtractError> {
        let body = self.client.playlist_tracks(token).await?;
        transform_chart_json(&body)
    }

    /// Fetches one audio-features record per chart record, in chart order.
    ///
    /// With `feature_concurrency > 1` requests overlap but results keep
    /// their input order.
    ///
    /// # Errors
    ///
    /// Returns the first request error, including a body that describes a
    /// different track ([`ExtractError::IdMismatch`]).
    pub async fn audio_features(
        &self,
        tracks: &[ChartTrackRecord],
        token: &Secret,
    ) -> Result<Vec<AudioFeatureRecord>, ExtractError> {
        let concurrency = self.client.config().feature_concurrency.max(1);

        let song_ids: Vec<String> = tracks.iter().map(|track| track.song_id.clone()).collect();

        stream::iter(song_ids)
            .map(|song_id| {
                let client = self.client.clone();
                let token = token.clone();
                async move { client.audio_features(&song_id, &token).await }
            })
            .buffered(concurrency)
            .try_collect()
            .await
    }

    /// Runs a full extraction for `date`.
    ///
    /// # Errors
    ///
    /// Returns the first error; nothing after it runs.
    #[instrument(skip(self), fields(bucket = self.storage.bucket()))]
    pub async fn run(&self, date: NaiveDate) -> Result<ExtractReport, ExtractError> {
        let token = self.client.fetch_token().await?;
        let tracks = self.chart_tracks(&token).await?;
        info!(tracks = tracks.len(), "Fetched chart");

        let chart_upload =
            upload_csv(self.storage.as_ref(), &self.target(self.chart_songs_key(date)), &tracks)
                .await?;

        // Per-track requests can outlive the first token.
        let token = self.client.fetch_token().await?;
        let features = self.audio_features(&tracks, &token).await?;
        info!(features = features.len(), "Fetched audio features");

        let features_upload = upload_csv(
            self.storage.as_ref(),
            &self.target(self.song_attributes_key(date)),
            &features,
        )
        .await?;

        Ok(ExtractReport {
            run_date: date,
            tracks: tracks.len(),
            features: features.len(),
            uploads: vec![chart_upload, features_upload],
        })
    }
}
