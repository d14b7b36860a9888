//! Record shapes and the playlist transform.

use super::tabular::CsvRecord;
use crate::errors::ExtractError;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One chart entry, flattened from a playlist item.
///
/// Field order is the CSV column order and the staging table column order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartTrackRecord {
    /// Track id.
    pub song_id: String,
    /// Track title.
    pub song_name: String,
    /// Name of the first credited artist.
    pub artist_name: String,
    /// Id of the first credited artist.
    pub artist_id: String,
    /// Position on its album.
    pub number_on_album: i64,
    /// Track length in milliseconds.
    pub song_duration_ms: i64,
    /// Popularity score, 0 to 100.
    pub popularity: i64,
    /// Explicit-lyrics flag.
    pub explicit: bool,
    /// Album id.
    pub album_id: String,
    /// Album title.
    pub album_name: String,
    /// Release date, normalized to a full date.
    pub album_release_date: NaiveDate,
    /// Tracks on the album.
    pub album_total_tracks: i64,
}

/// Audio features of one chart entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioFeatureRecord {
    /// Track id, matching [`ChartTrackRecord::song_id`].
    pub song_id: String,
    /// 0.0 to 1.0.
    pub danceability: f64,
    /// 0.0 to 1.0.
    pub energy: f64,
    /// Average loudness in dB.
    pub loudness: f64,
    /// 0.0 to 1.0.
    pub speechiness: f64,
    /// 0.0 to 1.0.
    pub acousticness: f64,
    /// 0.0 to 1.0.
    pub instrumentalness: f64,
    /// 0.0 to 1.0.
    pub liveness: f64,
    /// 0.0 to 1.0.
    pub valence: f64,
    /// Estimated BPM.
    pub tempo: f64,
    /// Track length in milliseconds.
    pub duration_ms: i64,
}

impl CsvRecord for ChartTrackRecord {
    const HEADERS: &'static [&'static str] = &[
        "song_id",
        "song_name",
        "artist_name",
        "artist_id",
        "number_on_album",
        "song_duration_ms",
        "popularity",
        "explicit",
        "album_id",
        "album_name",
        "album_release_date",
        "album_total_tracks",
    ];
}

impl CsvRecord for AudioFeatureRecord {
    const HEADERS: &'static [&'static str] = &[
        "song_id",
        "danceability",
        "energy",
        "loudness",
        "speechiness",
        "acousticness",
        "instrumentalness",
        "liveness",
        "valence",
        "tempo",
        "duration_ms",
    ];
}

// Body of `GET /audio-features/{id}`; the API names the song id `id`.
#[derive(Debug, Deserialize)]
struct AudioFeaturesResponse {
    id: String,
    danceability: f64,
    energy: f64,
    loudness: f64,
    speechiness: f64,
    acousticness: f64,
    instrumentalness: f64,
    liveness: f64,
    valence: f64,
    tempo: f64,
    duration_ms: i64,
}

impl AudioFeaturesResponse {
    fn into_record(r: Self) -> AudioFeatureRecord {
        AudioFeatureRecord {
            song_id: r.id,
            danceability: r.danceability,
            energy: r.energy,
            loudness: r.loudness,
            speechiness: r.speechiness,
            acousticness: r.acousticness,
            instrumentalness: r.instrumentalness,
            liveness: r.liveness,
            valence: r.valence,
            tempo: r.tempo,
            duration_ms: r.duration_ms,
        }
    }
}

impl AudioFeatureRecord {
    /// Decodes an audio-features body.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError::Decode`] if a feature is missing or mistyped
    /// and [`ExtractError::IdMismatch`] if the body describes another track.
    pub fn from_json(song_id: &str, body: Value) -> Result<Self, ExtractError> {
        let response = serde_json::from_value::<AudioFeaturesResponse>(body)
            .map_err(|e| ExtractError::decode(format!("audio features of {song_id}"), e))?;
        if response.id != song_id {
            return Err(ExtractError::IdMismatch {
                requested: song_id.to_string(),
                returned: response.id,
            });
        }
        Ok(AudioFeaturesResponse::into_record(response))
    }
}

/// Flattens a playlist-tracks body into chart records, in item order.
///
/// Only the first artist of each track is kept.
///
/// # Errors
///
/// Returns [`ExtractError::MissingField`] naming the first absent or
/// mistyped field, and [`ExtractError::InvalidDate`] for an unparsable
/// release date.
pub fn transform_chart_json(body: &Value) -> Result<Vec<ChartTrackRecord>, ExtractError> {
    let items = body
        .get("items")
        .and_then(Value::as_array)
        .ok_or_else(|| ExtractError::MissingField {
            field: "items".to_string(),
            index: 0,
        })?;

    items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            let item = Item { value: item, index };
            let release = item.str("track.album.release_date")?;

            Ok(ChartTrackRecord {
                song_id: item.string("track.id")?,
                song_name: item.string("track.name")?,
                artist_name: item.string("track.artists.0.name")?,
                artist_id: item.string("track.artists.0.id")?,
                number_on_album: item.int("track.track_number")?,
                song_duration_ms: item.int("track.duration_ms")?,
                popularity: item.int("track.popularity")?,
                explicit: item.bool("track.explicit")?,
                album_id: item.string("track.album.id")?,
                album_name: item.string("track.album.name")?,
                album_release_date: parse_release_date(release)?,
                album_total_tracks: item.int("track.album.total_tracks")?,
            })
        })
        .collect()
}

/// Parses `YYYY`, `YYYY-MM` or `YYYY-MM-DD` to the first day of the period.
///
/// # Errors
///
/// Returns [`ExtractError::InvalidDate`] for anything else.
pub fn parse_release_date(raw: &str) -> Result<NaiveDate, ExtractError> {
    let invalid = || ExtractError::InvalidDate(raw.to_string());
    let parts: Vec<&str> = raw.split('-').collect();
    let number = |s: &str| s.parse::<u32>().map_err(|_| invalid());

    let (year, month, day) = match parts.as_slice() {
        [y] => (number(y)?, 1, 1),
        [y, m] => (number(y)?, number(m)?, 1),
        [y, m, d] => (number(y)?, number(m)?, number(d)?),
        _ => return Err(invalid()),
    };
    let year = i32::try_from(year).map_err(|_| invalid())?;

    NaiveDate::from_ymd_opt(year, month, day).ok_or_else(invalid)
}

struct Item<'a> {
    value: &'a Value,
    index: usize,
}

impl<'a> Item<'a> {
    fn at(&self, path: &str) -> Result<&'a Value, ExtractError> {
        path.split('.')
            .try_fold(self.value, |node, segment| match segment.parse::<usize>() {
                Ok(i) => node.get(i),
                Err(_) => node.get(segment),
            })
            .filter(|v| !v.is_null())
            .ok_or_else(|| self.missing(path))
    }

    fn missing(&self, path: &str) -> ExtractError {
        ExtractError::MissingField {
            field: path.to_string(),
            index: self.index,
        }
    }

    fn str(&self, path: &str) -> Result<&'a str, ExtractError> {
        self.at(path)?.as_str().ok_or_else(|| self.missing(path))
    }

    fn string(&self, path: &str) -> Result<String, ExtractError> {
        self.str(path).map(str::to_string)
    }

    fn int(&self, path: &str) -> Result<i64, ExtractError> {
        self.at(path)?.as_i64().ok_or_else(|| self.missing(path))
    }

    fn bool(&self, path: &str) -> Result<bool, ExtractError> {
        self.at(path)?.as_bool().ok_or_else(|| self.missing(path))
    }
}
