//! A local stand-in for the music API.

use crate::extract::basic_auth_header;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const CLIENT_ID: &str = "id";
const CLIENT_SECRET: &str = "secret";
const TOKEN: &str = "test-token";

#[derive(Debug, Default)]
struct ApiState {
    song_ids: Vec<String>,
    token_requests: AtomicUsize,
    feature_requests: AtomicUsize,
    feature_status: Mutex<Option<StatusCode>>,
    feature_id_override: Mutex<Option<String>>,
}

/// Handle to a running server.
///
/// Accepts the credentials `id` / `secret` and serves one playlist made of
/// the ids it was spawned with.
#[derive(Debug, Clone)]
pub struct MusicApi {
    addr: SocketAddr,
    state: Arc<ApiState>,
}

impl MusicApi {
    /// Token endpoint URL.
    pub fn token_url(&self) -> String {
        format!("http://{}/api/token", self.addr)
    }

    /// API base URL.
    pub fn base_url(&self) -> String {
        format!("http://{}/v1", self.addr)
    }

    /// Token requests served so far.
    pub fn token_requests(&self) -> usize {
        self.state.token_requests.load(Ordering::SeqCst)
    }

    /// Audio-feature requests served so far.
    pub fn feature_requests(&self) -> usize {
        self.state.feature_requests.load(Ordering::SeqCst)
    }

    /// Makes every audio-feature request answer with `status`.
    pub fn fail_features_with(&self, status: u16) {
        *self.state.feature_status.lock() = StatusCode::from_u16(status).ok();
    }

    /// Makes every audio-features body claim to describe `id`.
    pub fn answer_features_as(&self, id: &str) {
        *self.state.feature_id_override.lock() = Some(id.to_string());
    }
}

/// Starts the server on an ephemeral port.
pub async fn spawn_music_api(song_ids: &[&str]) -> MusicApi {
    let state = Arc::new(ApiState {
        song_ids: song_ids.iter().map(ToString::to_string).collect(),
        ..ApiState::default()
    });

    let app = Router::new()
        .route("/api/token", post(token))
        .route("/v1/playlists/:playlist/tracks", get(playlist_tracks))
        .route("/v1/audio-features/:id", get(audio_features))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    MusicApi { addr, state }
}

fn bearer_ok(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == format!("Bearer {TOKEN}"))
}

async fn token(State(state): State<Arc<ApiState>>, headers: HeaderMap) -> Response {
    state.token_requests.fetch_add(1, Ordering::SeqCst);
    let expected = basic_auth_header(CLIENT_ID, CLIENT_SECRET);
    let authorized = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == expected);

    if authorized {
        Json(json!({"access_token": TOKEN, "token_type": "Bearer", "expires_in": 3600}))
            .into_response()
    } else {
        (StatusCode::UNAUTHORIZED, Json(json!({"error": "invalid_client"}))).into_response()
    }
}

async fn playlist_tracks(
    State(state): State<Arc<ApiState>>,
    Path(_playlist): Path<String>,
    headers: HeaderMap,
) -> Response {
    if !bearer_ok(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let items: Vec<Value> = state
        .song_ids
        .iter()
        .enumerate()
        .map(|(i, id)| playlist_item(id, i))
        .collect();
    Json(json!({"items": items, "total": items.len()})).into_response()
}

async fn audio_features(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    state.feature_requests.fetch_add(1, Ordering::SeqCst);
    if !bearer_ok(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if let Some(status) = *state.feature_status.lock() {
        return (status, Json(json!({"error": {"status": status.as_u16()}}))).into_response();
    }
    let id = state.feature_id_override.lock().clone().unwrap_or(id);
    Json(json!({
        "id": id,
        "danceability": 0.7,
        "energy": 0.6,
        "loudness": -5.2,
        "speechiness": 0.04,
        "acousticness": 0.1,
        "instrumentalness": 0.0,
        "liveness": 0.12,
        "valence": 0.5,
        "tempo": 120.0,
        "duration_ms": 200_000,
        "type": "audio_features"
    }))
    .into_response()
}

fn playlist_item(id: &str, position: usize) -> Value {
    json!({
        "added_at": "2024-01-15T00:00:00Z",
        "track": {
            "id": id,
            "name": format!("Song {id}"),
            "artists": [{"id": format!("artist-{id}"), "name": format!("Artist {id}")}],
            "track_number": position + 1,
            "duration_ms": 180_000 + position * 1000,
            "popularity": 100 - (position % 100),
            "explicit": position % 2 == 0,
            "album": {
                "id": format!("album-{id}"),
                "name": format!("Album {id}"),
                "release_date": "2023-10-06",
                "total_tracks": 10
            }
        }
    })
}
