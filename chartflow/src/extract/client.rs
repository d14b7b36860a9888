//! HTTP client for the music API.

use super::models::AudioFeatureRecord;
use crate::config::{Secret, SpotifyConfig};
use crate::errors::ExtractError;
use base64::Engine;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Builds the `Basic` credential for the token endpoint.
#[must_use]
pub fn basic_auth_header(client_id: &str, client_secret: &str) -> String {
    let encoded =
        base64::engine::general_purpose::STANDARD.encode(format!("{client_id}:{client_secret}"));
    format!("Basic {encoded}")
}

/// Thin client over the token, playlist and audio-features endpoints.
#[derive(Debug, Clone)]
pub struct SpotifyClient {
    http: Client,
    config: SpotifyConfig,
}

impl SpotifyClient {
    /// Creates a client with the configured timeout.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError::Request`] if the TLS backend cannot start.
    pub fn new(config: SpotifyConfig) -> Result<Self, ExtractError> {
        let http = Client::builder()
            .timeout(config.request_timeout())
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|source| ExtractError::Request {
                url: config.api_base_url.clone(),
                source,
            })?;
        Ok(Self { http, config })
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &SpotifyConfig {
        &self.config
    }

    /// Exchanges the client credentials for a bearer token.
    ///
    /// Not retried.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError::TokenRejected`] on a non-2xx answer and
    /// [`ExtractError::Decode`] if the body has no `access_token`.
    pub async fn fetch_token(&self) -> Result<Secret, ExtractError> {
        let url = &self.config.token_url;
        debug!(url = %url, "Requesting access token");

        let response = self
            .http
            .post(url)
            .header(
                AUTHORIZATION,
                basic_auth_header(
                    self.config.client_id.expose(),
                    self.config.client_secret.expose(),
                ),
            )
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body("grant_type=client_credentials")
            .send()
            .await
            .map_err(|source| ExtractError::Request {
                url: url.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ExtractError::TokenRejected {
                status: status.as_u16(),
            });
        }

        let body = response.text().await.map_err(|source| ExtractError::Request {
            url: url.clone(),
            source,
        })?;
        let token: TokenResponse =
            serde_json::from_str(&body).map_err(|e| ExtractError::decode("token response", e))?;

        Ok(Secret::new(token.access_token))
    }

    /// Performs one GET with `limit` set to the page size.
    ///
    /// Connection errors and timeouts are retried immediately, at most
    /// `max_retries` times. Redirect loops and error statuses are not.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError::RetriesExhausted`] once the budget is spent,
    /// [`ExtractError::TooManyRedirects`], [`ExtractError::HttpStatus`] or
    /// [`ExtractError::Decode`].
    pub async fn get_json(&self, url: &str, token: &Secret) -> Result<Value, ExtractError> {
        let max_retries = self.config.max_retries;
        let mut attempt = 0usize;

        let body = loop {
            attempt += 1;
            let sent = self
                .http
                .get(url)
                .header(ACCEPT, "application/json")
                .header(CONTENT_TYPE, "application/json")
                .header(AUTHORIZATION, format!("Bearer {}", token.expose()))
                .query(&[("limit", self.config.page_limit)])
                .send()
                .await;

            // A body that stalls past the timeout counts like a stalled connect.
            let result = match sent {
                Ok(response) => {
                    let status = response.status();
                    if !status.is_success() {
                        return Err(ExtractError::HttpStatus {
                            url: url.to_string(),
                            status: status.as_u16(),
                        });
                    }
                    response.text().await
                }
                Err(e) => Err(e),
            };

            match result {
                Ok(body) => break body,
                Err(e) if e.is_redirect() => {
                    return Err(ExtractError::TooManyRedirects {
                        url: url.to_string(),
                    });
                }
                Err(e) if e.is_connect() || e.is_timeout() => {
                    if attempt > max_retries {
                        return Err(ExtractError::RetriesExhausted {
                            url: url.to_string(),
                            attempts: attempt,
                            source: e,
                        });
                    }
                    warn!(url, attempt, error = %e, "Request to the API failed, retrying");
                }
                Err(source) => {
                    return Err(ExtractError::Request {
                        url: url.to_string(),
                        source,
                    });
                }
            }
        };

        serde_json::from_str(&body).map_err(|e| ExtractError::decode(url, e))
    }

    /// URL of the configured playlist's tracks.
    #[must_use]
    pub fn playlist_tracks_url(&self) -> String {
        format!(
            "{}/playlists/{}/tracks",
            self.config.api_base_url.trim_end_matches('/'),
            self.config.playlist_id
        )
    }

    /// Fetches the raw playlist-tracks body.
    ///
    /// # Errors
    ///
    /// See [`SpotifyClient::get_json`].
    pub async fn playlist_tracks(&self, token: &Secret) -> Result<Value, ExtractError> {
        self.get_json(&self.playlist_tracks_url(), token).await
    }

    /// Fetches and decodes one track's audio features.
    ///
    /// # Errors
    ///
    /// See [`SpotifyClient::get_json`] and [`AudioFeatureRecord::from_json`].
    pub async fn audio_features(
        &self,
        song_id: &str,
        token: &Secret,
    ) -> Result<AudioFeatureRecord, ExtractError> {
        let url = format!(
            "{}/audio-features/{song_id}",
            self.config.api_base_url.trim_end_matches('/')
        );
        let body = self.get_json(&url, token).await?;
        AudioFeatureRecord::from_json(song_id, body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_basic_auth_header() {
        // base64("id:secret")
        assert_eq!(basic_auth_header("id", "secret"), "Basic aWQ6c2VjcmV0");
    }

    #[test]
    fn test_playlist_url() {
        let client = SpotifyClient::new(SpotifyConfig {
            api_base_url: "http://localhost:9/v1/".to_string(),
            ..SpotifyConfig::default()
        })
        .unwrap();
        assert_eq!(
            client.playlist_tracks_url(),
            "http://localhost:9/v1/playlists/37i9dQZEVXbMDoHDwVN2tF/tracks"
        );
    }

    #[tokio::test]
    async fn test_connection_errors_are_bounded() {
        // Reserve a port, then close it so every connect is refused.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = SpotifyClient::new(SpotifyConfig {
            api_base_url: format!("http://{addr}/v1"),
            max_retries: 2,
            request_timeout_secs: 2,
            ..SpotifyConfig::default()
        })
        .unwrap();

        let err = tokio::time::timeout(
            Duration::from_secs(20),
            client.playlist_tracks(&Secret::new("t")),
        )
        .await
        .unwrap()
        .unwrap_err();

        assert!(matches!(err, ExtractError::RetriesExhausted { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn test_stalled_body_is_retried_like_a_timeout() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        // Sends headers and one byte of a 100-byte body, then goes quiet.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connections = Arc::new(AtomicUsize::new(0));
        let seen = connections.clone();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                seen.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    let mut request = [0u8; 1024];
                    let _ = socket.read(&mut request).await;
                    let _ = socket
                        .write_all(
                            b"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 100\r\n\r\n{",
                        )
                        .await;
                    tokio::time::sleep(Duration::from_secs(30)).await;
                });
            }
        });

        let client = SpotifyClient::new(SpotifyConfig {
            api_base_url: format!("http://{addr}/v1"),
            max_retries: 2,
            request_timeout_secs: 1,
            ..SpotifyConfig::default()
        })
        .unwrap();

        let err = tokio::time::timeout(
            Duration::from_secs(20),
            client.playlist_tracks(&Secret::new("t")),
        )
        .await
        .unwrap()
        .unwrap_err();

        assert!(matches!(err, ExtractError::RetriesExhausted { attempts: 3, .. }));
        assert_eq!(connections.load(Ordering::SeqCst), 3);
    }
}
