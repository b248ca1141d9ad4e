//! Poster metadata fallback.
//!
//! Used when the request source returns no artwork for a title.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use super::models::SourceError;
use crate::ledger::MediaKind;

#[async_trait]
pub trait PosterLookup: Send + Sync {
    /// Poster path (e.g. `/abc.jpg`) or `None` if the catalog has no artwork.
    async fn poster_path(&self, kind: MediaKind, tmdb_id: i64)
        -> Result<Option<String>, SourceError>;
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TmdbDetails {
    poster_path: Option<String>,
}

/// TMDB v3 client.
pub struct TmdbClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl TmdbClient {
    pub fn new(base_url: String, api_key: String) -> Result<Self, SourceError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            base_url,
            api_key,
        })
    }
}

#[async_trait]
impl PosterLookup for TmdbClient {
    async fn poster_path(
        &self,
        kind: MediaKind,
        tmdb_id: i64,
    ) -> Result<Option<String>, SourceError> {
        let url = format!("{}/3/{}/{}", self.base_url, kind.as_str(), tmdb_id);
        let response = self
            .client
            .get(&url)
            .query(&[("api_key", self.api_key.as_str()), ("language", "zh-CN")])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            // Body may echo the api key back
            return Err(SourceError::Status {
                status: status.as_u16(),
                body: String::new(),
            });
        }
        let details: TmdbDetails = response
            .json()
            .await
            .map_err(|e| SourceError::Decode(e.to_string()))?;
        Ok(details.poster_path.filter(|p| !p.is_empty()))
    }
}
