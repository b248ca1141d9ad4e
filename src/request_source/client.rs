//! HTTP client for the request-management front end (Jellyseerr/Overseerr API).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::models::*;
use crate::ledger::MediaKind;

/// Upper bound on `skip` before pagination is considered runaway.
pub const MAX_PAGINATION_SKIP: u32 = 10_000;

/// Read access to approved upstream requests.
#[cfg_attr(feature = "mock", mockall::automock)]
#[async_trait]
pub trait RequestSource: Send + Sync {
    /// One page of approved requests, oldest first.
    async fn list_approved(&self, take: u32, skip: u32) -> Result<RequestsPage, SourceError>;

    /// Title and poster for a movie or show.
    async fn media_details(&self, kind: MediaKind, tmdb_id: i64)
        -> Result<MediaDetails, SourceError>;
}

/// Fetch every approved request, one page at a time.
///
/// Stops at the first page shorter than `page_size`. Entries whose status is not
/// approved are dropped even if the server-side filter let them through.
pub async fn fetch_all_approved(
    source: &dyn RequestSource,
    page_size: u32,
    cancel: &CancellationToken,
) -> Result<Vec<SourceRequest>, SourceError> {
    if page_size == 0 {
        return Err(SourceError::InvalidPageSize(page_size));
    }
    let mut approved = Vec::new();
    let mut skip = 0u32;

    loop {
        let page = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SourceError::Cancelled),
            page = source.list_approved(page_size, skip) => page?,
        };
        let page_len = page.results.len();
        debug!("Fetched {} requests at skip {}", page_len, skip);

        approved.extend(page.results.into_iter().filter(|r| r.is_approved()));

        if page_len < page_size as usize {
            break;
        }
        skip += page_size;
        if skip > MAX_PAGINATION_SKIP {
            return Err(SourceError::PaginationCapExceeded { skip });
        }
    }

    Ok(approved)
}

/// Client for the front end's v1 REST API, authenticated with an API key.
#[derive(Clone)]
pub struct SeerrClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl SeerrClient {
    pub fn new(base_url: String, api_key: String, timeout_secs: u64) -> Result<Self, SourceError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url,
            api_key,
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, SourceError> {
        let response = self
            .client
            .get(url)
            .query(query)
            .header("X-Api-Key", &self.api_key)
            .header("Accept", "application/json")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| SourceError::Decode(e.to_string()))
    }
}

#[async_trait]
impl RequestSource for SeerrClient {
    async fn list_approved(&self, take: u32, skip: u32) -> Result<RequestsPage, SourceError> {
        let url = format!("{}/api/v1/request", self.base_url);
        self.get_json(
            &url,
            &[
                ("take", take.to_string()),
                ("skip", skip.to_string()),
                ("filter", "approved".to_string()),
                ("sort", "added".to_string()),
            ],
        )
        .await
    }

    async fn media_details(
        &self,
        kind: MediaKind,
        tmdb_id: i64,
    ) -> Result<MediaDetails, SourceError> {
        let url = format!("{}/api/v1/{}/{}", self.base_url, kind.as_str(), tmdb_id);
        self.get_json(&url, &[]).await
    }
}
