//! HTTP client for the acquisition backend.
//!
//! Every call takes a permit from the request throttler, attaches the cached
//! credential according to the configured auth scheme and aborts as soon as the
//! caller's cancellation token fires. Only subscribe calls are retried.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::models::*;
use super::retry_policy::RetryPolicy;
use super::throttle::{RequestThrottler, ThrottlerConfig};
use super::token::TokenManager;
use super::BackendError;
use crate::config::BackendSettings;
use crate::ledger::MediaKind;

/// Longest response body kept in an error message.
const MAX_ERROR_BODY_CHARS: usize = 300;

/// How the access token is attached to outgoing requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScheme {
    /// `Authorization: Bearer <token>`
    Bearer,
    /// `X-API-Token: <token>`
    ApiToken,
    /// `?token=<token>`
    QueryToken,
}

impl AuthScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthScheme::Bearer => "bearer",
            AuthScheme::ApiToken => "x-api-token",
            AuthScheme::QueryToken => "query-token",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "bearer" => Some(AuthScheme::Bearer),
            "x-api-token" | "api-token" => Some(AuthScheme::ApiToken),
            "query-token" | "query" => Some(AuthScheme::QueryToken),
            _ => None,
        }
    }

    /// Attach `token` to a request.
    pub fn apply(&self, request: RequestBuilder, token: &str) -> RequestBuilder {
        match self {
            AuthScheme::Bearer => request.bearer_auth(token),
            AuthScheme::ApiToken => request.header("X-API-Token", token),
            AuthScheme::QueryToken => request.query(&[("token", token)]),
        }
    }
}

/// Operations the sync pipeline and the tracker need from the backend.
#[cfg_attr(feature = "mock", mockall::automock)]
#[async_trait]
pub trait AcquisitionBackend: Send + Sync {
    /// Make sure a credential is available before a batch of calls.
    async fn authenticate(&self, _cancel: &CancellationToken) -> Result<(), BackendError> {
        Ok(())
    }

    /// Create a subscription. "Already exists" answers are successes with
    /// `already_exists` set.
    async fn subscribe(
        &self,
        spec: &SubscribeSpec,
        cancel: &CancellationToken,
    ) -> Result<SubscribeOutcome, BackendError>;

    /// One page of download history, most recent first. Not retried.
    async fn download_history(
        &self,
        page: u32,
        count: u32,
        cancel: &CancellationToken,
    ) -> Result<Vec<HistoryEntry>, BackendError>;

    /// One page of transfer (library import) history, most recent first. Not retried.
    async fn transfer_history(
        &self,
        page: u32,
        count: u32,
        cancel: &CancellationToken,
    ) -> Result<Vec<HistoryEntry>, BackendError>;

    /// Ask the backend to look a title up in its media sources.
    async fn search_media(
        &self,
        title: &str,
        kind: Option<MediaKind>,
        cancel: &CancellationToken,
    ) -> Result<Vec<MediaSearchResult>, BackendError>;
}

/// Client for the acquisition backend REST API.
pub struct BackendClient {
    client: Client,
    base_url: String,
    auth_scheme: AuthScheme,
    tokens: Arc<TokenManager>,
    throttler: RequestThrottler,
    retry_policy: RetryPolicy,
    dry_run: bool,
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(max).collect();
        out.push_str("...");
        out
    }
}

impl BackendClient {
    pub fn new(settings: &BackendSettings) -> Result<Self, BackendError> {
        let timeout = Duration::from_secs(settings.request_timeout_secs);
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::Network(e.to_string()))?;
        let tokens = Arc::new(TokenManager::new(
            settings.base_url.clone(),
            settings.username.clone(),
            settings.password.clone(),
            timeout,
        )?);

        Ok(Self {
            client,
            base_url: settings.base_url.clone(),
            auth_scheme: settings.auth_scheme,
            tokens,
            throttler: RequestThrottler::new(ThrottlerConfig {
                max_requests_per_second: settings.rate_limit_per_sec,
                enabled: settings.rate_limit_per_sec > 0,
            }),
            retry_policy: RetryPolicy::new(settings),
            dry_run: settings.dry_run,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Shared token manager, also used by the push listener and the refresher task.
    pub fn token_manager(&self) -> Arc<TokenManager> {
        self.tokens.clone()
    }

    pub fn auth_scheme(&self) -> AuthScheme {
        self.auth_scheme
    }

    /// Send an authorized request, refreshing the token once on a 401.
    ///
    /// Non-2xx answers become `BackendError::Status`.
    async fn execute<F>(&self, cancel: &CancellationToken, build: F) -> Result<Response, BackendError>
    where
        F: Fn(&Client) -> RequestBuilder + Send + Sync,
    {
        let mut reauthenticated = false;
        loop {
            self.throttler.acquire(cancel).await?;

            let token = tokio::select! {
                token = self.tokens.get_token() => token?,
                _ = cancel.cancelled() => return Err(BackendError::Cancelled),
            };
            let request = self.auth_scheme.apply(build(&self.client), &token);

            let response = tokio::select! {
                response = request.send() => response?,
                _ = cancel.cancelled() => return Err(BackendError::Cancelled),
            };

            let status = response.status();
            if status == StatusCode::UNAUTHORIZED && !reauthenticated {
                warn!("Backend rejected the access token, logging in again");
                self.tokens.invalidate(&token).await;
                reauthenticated = true;
                continue;
            }
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(BackendError::Status {
                    status: status.as_u16(),
                    body: truncate_chars(&body, MAX_ERROR_BODY_CHARS),
                });
            }
            return Ok(response);
        }
    }

    async fn read_json<T: DeserializeOwned>(
        response: Response,
        cancel: &CancellationToken,
    ) -> Result<T, BackendError> {
        let bytes = tokio::select! {
            bytes = response.bytes() => bytes?,
            _ = cancel.cancelled() => return Err(BackendError::Cancelled),
        };
        serde_json::from_slice(&bytes).map_err(|e| BackendError::Decode(e.to_string()))
    }

    async fn subscribe_once(
        &self,
        spec: &SubscribeSpec,
        cancel: &CancellationToken,
    ) -> Result<SubscribeOutcome, BackendError> {
        let url = format!("{}/api/v1/subscribe/", self.base_url);
        let response = self
            .execute(cancel, |client| client.post(&url).json(spec))
            .await?;
        let body: SubscribeResponseBody = Self::read_json(response, cancel).await?;

        if !body.success {
            return Err(BackendError::Rejected(
                body.message
                    .clone()
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| "subscription rejected without message".to_string()),
            ));
        }
        Ok(SubscribeOutcome::from_body(&body))
    }

    async fn history(
        &self,
        kind: &str,
        page: u32,
        count: u32,
        cancel: &CancellationToken,
    ) -> Result<Vec<HistoryEntry>, BackendError> {
        let url = format!("{}/api/v1/history/{}", self.base_url, kind);
        let response = self
            .execute(cancel, |client| {
                client
                    .get(&url)
                    .query(&[("page", page), ("count", count)])
            })
            .await?;
        let body: serde_json::Value = Self::read_json(response, cancel).await?;
        parse_history(body)
    }
}

/// History endpoints answer with a bare array; some deployments wrap it in
/// `{"data": [...]}` or `{"data": {"list": [...]}}`.
fn parse_history(body: serde_json::Value) -> Result<Vec<HistoryEntry>, BackendError> {
    let items = match body {
        serde_json::Value::Array(_) => body,
        serde_json::Value::Object(mut map) => match map.remove("data") {
            Some(serde_json::Value::Object(mut data)) => {
                data.remove("list").unwrap_or(serde_json::Value::Null)
            }
            Some(data) => data,
            None => serde_json::Value::Null,
        },
        _ => serde_json::Value::Null,
    };
    if items.is_null() {
        return Err(BackendError::Decode(
            "history response is not a list".to_string(),
        ));
    }
    serde_json::from_value(items).map_err(|e| BackendError::Decode(e.to_string()))
}

#[async_trait]
impl AcquisitionBackend for BackendClient {
    async fn authenticate(&self, cancel: &CancellationToken) -> Result<(), BackendError> {
        if self.dry_run {
            return Ok(());
        }
        tokio::select! {
            token = self.tokens.get_token() => token.map(|_| ()),
            _ = cancel.cancelled() => Err(BackendError::Cancelled),
        }
    }

    async fn subscribe(
        &self,
        spec: &SubscribeSpec,
        cancel: &CancellationToken,
    ) -> Result<SubscribeOutcome, BackendError> {
        if self.dry_run {
            info!(
                "[dry-run] Would subscribe {} (tmdb {}, season {:?})",
                spec.name, spec.tmdbid, spec.season
            );
            return Ok(SubscribeOutcome::dry_run());
        }

        let mut attempt = 0;
        loop {
            let delay = self.retry_policy.delay_before(attempt);
            if !delay.is_zero() {
                debug!(
                    "Waiting {}s before subscribe attempt {} for {}",
                    delay.as_secs(),
                    attempt + 1,
                    spec.name
                );
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => return Err(BackendError::Cancelled),
                }
            }

            match self.subscribe_once(spec, cancel).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) if self.retry_policy.should_retry(&e, attempt) => {
                    warn!(
                        "Subscribe attempt {}/{} for {} failed: {}",
                        attempt + 1,
                        self.retry_policy.max_attempts(),
                        spec.name,
                        e
                    );
                    attempt += 1;
                }
                Err(e) if e.is_retryable() => {
                    return Err(BackendError::MaxRetriesExceeded {
                        attempts: attempt + 1,
                        last_error: e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn download_history(
        &self,
        page: u32,
        count: u32,
        cancel: &CancellationToken,
    ) -> Result<Vec<HistoryEntry>, BackendError> {
        self.history("download", page, count, cancel).await
    }

    async fn transfer_history(
        &self,
        page: u32,
        count: u32,
        cancel: &CancellationToken,
    ) -> Result<Vec<HistoryEntry>, BackendError> {
        self.history("transfer", page, count, cancel).await
    }

    async fn search_media(
        &self,
        title: &str,
        kind: Option<MediaKind>,
        cancel: &CancellationToken,
    ) -> Result<Vec<MediaSearchResult>, BackendError> {
        let url = format!("{}/api/v1/media/search/", self.base_url);
        let query = MediaSearchQuery {
            title,
            media_type: kind.map(|k| k.backend_label()),
        };
        let response = self
            .execute(cancel, |client| client.post(&url).json(&query))
            .await?;
        let body: MediaSearchResponse = Self::read_json(response, cancel).await?;
        if !body.success {
            return Err(BackendError::Rejected(
                body.message.unwrap_or_else(|| "search failed".to_string()),
            ));
        }
        Ok(body.data)
    }
}
