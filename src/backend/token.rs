//! Bearer credential cache for the acquisition backend.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use super::models::TokenResponse;
use super::BackendError;

/// Caches a single access token and exchanges username/password for a new one
/// when asked.
///
/// Readers take the read lock only; refreshes are serialized by a separate mutex
/// so two callers that both find the cache empty trigger a single login.
pub struct TokenManager {
    client: Client,
    base_url: String,
    username: String,
    password: String,
    cache: RwLock<Option<Arc<str>>>,
    refresh_lock: Mutex<()>,
}

impl TokenManager {
    pub fn new(
        base_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, BackendError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::Network(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            username: username.into(),
            password: password.into(),
            cache: RwLock::new(None),
            refresh_lock: Mutex::new(()),
        })
    }

    /// Returns the cached token, logging in first if there is none.
    pub async fn get_token(&self) -> Result<Arc<str>, BackendError> {
        if let Some(token) = self.cache.read().await.clone() {
            return Ok(token);
        }

        let _guard = self.refresh_lock.lock().await;
        // Another caller may have finished a login while we waited
        if let Some(token) = self.cache.read().await.clone() {
            return Ok(token);
        }
        self.login_and_store().await
    }

    /// Always performs a new credential exchange and replaces the cache.
    pub async fn refresh_token(&self) -> Result<Arc<str>, BackendError> {
        let _guard = self.refresh_lock.lock().await;
        self.login_and_store().await
    }

    /// Drops the cached token if it is still `stale`, so the next caller logs in.
    /// A token that was already replaced by a concurrent refresh is kept.
    pub async fn invalidate(&self, stale: &str) {
        let mut cache = self.cache.write().await;
        if cache.as_deref() == Some(stale) {
            debug!("Invalidating rejected backend token");
            *cache = None;
        }
    }

    /// True once a token has been obtained.
    pub async fn has_token(&self) -> bool {
        self.cache.read().await.is_some()
    }

    async fn login_and_store(&self) -> Result<Arc<str>, BackendError> {
        let token: Arc<str> = self.login().await?.into();
        *self.cache.write().await = Some(token.clone());
        info!("Obtained backend access token");
        Ok(token)
    }

    async fn login(&self) -> Result<String, BackendError> {
        let url = format!("{}/api/v1/login/access-token", self.base_url);
        let response = self
            .client
            .post(&url)
            .form(&[
                ("grant_type", "password"),
                ("username", self.username.as_str()),
                ("password", self.password.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Auth(format!(
                "login failed with HTTP {}: {}",
                status.as_u16(),
                body
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))?;
        if token.access_token.is_empty() {
            return Err(BackendError::Auth("empty access token".to_string()));
        }
        Ok(token.access_token)
    }
}
