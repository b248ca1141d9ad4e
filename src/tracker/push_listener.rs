//! Server-sent event listener for backend system messages.
//!
//! The backend pushes a message whenever a subscription finds a resource, a
//! download starts or finishes, or a transfer lands in the library. Messages are
//! only turned into notifications; ledger state is owned by the polling
//! reconciler.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use futures::TryStreamExt;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tokio::io::AsyncBufReadExt;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::{AuthScheme, BackendClient, TokenManager};
use crate::notifications::{Notification, NotificationDispatcher};

const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Status words the backend appends to a media title in its message titles.
const TITLE_SUFFIXES: [&str; 5] = ["已添加订阅", "已完成订阅", "开始下载", "下载完成", "入库完成"];

// ============================================================================
// Wire format
// ============================================================================

/// One system message, as carried in the `message` field of an event.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct PushMessage {
    pub mtype: Option<String>,
    pub ctype: Option<String>,
    pub title: Option<String>,
    pub text: Option<String>,
    pub image: Option<String>,
    pub username: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct PushEnvelope {
    message: Option<PushMessage>,
}

/// Incremental `text/event-stream` parser.
///
/// Only `data:` fields are used; every other field is ignored. A blank line
/// ends the current event.
#[derive(Debug, Default)]
pub struct SseParser {
    data: Vec<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one line without its terminator. Returns the event payload when the
    /// line completes an event.
    pub fn push_line(&mut self, line: &str) -> Option<String> {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.is_empty() {
            if self.data.is_empty() {
                return None;
            }
            let payload = self.data.join("\n");
            self.data.clear();
            return Some(payload);
        }
        if line.starts_with(':') {
            return None;
        }
        if let Some(value) = line.strip_prefix("data:") {
            self.data
                .push(value.strip_prefix(' ').unwrap_or(value).to_string());
        }
        None
    }
}

/// Decode an event payload. Payloads without a `message` are keep-alives.
pub fn parse_push_payload(payload: &str) -> Result<Option<PushMessage>> {
    let envelope: PushEnvelope =
        serde_json::from_str(payload).context("Malformed push payload")?;
    Ok(envelope.message)
}

/// Strip the parenthesized year and any trailing status word from a message
/// title, e.g. `"Dune (2021) 开始下载"` becomes `"Dune"`.
pub fn extract_media_title(title: &str) -> String {
    let mut name = title;
    if let Some(idx) = name.find('(') {
        if idx > 0 {
            name = name[..idx].trim();
        }
    }
    for suffix in TITLE_SUFFIXES {
        if let Some(stripped) = name.strip_suffix(suffix) {
            name = stripped;
        }
    }
    name.trim().to_string()
}

/// Map a pushed message to the notification it should produce, if any.
pub fn notification_for(message: &PushMessage) -> Option<Notification> {
    let ctype = message.ctype.as_deref()?;
    let raw_title = message.title.as_deref().unwrap_or_default();
    let title = extract_media_title(raw_title);

    let mut notification = match ctype {
        "subscribeComplete" => Notification::resource_found(&title),
        "downloadStart" => Notification::download_started(&title),
        "downloadComplete" => Notification::download_complete(&title),
        "transferComplete" => Notification::transfer_complete(&title),
        _ => return None,
    };
    if let Some(text) = message.text.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
        notification = notification.with_line(text);
    }
    if let Some(image) = message.image.as_deref().filter(|i| !i.is_empty()) {
        notification.poster_url = Some(image.to_string());
    }
    Some(notification)
}

// ============================================================================
// Listener
// ============================================================================

pub struct PushListener {
    client: Client,
    url: String,
    auth_scheme: AuthScheme,
    tokens: Arc<TokenManager>,
    notifier: NotificationDispatcher,
    reconnect_delay: Duration,
}

impl PushListener {
    pub fn new(
        backend: &BackendClient,
        notifier: NotificationDispatcher,
        reconnect_delay_secs: u64,
    ) -> Result<Self> {
        // No overall timeout: the stream stays open indefinitely
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .context("Failed to build push client")?;
        Ok(Self {
            client,
            url: format!("{}/api/v1/system/message", backend.base_url()),
            auth_scheme: backend.auth_scheme(),
            tokens: backend.token_manager(),
            notifier,
            reconnect_delay: Duration::from_secs(reconnect_delay_secs),
        })
    }

    /// Listen until shutdown, reconnecting after every disconnect.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            "Push listener starting (reconnect_delay={}s)",
            self.reconnect_delay.as_secs()
        );

        loop {
            tokio::select! {
                result = self.listen_once() => {
                    match result {
                        Ok(()) => info!(
                            "Push stream ended, reconnecting in {}s",
                            self.reconnect_delay.as_secs()
                        ),
                        Err(e) => warn!(
                            "Push stream error: {:#}, reconnecting in {}s",
                            e, self.reconnect_delay.as_secs()
                        ),
                    }
                }
                _ = shutdown.cancelled() => {
                    info!("Push listener shutting down");
                    break;
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.reconnect_delay) => {}
                _ = shutdown.cancelled() => {
                    info!("Push listener shutting down during reconnect wait");
                    break;
                }
            }
        }

        info!("Push listener stopped");
    }

    async fn listen_once(&self) -> Result<()> {
        let token = self.tokens.get_token().await?;
        let request = self
            .client
            .get(&self.url)
            .header("Accept", "text/event-stream")
            .header("Cache-Control", "no-cache");
        let response = self
            .auth_scheme
            .apply(request, &token)
            .send()
            .await
            .context("Failed to connect to push stream")?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            self.tokens.invalidate(&token).await;
            bail!("Push stream rejected the token");
        }
        if !status.is_success() {
            bail!("Push stream returned HTTP {}", status.as_u16());
        }
        info!("Connected to push stream");

        let stream = response.bytes_stream().map_err(std::io::Error::other);
        let mut lines = StreamReader::new(stream).lines();
        let mut parser = SseParser::new();
        while let Some(line) = lines.next_line().await? {
            if let Some(payload) = parser.push_line(&line) {
                self.handle_payload(&payload);
            }
        }
        Ok(())
    }

    fn handle_payload(&self, payload: &str) {
        let message = match parse_push_payload(payload) {
            Ok(Some(message)) => message,
            Ok(None) => return,
            Err(e) => {
                warn!("{:#}", e);
                return;
            }
        };
        debug!(
            "Push message: ctype={:?} title={:?}",
            message.ctype, message.title
        );
        if let Some(notification) = notification_for(&message) {
            info!("Push: {}", notification.summary());
            self.notifier.notify(notification);
        }
    }
}
