//! Notification delivery.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::{debug, info, warn};

use super::models::Notification;

/// A delivery channel.
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &'static str;

    async fn deliver(&self, notification: &Notification) -> Result<()>;
}

/// Writes notifications to the log.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn deliver(&self, notification: &Notification) -> Result<()> {
        info!("[notify] {}", notification.summary());
        Ok(())
    }
}

/// Sends notifications through the Telegram bot API to a fixed set of chats.
pub struct TelegramNotifier {
    client: Client,
    api_url: String,
    bot_token: String,
    chat_ids: Vec<String>,
}

impl TelegramNotifier {
    pub fn new(api_url: String, bot_token: String, chat_ids: Vec<String>) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(15)).build()?;
        Ok(Self {
            client,
            api_url,
            bot_token,
            chat_ids,
        })
    }

    async fn send_to(&self, chat_id: &str, notification: &Notification) -> Result<()> {
        let text = notification.render_html();
        let (method, body) = match &notification.poster_url {
            Some(photo) => (
                "sendPhoto",
                json!({
                    "chat_id": chat_id,
                    "photo": photo,
                    "caption": text,
                    "parse_mode": "HTML",
                }),
            ),
            None => (
                "sendMessage",
                json!({
                    "chat_id": chat_id,
                    "text": text,
                    "parse_mode": "HTML",
                    "disable_web_page_preview": true,
                }),
            ),
        };

        let url = format!("{}/bot{}/{}", self.api_url, self.bot_token, method);
        let response = self.client.post(&url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let description = response.text().await.unwrap_or_default();
            return Err(anyhow!("{} returned HTTP {}: {}", method, status, description));
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    fn name(&self) -> &'static str {
        "telegram"
    }

    async fn deliver(&self, notification: &Notification) -> Result<()> {
        let mut failures = Vec::new();
        for chat_id in &self.chat_ids {
            match self.send_to(chat_id, notification).await {
                Ok(()) => debug!("Telegram message sent to chat {}", chat_id),
                // The request URL carries the token, keep it out of the log
                Err(e) => failures.push(format!(
                    "chat {}: {}",
                    chat_id,
                    e.to_string().replace(&self.bot_token, "***")
                )),
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(anyhow!("failed to send to some chats: {}", failures.join("; ")))
        }
    }
}

/// Fans notifications out to every configured channel without blocking the caller.
///
/// Delivery is best effort: each channel runs on its own task and failures are
/// logged, never retried.
#[derive(Clone, Default)]
pub struct NotificationDispatcher {
    notifiers: Vec<Arc<dyn Notifier>>,
}

impl NotificationDispatcher {
    pub fn new(notifiers: Vec<Arc<dyn Notifier>>) -> Self {
        Self { notifiers }
    }

    /// Dispatcher that drops everything.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn channel_names(&self) -> Vec<&'static str> {
        self.notifiers.iter().map(|n| n.name()).collect()
    }

    pub fn notify(&self, notification: Notification) {
        if self.notifiers.is_empty() {
            return;
        }
        let notification = Arc::new(notification);
        for notifier in &self.notifiers {
            let notifier = notifier.clone();
            let notification = notification.clone();
            tokio::spawn(async move {
                if let Err(e) = notifier.deliver(&notification).await {
                    warn!(
                        "Failed to deliver {} notification via {}: {}",
                        notification.kind.as_str(),
                        notifier.name(),
                        e
                    );
                }
            });
        }
    }
}
