//! Builders for settings, upstream requests and notification capture.

use super::constants::*;
use async_trait::async_trait;
use request_syncer::backend::AuthScheme;
use request_syncer::config::BackendSettings;
use request_syncer::notifications::{Notification, NotificationDispatcher, Notifier};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Backend settings pointing at the mock, with throttling off and a small
/// retry budget so retry tests finish in a few seconds.
pub fn backend_settings(base_url: &str, max_retries: u32) -> BackendSettings {
    BackendSettings {
        base_url: base_url.to_string(),
        username: BACKEND_USER.to_string(),
        password: BACKEND_PASS.to_string(),
        auth_scheme: AuthScheme::Bearer,
        rate_limit_per_sec: 0,
        max_retries,
        dry_run: false,
        token_refresh_hours: 24,
        request_timeout_secs: 5,
    }
}

pub fn approved_movie(id: i64, tmdb_id: i64) -> Value {
    json!({
        "id": id,
        "status": 2,
        "createdAt": "2024-03-01T10:00:00.000Z",
        "media": {"tmdbId": tmdb_id, "mediaType": "movie"},
        "seasons": []
    })
}

pub fn approved_show(id: i64, tmdb_id: i64, seasons: &[i32]) -> Value {
    let seasons: Vec<Value> = seasons
        .iter()
        .map(|s| json!({"seasonNumber": s, "episodes": []}))
        .collect();
    json!({
        "id": id,
        "status": 2,
        "createdAt": "2024-03-01T10:00:00.000Z",
        "media": {"tmdbId": tmdb_id, "mediaType": "tv"},
        "seasons": seasons
    })
}

pub fn pending_request(id: i64, tmdb_id: i64) -> Value {
    let mut request = approved_movie(id, tmdb_id);
    request["status"] = json!(1);
    request
}

pub fn history_entry(tmdb_id: i64, label: &str, title: &str) -> Value {
    json!({
        "id": tmdb_id,
        "title": title,
        "type": label,
        "year": "2021",
        "tmdbid": tmdb_id,
        "status": true,
        "date": "2024-03-01 10:00:00"
    })
}

struct ChannelNotifier {
    tx: mpsc::UnboundedSender<Notification>,
}

#[async_trait]
impl Notifier for ChannelNotifier {
    fn name(&self) -> &'static str {
        "channel"
    }

    async fn deliver(&self, notification: &Notification) -> anyhow::Result<()> {
        self.tx.send(notification.clone())?;
        Ok(())
    }
}

/// Dispatcher whose deliveries land in the returned receiver.
pub fn capturing_dispatcher() -> (NotificationDispatcher, mpsc::UnboundedReceiver<Notification>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let dispatcher = NotificationDispatcher::new(vec![Arc::new(ChannelNotifier { tx })]);
    (dispatcher, rx)
}
