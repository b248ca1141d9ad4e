//! Wire types for the acquisition backend API.

use serde::{Deserialize, Serialize};

use crate::ledger::MediaKind;

/// Message fragments the backend uses to say the media is already subscribed or
/// already in the library. Matched as plain substrings.
pub const ALREADY_EXISTS_KEYWORDS: &[&str] = &[
    "已完成订阅",
    "已存在",
    "已在媒体库",
    "already exists",
    "already in library",
];

/// Subscription id reported by the synthetic dry-run response.
pub const DRY_RUN_SUBSCRIPTION_ID: &str = "99999";

pub fn is_already_exists(message: &str) -> bool {
    let lowered = message.to_lowercase();
    ALREADY_EXISTS_KEYWORDS
        .iter()
        .any(|keyword| lowered.contains(keyword))
}

/// Body of a subscribe call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubscribeSpec {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<String>,
    /// Localized media-kind label
    #[serde(rename = "type")]
    pub media_type: String,
    pub tmdbid: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub season: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub episodes: Option<Vec<i32>>,
}

impl SubscribeSpec {
    pub fn movie(name: impl Into<String>, tmdb_id: i64) -> Self {
        Self {
            name: name.into(),
            year: None,
            media_type: MediaKind::Movie.backend_label().to_string(),
            tmdbid: tmdb_id,
            season: None,
            episodes: None,
        }
    }

    pub fn tv_season(name: impl Into<String>, tmdb_id: i64, season: i32) -> Self {
        Self {
            name: name.into(),
            year: None,
            media_type: MediaKind::Tv.backend_label().to_string(),
            tmdbid: tmdb_id,
            season: Some(season),
            episodes: None,
        }
    }

    pub fn with_episodes(mut self, episodes: Vec<i32>) -> Self {
        self.episodes = Some(episodes);
        self
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub(crate) struct SubscribeData {
    pub id: Option<i64>,
    pub subscribe_id: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub(crate) struct SubscribeResponseBody {
    pub success: bool,
    pub message: Option<String>,
    pub data: Option<SubscribeData>,
}

impl SubscribeResponseBody {
    /// `data.id` when positive, otherwise `data.subscribe_id`, otherwise none.
    pub fn subscription_id(&self) -> Option<String> {
        let data = self.data.as_ref()?;
        if let Some(id) = data.id.filter(|id| *id > 0) {
            return Some(id.to_string());
        }
        match data.subscribe_id.as_ref()? {
            serde_json::Value::Number(n) => Some(n.to_string()),
            serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
            _ => None,
        }
    }
}

/// Result of a successful subscribe call.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscribeOutcome {
    pub subscription_id: Option<String>,
    pub already_exists: bool,
    pub message: String,
}

impl SubscribeOutcome {
    pub(crate) fn from_body(body: &SubscribeResponseBody) -> Self {
        let message = body.message.clone().unwrap_or_default();
        Self {
            subscription_id: body.subscription_id(),
            already_exists: !message.is_empty() && is_already_exists(&message),
            message,
        }
    }

    pub fn dry_run() -> Self {
        Self {
            subscription_id: Some(DRY_RUN_SUBSCRIPTION_ID.to_string()),
            already_exists: false,
            message: "dry-run mode".to_string(),
        }
    }
}

/// Credential exchange response.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct TokenResponse {
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    #[allow(dead_code)]
    pub token_type: String,
}

/// One entry of the download or transfer history.
///
/// Numeric fields such as `year` arrive as numbers or strings depending on the
/// backend version, so they are kept as raw JSON values.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct HistoryEntry {
    pub id: Option<i64>,
    pub title: Option<String>,
    /// Localized media-kind label
    #[serde(rename = "type")]
    pub media_type: Option<String>,
    pub year: Option<serde_json::Value>,
    pub tmdbid: Option<i64>,
    pub season: Option<serde_json::Value>,
    pub episode: Option<serde_json::Value>,
    /// Free-form; download history sends a string, transfer history a string or boolean
    pub status: Option<serde_json::Value>,
    pub date: Option<String>,
    pub download_hash: Option<String>,
    pub torrent: Option<String>,
    pub path: Option<String>,
    pub dest: Option<String>,
    pub mode: Option<String>,
}

impl HistoryEntry {
    /// Catalog id plus media kind is the only correlation the history exposes.
    pub fn matches(&self, tmdb_id: i64, kind: MediaKind) -> bool {
        self.tmdbid == Some(tmdb_id) && self.media_type.as_deref() == Some(kind.backend_label())
    }

    /// True when the backend explicitly flags the entry as failed.
    pub fn is_failure(&self) -> bool {
        match &self.status {
            Some(serde_json::Value::Bool(ok)) => !ok,
            Some(serde_json::Value::String(s)) => {
                matches!(s.to_lowercase().as_str(), "failed" | "fail" | "error")
            }
            _ => false,
        }
    }

    pub fn display_title(&self) -> String {
        self.title.clone().unwrap_or_else(|| {
            self.tmdbid
                .map(|id| format!("TMDB-{}", id))
                .unwrap_or_default()
        })
    }
}

/// Body of a media search call.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct MediaSearchQuery<'a> {
    pub title: &'a str,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub media_type: Option<&'a str>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub(crate) struct MediaSearchResponse {
    pub success: bool,
    pub message: Option<String>,
    pub data: Vec<MediaSearchResult>,
}

/// A media item matched by the backend's search endpoint.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct MediaSearchResult {
    pub title: Option<String>,
    pub original_title: Option<String>,
    pub year: Option<serde_json::Value>,
    #[serde(rename = "type")]
    pub media_type: Option<String>,
    pub tmdbid: Option<i64>,
    pub poster_path: Option<String>,
}
