//! Data models for the local ledger.
//!
//! Defines requests, subscription links, tracking records, audit events and the
//! closed status enumerations they carry.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Kind of media a request refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Movie,
    Tv,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Movie => "movie",
            MediaKind::Tv => "tv",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "movie" => Some(MediaKind::Movie),
            "tv" => Some(MediaKind::Tv),
            _ => None,
        }
    }

    /// Localized label the acquisition backend uses for this kind, both in
    /// subscribe bodies and in history entries.
    pub fn backend_label(&self) -> &'static str {
        match self {
            MediaKind::Movie => "电影",
            MediaKind::Tv => "电视剧",
        }
    }

    pub fn from_backend_label(label: &str) -> Option<Self> {
        match label {
            "电影" => Some(MediaKind::Movie),
            "电视剧" => Some(MediaKind::Tv),
            _ => None,
        }
    }
}

/// Sync status of a request, mirrored by its subscription link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Pending,
    Processing,
    Synced,
    Failed,
    Retrying,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Processing => "processing",
            SyncStatus::Synced => "synced",
            SyncStatus::Failed => "failed",
            SyncStatus::Retrying => "retrying",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(SyncStatus::Pending),
            "processing" => Some(SyncStatus::Processing),
            "synced" => Some(SyncStatus::Synced),
            "failed" => Some(SyncStatus::Failed),
            "retrying" => Some(SyncStatus::Retrying),
            _ => None,
        }
    }

    /// Requests in these states are picked up by the next sync pass.
    pub fn is_actionable(&self) -> bool {
        matches!(self, SyncStatus::Pending | SyncStatus::Retrying)
    }
}

/// Lifecycle status of a tracking record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingStatus {
    Pending,
    Subscribed,
    Downloading,
    Downloaded,
    Transferred, // terminal
    Failed,      // terminal
    ManualSearch,
}

impl TrackingStatus {
    /// Records the reconciler still watches.
    pub const ACTIVE: [TrackingStatus; 3] = [
        TrackingStatus::Subscribed,
        TrackingStatus::Downloading,
        TrackingStatus::Downloaded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TrackingStatus::Pending => "pending",
            TrackingStatus::Subscribed => "subscribed",
            TrackingStatus::Downloading => "downloading",
            TrackingStatus::Downloaded => "downloaded",
            TrackingStatus::Transferred => "transferred",
            TrackingStatus::Failed => "failed",
            TrackingStatus::ManualSearch => "manual_search",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TrackingStatus::Pending),
            "subscribed" => Some(TrackingStatus::Subscribed),
            "downloading" => Some(TrackingStatus::Downloading),
            "downloaded" => Some(TrackingStatus::Downloaded),
            "transferred" => Some(TrackingStatus::Transferred),
            "failed" => Some(TrackingStatus::Failed),
            "manual_search" => Some(TrackingStatus::ManualSearch),
            _ => None,
        }
    }

    /// Returns true if this is a terminal state (Transferred or Failed).
    pub fn is_terminal(&self) -> bool {
        matches!(self, TrackingStatus::Transferred | TrackingStatus::Failed)
    }
}

/// Kind of an audit event in the download event log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Subscribed,
    DownloadStarted,
    DownloadComplete,
    TransferComplete,
    Failed,
    ManualSearch,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Subscribed => "subscribed",
            EventKind::DownloadStarted => "download_started",
            EventKind::DownloadComplete => "download_complete",
            EventKind::TransferComplete => "transfer_complete",
            EventKind::Failed => "failed",
            EventKind::ManualSearch => "manual_search",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "subscribed" => Some(EventKind::Subscribed),
            "download_started" => Some(EventKind::DownloadStarted),
            "download_complete" => Some(EventKind::DownloadComplete),
            "transfer_complete" => Some(EventKind::TransferComplete),
            "failed" => Some(EventKind::Failed),
            "manual_search" => Some(EventKind::ManualSearch),
            _ => None,
        }
    }
}

/// One upstream media request.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// Row id, 0 until persisted
    pub id: i64,
    /// Identifier assigned by the request source (immutable)
    pub source_request_id: String,
    pub media_kind: MediaKind,
    /// External catalog (TMDB) id
    pub tmdb_id: i64,
    pub title: String,
    pub poster_path: Option<String>,
    /// Requested seasons, ascending, empty for movies. May include specials (0).
    pub seasons: Vec<i32>,
    /// Explicit episode lists per season (tv only)
    pub episodes: BTreeMap<i32, Vec<i32>>,
    pub status: SyncStatus,
    pub requested_at: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Request {
    pub fn new(
        source_request_id: impl Into<String>,
        media_kind: MediaKind,
        tmdb_id: i64,
        title: impl Into<String>,
    ) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            id: 0,
            source_request_id: source_request_id.into(),
            media_kind,
            tmdb_id,
            title: title.into(),
            poster_path: None,
            seasons: Vec::new(),
            episodes: BTreeMap::new(),
            status: SyncStatus::Pending,
            requested_at: now,
            created_at: now,
            updated_at: now,
        }
    }

    /// Sets the requested seasons, sorted and deduplicated. Specials (season 0)
    /// are kept so a specials-only request stays distinguishable from one that
    /// names no seasons; they are never subscribed.
    pub fn with_seasons(mut self, seasons: impl IntoIterator<Item = i32>) -> Self {
        let mut seasons: Vec<i32> = seasons.into_iter().filter(|s| *s >= 0).collect();
        seasons.sort_unstable();
        seasons.dedup();
        self.seasons = seasons;
        self
    }

    pub fn with_episodes(mut self, season: i32, episodes: Vec<i32>) -> Self {
        if season > 0 && !episodes.is_empty() {
            self.episodes.insert(season, episodes);
        }
        self
    }

    pub fn with_poster(mut self, poster_path: Option<String>) -> Self {
        self.poster_path = poster_path.filter(|p| !p.is_empty());
        self
    }

    pub fn with_requested_at(mut self, requested_at: i64) -> Self {
        self.requested_at = requested_at;
        self
    }
}

/// Correlation between a request and the backend subscription created for it.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionLink {
    pub id: i64,
    pub source_request_id: String,
    /// Empty when the backend returned no id (e.g. "already exists")
    pub backend_subscription_id: String,
    pub state: SyncStatus,
    pub last_error: Option<String>,
    pub retry_count: i32,
    pub created_at: i64,
    pub updated_at: i64,
}

impl SubscriptionLink {
    pub fn synced(source_request_id: impl Into<String>, backend_subscription_id: String) -> Self {
        Self::with_state(source_request_id, backend_subscription_id, SyncStatus::Synced, None)
    }

    pub fn failed(source_request_id: impl Into<String>, error: String) -> Self {
        Self::with_state(source_request_id, String::new(), SyncStatus::Failed, Some(error))
    }

    fn with_state(
        source_request_id: impl Into<String>,
        backend_subscription_id: String,
        state: SyncStatus,
        last_error: Option<String>,
    ) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            id: 0,
            source_request_id: source_request_id.into(),
            backend_subscription_id,
            state,
            last_error,
            retry_count: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Lifecycle ledger entry for one request.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackingRecord {
    pub id: i64,
    pub source_request_id: String,
    pub tmdb_id: i64,
    pub title: String,
    pub media_kind: MediaKind,
    pub status: TrackingStatus,
    pub subscribe_time: Option<i64>,
    pub download_start_time: Option<i64>,
    pub download_finish_time: Option<i64>,
    pub transfer_time: Option<i64>,
    pub retry_count: i32,
    pub last_retry_time: Option<i64>,
    pub error_message: Option<String>,
    pub poster_path: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl TrackingRecord {
    /// Record for a freshly created subscription. When the backend reported the
    /// media as already present, the record starts out transferred.
    pub fn for_subscription(request: &Request, already_exists: bool, now: i64) -> Self {
        let (status, transfer_time) = if already_exists {
            (TrackingStatus::Transferred, Some(now))
        } else {
            (TrackingStatus::Subscribed, None)
        };
        Self {
            id: 0,
            source_request_id: request.source_request_id.clone(),
            tmdb_id: request.tmdb_id,
            title: request.title.clone(),
            media_kind: request.media_kind,
            status,
            subscribe_time: Some(now),
            download_start_time: None,
            download_finish_time: None,
            transfer_time,
            retry_count: 0,
            last_retry_time: None,
            error_message: None,
            poster_path: request.poster_path.clone(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Append-only audit entry.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadEvent {
    pub id: i64,
    pub source_request_id: String,
    pub kind: EventKind,
    /// Serialized JSON payload
    pub data: String,
    pub created_at: i64,
}

impl DownloadEvent {
    pub fn new(source_request_id: impl Into<String>, kind: EventKind) -> Self {
        Self {
            id: 0,
            source_request_id: source_request_id.into(),
            kind,
            data: "{}".to_string(),
            created_at: chrono::Utc::now().timestamp(),
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data.to_string();
        self
    }
}

/// Request counts by sync status. `pending` includes retrying requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LedgerStats {
    pub total: usize,
    pub pending: usize,
    pub synced: usize,
    pub failed: usize,
}

/// Tracking record counts by lifecycle status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TrackingStats {
    pub subscribed: usize,
    pub downloading: usize,
    pub downloaded: usize,
    pub transferred: usize,
    pub failed: usize,
}

/// Daily summary snapshot, one row per date.
#[derive(Debug, Clone, PartialEq)]
pub struct DailyReport {
    pub id: i64,
    /// `YYYY-MM-DD`
    pub report_date: String,
    pub total_subscribed: usize,
    pub total_downloaded: usize,
    pub total_transferred: usize,
    pub total_failed: usize,
    pub content: String,
    pub created_at: i64,
}
