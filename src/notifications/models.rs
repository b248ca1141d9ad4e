//! Notification data models

use serde::{Deserialize, Serialize};

use crate::ledger::MediaKind;

/// Base URL for poster images, a poster path is appended as-is.
pub const POSTER_BASE_URL: &str = "https://image.tmdb.org/t/p/w500";

pub fn poster_url(poster_path: &str) -> String {
    format!("{}{}", POSTER_BASE_URL, poster_path)
}

/// Notification type enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Subscribed,
    AlreadyExists,
    /// The backend found a release for a subscription
    ResourceFound,
    DownloadStarted,
    DownloadComplete,
    TransferComplete,
    Failed,
    Retrying,
    DailyReport,
    SystemError,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Subscribed => "subscribed",
            NotificationKind::AlreadyExists => "already_exists",
            NotificationKind::ResourceFound => "resource_found",
            NotificationKind::DownloadStarted => "download_started",
            NotificationKind::DownloadComplete => "download_complete",
            NotificationKind::TransferComplete => "transfer_complete",
            NotificationKind::Failed => "failed",
            NotificationKind::Retrying => "retrying",
            NotificationKind::DailyReport => "daily_report",
            NotificationKind::SystemError => "system_error",
        }
    }

    fn heading(&self) -> &'static str {
        match self {
            NotificationKind::Subscribed => "✅ <b>已自动订阅</b>",
            NotificationKind::AlreadyExists => "ℹ️ <b>媒体已在库中</b>",
            NotificationKind::ResourceFound => "🎯 <b>已找到资源</b>",
            NotificationKind::DownloadStarted => "⬇️ <b>开始下载</b>",
            NotificationKind::DownloadComplete => "✅ <b>下载完成</b>",
            NotificationKind::TransferComplete => "📦 <b>入库成功</b>",
            NotificationKind::Failed => "❌ <b>订阅失败</b>",
            NotificationKind::Retrying => "🔄 <b>智能重试</b>",
            NotificationKind::DailyReport => "📊 <b>每日订阅报告</b>",
            NotificationKind::SystemError => "⚠️ <b>系统错误</b>",
        }
    }
}

/// An outbound notification
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub kind: NotificationKind,
    /// Media title, empty for reports and system errors
    pub title: String,
    /// Pre-formatted detail lines (plain text)
    pub lines: Vec<String>,
    pub poster_url: Option<String>,
    pub created_at: i64,
}

fn kind_label(kind: MediaKind) -> &'static str {
    match kind {
        MediaKind::Movie => "🎬 电影",
        MediaKind::Tv => "📺 剧集",
    }
}

/// Minimal escaping for Telegram's HTML parse mode.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

impl Notification {
    pub fn new(kind: NotificationKind, title: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
            lines: Vec::new(),
            poster_url: None,
            created_at: chrono::Utc::now().timestamp(),
        }
    }

    pub fn with_line(mut self, line: impl Into<String>) -> Self {
        self.lines.push(line.into());
        self
    }

    pub fn with_poster(mut self, poster_path: Option<&str>) -> Self {
        self.poster_url = poster_path.filter(|p| !p.is_empty()).map(poster_url);
        self
    }

    pub fn subscribed(
        title: &str,
        kind: MediaKind,
        tmdb_id: i64,
        poster_path: Option<&str>,
    ) -> Self {
        Self::new(NotificationKind::Subscribed, title)
            .with_line(format!("🏷️ 类型: {}", kind_label(kind)))
            .with_line(format!("🆔 TMDB ID: {}", tmdb_id))
            .with_poster(poster_path)
    }

    pub fn already_exists(
        title: &str,
        kind: MediaKind,
        tmdb_id: i64,
        poster_path: Option<&str>,
    ) -> Self {
        Self::new(NotificationKind::AlreadyExists, title)
            .with_line(format!("🏷️ 类型: {}", kind_label(kind)))
            .with_line(format!("🆔 TMDB ID: {}", tmdb_id))
            .with_line("💡 该影片已存在于媒体库，无需重复下载")
            .with_poster(poster_path)
    }

    pub fn resource_found(title: &str) -> Self {
        Self::new(NotificationKind::ResourceFound, title)
    }

    pub fn download_started(title: &str) -> Self {
        Self::new(NotificationKind::DownloadStarted, title)
    }

    pub fn download_complete(title: &str) -> Self {
        Self::new(NotificationKind::DownloadComplete, title)
    }

    pub fn transfer_complete(title: &str) -> Self {
        Self::new(NotificationKind::TransferComplete, title)
    }

    pub fn failed(title: &str, reason: &str) -> Self {
        Self::new(NotificationKind::Failed, title).with_line(format!("💬 原因: {}", reason))
    }

    pub fn retrying(title: &str, attempt: i32, max_attempts: i32) -> Self {
        Self::new(NotificationKind::Retrying, title)
            .with_line(format!("🔢 尝试: {}/{}", attempt, max_attempts))
    }

    pub fn daily_report(content: &str) -> Self {
        Self::new(NotificationKind::DailyReport, "").with_line(content)
    }

    pub fn system_error(message: &str) -> Self {
        Self::new(NotificationKind::SystemError, "").with_line(format!("💬 {}", message))
    }

    /// Message text for HTML-capable channels. Dynamic parts are escaped.
    pub fn render_html(&self) -> String {
        let mut out = String::from(self.kind.heading());
        out.push_str("\n\n");
        if !self.title.is_empty() {
            out.push_str(&format!("📺 {}\n", escape_html(&self.title)));
        }
        for line in &self.lines {
            out.push_str(&escape_html(line));
            out.push('\n');
        }
        if self.kind != NotificationKind::DailyReport {
            if let Some(at) = chrono::DateTime::from_timestamp(self.created_at, 0) {
                let local = at.with_timezone(&chrono::Local);
                out.push_str(&format!("⏰ {}", local.format("%Y-%m-%d %H:%M:%S")));
            }
        }
        out.trim_end().to_string()
    }

    /// Single-line form for log output.
    pub fn summary(&self) -> String {
        let mut parts = vec![self.kind.as_str().to_string()];
        if !self.title.is_empty() {
            parts.push(self.title.clone());
        }
        parts.extend(self.lines.iter().map(|l| l.replace('\n', " | ")));
        parts.join(" | ")
    }
}
