mod file_config;

pub use file_config::{
    BackendConfig, FileConfig, NotifyConfig, ReportConfig, RetryConfig, SourceConfig,
    SyncConfig, TrackerConfig,
};

use crate::backend::AuthScheme;
use anyhow::{anyhow, bail, Result};
use chrono::NaiveTime;
use std::path::PathBuf;
use tracing::info;

pub const DEFAULT_DB_PATH: &str = "./data/syncer.db";
pub const DEFAULT_TELEGRAM_API_URL: &str = "https://api.telegram.org";
pub const DEFAULT_TMDB_BASE_URL: &str = "https://api.themoviedb.org";

/// CLI arguments and environment credentials that take part in config resolution.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_path: Option<PathBuf>,
    /// Forces dry-run regardless of the file setting
    pub dry_run: bool,
    pub source_url: Option<String>,
    pub source_api_key: Option<String>,
    pub backend_url: Option<String>,
    pub backend_username: Option<String>,
    pub backend_password: Option<String>,
    pub telegram_bot_token: Option<String>,
    pub tmdb_api_key: Option<String>,
}

/// How TV requests are turned into subscribe calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TvMode {
    /// One call per season
    #[default]
    Season,
    /// One call per season with an explicit episode list
    Episode,
}

impl TvMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TvMode::Season => "season",
            TvMode::Episode => "episode",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "season" => Some(TvMode::Season),
            "episode" => Some(TvMode::Episode),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_path: PathBuf,
    pub source: SourceSettings,
    pub backend: BackendSettings,
    pub sync: SyncSettings,
    pub tracker: TrackerSettings,
    pub notify: NotifySettings,
    pub report: ReportSettings,
    pub retry: RetrySettings,
}

#[derive(Debug, Clone)]
pub struct SourceSettings {
    pub base_url: String,
    pub api_key: String,
    pub page_size: u32,
    pub request_timeout_secs: u64,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: String::new(),
            page_size: 50,
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BackendSettings {
    pub base_url: String,
    pub username: String,
    pub password: String,
    pub auth_scheme: AuthScheme,
    /// 0 disables throttling
    pub rate_limit_per_sec: u32,
    pub max_retries: u32,
    pub dry_run: bool,
    pub token_refresh_hours: u64,
    pub request_timeout_secs: u64,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            username: String::new(),
            password: String::new(),
            auth_scheme: AuthScheme::Bearer,
            rate_limit_per_sec: 3,
            max_retries: 3,
            dry_run: false,
            token_refresh_hours: 24,
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub interval_secs: u64,
    pub tv_mode: TvMode,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            tv_mode: TvMode::Season,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrackerSettings {
    pub enabled: bool,
    pub interval_secs: u64,
    /// Entries fetched from each history endpoint per poll
    pub history_page_size: u32,
    pub push_enabled: bool,
    pub push_reconnect_secs: u64,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 300,
            history_page_size: 50,
            push_enabled: true,
            push_reconnect_secs: 30,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NotifySettings {
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_ids: Vec<String>,
    pub telegram_api_url: String,
    pub tmdb_api_key: Option<String>,
    pub tmdb_base_url: String,
}

impl NotifySettings {
    pub fn telegram_enabled(&self) -> bool {
        self.telegram_bot_token.is_some() && !self.telegram_chat_ids.is_empty()
    }
}

impl Default for NotifySettings {
    fn default() -> Self {
        Self {
            telegram_bot_token: None,
            telegram_chat_ids: Vec::new(),
            telegram_api_url: DEFAULT_TELEGRAM_API_URL.to_string(),
            tmdb_api_key: None,
            tmdb_base_url: DEFAULT_TMDB_BASE_URL.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReportSettings {
    pub enabled: bool,
    pub time: NaiveTime,
}

impl Default for ReportSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            time: NaiveTime::from_hms_opt(9, 0, 0).unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetrySettings {
    pub enabled: bool,
    /// Sweeps per request before it is left failed
    pub max_attempts: i32,
    /// Minimum age of the last failure before a sweep picks it up
    pub delay_hours: u64,
    pub check_interval_secs: u64,
    /// Ask the backend search endpoint about the title on each retry
    pub manual_search: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 3,
            delay_hours: 24,
            check_interval_secs: 3600,
            manual_search: false,
        }
    }
}

fn trim_url(url: String) -> String {
    url.trim().trim_end_matches('/').to_string()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Parses "HH:MM" (24h clock).
pub fn parse_report_time(s: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M").ok()
}

/// Keeps the first and last character of a secret for log output.
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    match chars.len() {
        0 => "<unset>".to_string(),
        1..=4 => "***".to_string(),
        n => format!("{}***{}", chars[0], chars[n - 1]),
    }
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let db_path = file
            .db_path
            .map(PathBuf::from)
            .or_else(|| cli.db_path.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH));

        // Request source
        let source_file = file.source.unwrap_or_default();
        let source_url = non_empty(source_file.url)
            .or_else(|| cli.source_url.clone())
            .map(trim_url)
            .ok_or_else(|| anyhow!("source url must be specified in [source] or via --source-url"))?;
        let source_api_key = non_empty(source_file.api_key)
            .or_else(|| cli.source_api_key.clone())
            .ok_or_else(|| {
                anyhow!("source api_key must be specified in [source] or via SOURCE_API_KEY")
            })?;
        let page_size = source_file.page_size.unwrap_or(50);
        if page_size == 0 {
            bail!("source page_size must be positive");
        }

        // Backend
        let backend_file = file.backend.unwrap_or_default();
        let backend_url = non_empty(backend_file.url)
            .or_else(|| cli.backend_url.clone())
            .map(trim_url)
            .ok_or_else(|| {
                anyhow!("backend url must be specified in [backend] or via --backend-url")
            })?;
        let username = non_empty(backend_file.username)
            .or_else(|| cli.backend_username.clone())
            .ok_or_else(|| anyhow!("backend username must be specified in [backend]"))?;
        let password = non_empty(backend_file.password)
            .or_else(|| cli.backend_password.clone())
            .ok_or_else(|| {
                anyhow!("backend password must be specified in [backend] or via BACKEND_PASSWORD")
            })?;
        let auth_scheme = match backend_file.auth_scheme {
            Some(s) => match AuthScheme::parse(&s) {
                Some(scheme) => scheme,
                None => bail!("Unknown backend auth_scheme: {}", s),
            },
            None => AuthScheme::Bearer,
        };
        let request_timeout_secs = backend_file.request_timeout_secs.unwrap_or(30);
        if request_timeout_secs == 0 {
            bail!("backend request_timeout_secs must be positive");
        }
        let token_refresh_hours = backend_file.token_refresh_hours.unwrap_or(24);
        if token_refresh_hours == 0 {
            bail!("backend token_refresh_hours must be positive");
        }
        let backend = BackendSettings {
            base_url: backend_url,
            username,
            password,
            auth_scheme,
            rate_limit_per_sec: backend_file.rate_limit_per_sec.unwrap_or(3),
            max_retries: backend_file.max_retries.unwrap_or(3),
            dry_run: cli.dry_run || backend_file.dry_run.unwrap_or(false),
            token_refresh_hours,
            request_timeout_secs,
        };

        // Sync
        let sync_file = file.sync.unwrap_or_default();
        let tv_mode = match sync_file.tv_mode {
            Some(s) => match TvMode::parse(&s) {
                Some(mode) => mode,
                None => bail!("Unknown sync tv_mode: {}", s),
            },
            None => TvMode::Season,
        };
        let sync = SyncSettings {
            interval_secs: sync_file.interval_secs.unwrap_or(300),
            tv_mode,
        };
        if sync.interval_secs == 0 {
            bail!("sync interval_secs must be positive");
        }

        // Tracker
        let tracker_file = file.tracker.unwrap_or_default();
        let tracker = TrackerSettings {
            enabled: tracker_file.enabled.unwrap_or(true),
            interval_secs: tracker_file.interval_secs.unwrap_or(300),
            history_page_size: tracker_file.history_page_size.unwrap_or(50),
            push_enabled: tracker_file.push_enabled.unwrap_or(true),
            push_reconnect_secs: tracker_file.push_reconnect_secs.unwrap_or(30),
        };
        if tracker.interval_secs == 0 {
            bail!("tracker interval_secs must be positive");
        }
        if tracker.history_page_size == 0 {
            bail!("tracker history_page_size must be positive");
        }

        // Notifications
        let notify_file = file.notify.unwrap_or_default();
        let notify = NotifySettings {
            telegram_bot_token: non_empty(notify_file.telegram_bot_token)
                .or_else(|| cli.telegram_bot_token.clone()),
            telegram_chat_ids: notify_file
                .telegram_chat_ids
                .unwrap_or_default()
                .into_iter()
                .map(|id| id.trim().to_string())
                .filter(|id| !id.is_empty())
                .collect(),
            telegram_api_url: notify_file
                .telegram_api_url
                .map(trim_url)
                .unwrap_or_else(|| DEFAULT_TELEGRAM_API_URL.to_string()),
            tmdb_api_key: non_empty(notify_file.tmdb_api_key).or_else(|| cli.tmdb_api_key.clone()),
            tmdb_base_url: notify_file
                .tmdb_base_url
                .map(trim_url)
                .unwrap_or_else(|| DEFAULT_TMDB_BASE_URL.to_string()),
        };

        // Daily report
        let report_file = file.report.unwrap_or_default();
        let report_time = match report_file.time {
            Some(s) => match parse_report_time(&s) {
                Some(time) => time,
                None => bail!("Malformed report time {:?}, expected HH:MM", s),
            },
            None => ReportSettings::default().time,
        };
        let report = ReportSettings {
            enabled: report_file.enabled.unwrap_or(true),
            time: report_time,
        };

        // Retry sweep
        let retry_file = file.retry.unwrap_or_default();
        let retry = RetrySettings {
            enabled: retry_file.enabled.unwrap_or(true),
            max_attempts: retry_file.max_attempts.unwrap_or(3),
            delay_hours: retry_file.delay_hours.unwrap_or(24),
            check_interval_secs: retry_file.check_interval_secs.unwrap_or(3600),
            manual_search: retry_file.manual_search.unwrap_or(false),
        };
        if retry.check_interval_secs == 0 {
            bail!("retry check_interval_secs must be positive");
        }

        Ok(Self {
            db_path,
            source: SourceSettings {
                base_url: source_url,
                api_key: source_api_key,
                page_size,
                request_timeout_secs,
            },
            backend,
            sync,
            tracker,
            notify,
            report,
            retry,
        })
    }

    /// Logs the effective configuration with credentials masked.
    pub fn log_summary(&self) {
        info!("Ledger: {:?}", self.db_path);
        info!(
            "Request source: {} (api key {}, page size {})",
            self.source.base_url,
            mask_secret(&self.source.api_key),
            self.source.page_size
        );
        info!(
            "Backend: {} as {} (password {}, auth {}, {} req/s, {} retries{})",
            self.backend.base_url,
            self.backend.username,
            mask_secret(&self.backend.password),
            self.backend.auth_scheme.as_str(),
            self.backend.rate_limit_per_sec,
            self.backend.max_retries,
            if self.backend.dry_run { ", DRY RUN" } else { "" }
        );
        info!(
            "Sync every {}s, tv mode {}",
            self.sync.interval_secs,
            self.sync.tv_mode.as_str()
        );
        if self.tracker.enabled {
            info!(
                "Tracker every {}s, push listener {}",
                self.tracker.interval_secs,
                if self.tracker.push_enabled { "on" } else { "off" }
            );
        } else {
            info!("Tracker disabled");
        }
        match &self.notify.telegram_bot_token {
            Some(token) if self.notify.telegram_enabled() => info!(
                "Telegram notifications to {} chat(s) (token {})",
                self.notify.telegram_chat_ids.len(),
                mask_secret(token)
            ),
            _ => info!("Telegram notifications disabled, logging only"),
        }
        if self.report.enabled {
            info!("Daily report at {}", self.report.time.format("%H:%M"));
        }
        if self.retry.enabled {
            info!(
                "Retry sweep every {}s: up to {} attempts, {}h after failure",
                self.retry.check_interval_secs, self.retry.max_attempts, self.retry.delay_hours
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_cli() -> CliConfig {
        CliConfig {
            source_url: Some("http://seerr:5055/".to_string()),
            source_api_key: Some("source-key".to_string()),
            backend_url: Some("http://backend:3000//".to_string()),
            backend_username: Some("admin".to_string()),
            backend_password: Some("secret".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_resolve_defaults() {
        let config = AppConfig::resolve(&minimal_cli(), None).unwrap();

        assert_eq!(config.db_path, PathBuf::from(DEFAULT_DB_PATH));
        assert_eq!(config.source.base_url, "http://seerr:5055");
        assert_eq!(config.source.page_size, 50);
        assert_eq!(config.backend.base_url, "http://backend:3000");
        assert_eq!(config.backend.auth_scheme, AuthScheme::Bearer);
        assert_eq!(config.backend.rate_limit_per_sec, 3);
        assert_eq!(config.backend.max_retries, 3);
        assert_eq!(config.backend.token_refresh_hours, 24);
        assert!(!config.backend.dry_run);
        assert_eq!(config.sync.interval_secs, 300);
        assert_eq!(config.sync.tv_mode, TvMode::Season);
        assert!(config.tracker.enabled);
        assert!(config.tracker.push_enabled);
        assert_eq!(config.tracker.push_reconnect_secs, 30);
        assert!(!config.notify.telegram_enabled());
        assert_eq!(config.report.time, NaiveTime::from_hms_opt(9, 0, 0).unwrap());
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.delay_hours, 24);
        assert_eq!(config.retry.check_interval_secs, 3600);
    }

    #[test]
    fn test_resolve_toml_overrides_cli() {
        let cli = CliConfig {
            db_path: Some(PathBuf::from("/cli/ledger.db")),
            ..minimal_cli()
        };
        let file_config = FileConfig {
            db_path: Some("/toml/ledger.db".to_string()),
            backend: Some(BackendConfig {
                url: Some("http://toml-backend:3001/".to_string()),
                auth_scheme: Some("query-token".to_string()),
                max_retries: Some(1),
                ..Default::default()
            }),
            sync: Some(SyncConfig {
                tv_mode: Some("episode".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };

        let config = AppConfig::resolve(&cli, Some(file_config)).unwrap();

        assert_eq!(config.db_path, PathBuf::from("/toml/ledger.db"));
        assert_eq!(config.backend.base_url, "http://toml-backend:3001");
        assert_eq!(config.backend.auth_scheme, AuthScheme::QueryToken);
        assert_eq!(config.backend.max_retries, 1);
        assert_eq!(config.sync.tv_mode, TvMode::Episode);
        // CLI value used when TOML doesn't specify
        assert_eq!(config.backend.username, "admin");
        assert_eq!(config.source.base_url, "http://seerr:5055");
    }

    #[test]
    fn test_cli_dry_run_wins() {
        let cli = CliConfig {
            dry_run: true,
            ..minimal_cli()
        };
        let file_config = FileConfig {
            backend: Some(BackendConfig {
                dry_run: Some(false),
                ..Default::default()
            }),
            ..Default::default()
        };
        let config = AppConfig::resolve(&cli, Some(file_config)).unwrap();
        assert!(config.backend.dry_run);
    }

    #[test]
    fn test_resolve_missing_backend_url_error() {
        let cli = CliConfig {
            backend_url: None,
            ..minimal_cli()
        };
        let err = AppConfig::resolve(&cli, None).unwrap_err();
        assert!(err.to_string().contains("backend url must be specified"));
    }

    #[test]
    fn test_resolve_missing_source_key_error() {
        let cli = CliConfig {
            source_api_key: None,
            ..minimal_cli()
        };
        let err = AppConfig::resolve(&cli, None).unwrap_err();
        assert!(err.to_string().contains("SOURCE_API_KEY"));
    }

    #[test]
    fn test_resolve_rejects_unknown_enums() {
        let file_config = FileConfig {
            backend: Some(BackendConfig {
                auth_scheme: Some("cookie".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let err = AppConfig::resolve(&minimal_cli(), Some(file_config)).unwrap_err();
        assert!(err.to_string().contains("auth_scheme"));

        let file_config = FileConfig {
            sync: Some(SyncConfig {
                tv_mode: Some("movie".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let err = AppConfig::resolve(&minimal_cli(), Some(file_config)).unwrap_err();
        assert!(err.to_string().contains("tv_mode"));
    }

    #[test]
    fn test_resolve_rejects_zero_interval() {
        let file_config = FileConfig {
            sync: Some(SyncConfig {
                interval_secs: Some(0),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(AppConfig::resolve(&minimal_cli(), Some(file_config)).is_err());
    }

    #[test]
    fn test_report_time_parsing() {
        assert_eq!(
            parse_report_time("21:05"),
            NaiveTime::from_hms_opt(21, 5, 0)
        );
        assert!(parse_report_time("25:00").is_none());
        assert!(parse_report_time("9am").is_none());

        let file_config = FileConfig {
            report: Some(ReportConfig {
                time: Some("noon".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let err = AppConfig::resolve(&minimal_cli(), Some(file_config)).unwrap_err();
        assert!(err.to_string().contains("Malformed report time"));
    }

    #[test]
    fn test_telegram_chat_ids_cleaned() {
        let cli = CliConfig {
            telegram_bot_token: Some("123:abc".to_string()),
            ..minimal_cli()
        };
        let file_config = FileConfig {
            notify: Some(NotifyConfig {
                telegram_chat_ids: Some(vec![" 42 ".to_string(), "".to_string()]),
                ..Default::default()
            }),
            ..Default::default()
        };
        let config = AppConfig::resolve(&cli, Some(file_config)).unwrap();
        assert_eq!(config.notify.telegram_chat_ids, vec!["42".to_string()]);
        assert!(config.notify.telegram_enabled());
    }

    #[test]
    fn test_mask_secret() {
        assert_eq!(mask_secret(""), "<unset>");
        assert_eq!(mask_secret("abc"), "***");
        assert_eq!(mask_secret("supersecret"), "s***t");
    }
}
