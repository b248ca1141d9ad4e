use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    pub db_path: Option<String>,

    pub source: Option<SourceConfig>,
    pub backend: Option<BackendConfig>,
    pub sync: Option<SyncConfig>,
    pub tracker: Option<TrackerConfig>,
    pub notify: Option<NotifyConfig>,
    pub report: Option<ReportConfig>,
    pub retry: Option<RetryConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct SourceConfig {
    pub url: Option<String>,
    pub api_key: Option<String>,
    pub page_size: Option<u32>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct BackendConfig {
    pub url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    /// "bearer", "api-token" or "query-token"
    pub auth_scheme: Option<String>,
    pub rate_limit_per_sec: Option<u32>,
    pub max_retries: Option<u32>,
    pub dry_run: Option<bool>,
    pub token_refresh_hours: Option<u64>,
    pub request_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct SyncConfig {
    pub interval_secs: Option<u64>,
    /// "season" or "episode"
    pub tv_mode: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct TrackerConfig {
    pub enabled: Option<bool>,
    pub interval_secs: Option<u64>,
    pub history_page_size: Option<u32>,
    pub push_enabled: Option<bool>,
    pub push_reconnect_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct NotifyConfig {
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_ids: Option<Vec<String>>,
    pub telegram_api_url: Option<String>,
    pub tmdb_api_key: Option<String>,
    pub tmdb_base_url: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct ReportConfig {
    pub enabled: Option<bool>,
    /// Local time of day, "HH:MM"
    pub time: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct RetryConfig {
    pub enabled: Option<bool>,
    pub max_attempts: Option<i32>,
    pub delay_hours: Option<u64>,
    pub check_interval_secs: Option<u64>,
    pub manual_search: Option<bool>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_sections() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
db_path = "/var/lib/syncer/ledger.db"

[source]
url = "http://seerr:5055/"
page_size = 20

[backend]
url = "http://backend:3000"
username = "admin"
auth_scheme = "api-token"
max_retries = 5

[tracker]
push_enabled = false

[notify]
telegram_chat_ids = ["100", "-200"]

[report]
time = "21:30"
"#
        )
        .unwrap();

        let config = FileConfig::load(file.path()).unwrap();
        assert_eq!(config.db_path.as_deref(), Some("/var/lib/syncer/ledger.db"));
        let source = config.source.unwrap();
        assert_eq!(source.page_size, Some(20));
        assert!(source.api_key.is_none());
        let backend = config.backend.unwrap();
        assert_eq!(backend.auth_scheme.as_deref(), Some("api-token"));
        assert_eq!(backend.max_retries, Some(5));
        assert_eq!(config.tracker.unwrap().push_enabled, Some(false));
        assert_eq!(
            config.notify.unwrap().telegram_chat_ids,
            Some(vec!["100".to_string(), "-200".to_string()])
        );
        assert_eq!(config.report.unwrap().time.as_deref(), Some("21:30"));
        assert!(config.retry.is_none());
    }

    #[test]
    fn test_load_empty_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let config = FileConfig::load(file.path()).unwrap();
        assert!(config.backend.is_none());
        assert!(config.db_path.is_none());
    }

    #[test]
    fn test_load_invalid_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[backend\nurl = ").unwrap();
        let err = FileConfig::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }

    #[test]
    fn test_load_missing_file() {
        let err = FileConfig::load(Path::new("/nonexistent/syncer.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
