//! End-to-end tests for the sync pipeline
//!
//! Drives real HTTP clients for the request source and the backend against
//! the mock server, with a file-backed ledger.

mod common;

use common::{
    approved_movie, approved_show, backend_settings, capturing_dispatcher, pending_request,
    MockBackend, MOVIE_TMDB_ID, SHOW_TMDB_ID, SOURCE_API_KEY, TV_LABEL,
};
use request_syncer::backend::BackendClient;
use request_syncer::config::{RetrySettings, TvMode};
use request_syncer::ledger::{
    LedgerStore, SqliteLedgerStore, SyncStatus, TrackingStatus,
};
use request_syncer::notifications::{NotificationDispatcher, NotificationKind};
use request_syncer::request_source::SeerrClient;
use request_syncer::sync::{PipelineSettings, RetrySweeper, SyncPipeline};
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

struct Harness {
    mock: MockBackend,
    ledger: Arc<SqliteLedgerStore>,
    backend: Arc<BackendClient>,
    _dir: TempDir,
}

impl Harness {
    async fn new(max_retries: u32) -> Self {
        let mock = MockBackend::spawn().await;
        let dir = TempDir::new().unwrap();
        let ledger = Arc::new(SqliteLedgerStore::new(dir.path().join("ledger.db")).unwrap());
        let backend =
            Arc::new(BackendClient::new(&backend_settings(&mock.base_url, max_retries)).unwrap());
        Self {
            mock,
            ledger,
            backend,
            _dir: dir,
        }
    }

    fn pipeline(&self, notifier: NotificationDispatcher) -> SyncPipeline {
        let source = Arc::new(
            SeerrClient::new(self.mock.base_url.clone(), SOURCE_API_KEY.to_string(), 5).unwrap(),
        );
        SyncPipeline::new(
            source,
            self.backend.clone(),
            self.ledger.clone(),
            notifier,
            PipelineSettings {
                page_size: 2,
                tv_mode: TvMode::Season,
            },
        )
    }
}

#[tokio::test]
async fn test_sync_subscribes_approved_requests() {
    let h = Harness::new(0).await;
    h.mock.add_source_request(approved_movie(1, MOVIE_TMDB_ID));
    h.mock
        .add_source_request(approved_show(2, SHOW_TMDB_ID, &[2, 0, 1]));
    h.mock.add_source_request(pending_request(3, 700));
    let pipeline = h.pipeline(NotificationDispatcher::disabled());

    let report = pipeline.sync_once(&CancellationToken::new()).await.unwrap();

    assert_eq!(report.fetched, 2);
    assert_eq!(report.subscribed, 2);
    assert_eq!(report.failed, 0);
    // Three entries at page size two: two list calls
    assert_eq!(MockBackend::calls(&h.mock.state.source_list_calls), 2);

    let movie = h.ledger.get_request("1").unwrap().unwrap();
    assert_eq!(movie.status, SyncStatus::Synced);
    assert_eq!(movie.title, format!("Movie {}", MOVIE_TMDB_ID));
    assert_eq!(movie.poster_path.as_deref(), Some("/movie603.jpg"));
    assert!(h.ledger.get_request("3").unwrap().is_none());

    let show_seasons: Vec<_> = h
        .mock
        .subscribe_bodies()
        .into_iter()
        .filter(|b| b["type"] == json!(TV_LABEL))
        .map(|b| b["season"].as_i64().unwrap())
        .collect();
    assert_eq!(show_seasons, vec![1, 2]);

    let tracking = h.ledger.get_tracking("2").unwrap().unwrap();
    assert_eq!(tracking.status, TrackingStatus::Subscribed);
    assert!(!h.ledger.get_link("1").unwrap().unwrap().backend_subscription_id.is_empty());
}

#[tokio::test]
async fn test_second_pass_is_idempotent() {
    let h = Harness::new(0).await;
    h.mock.add_source_request(approved_movie(1, MOVIE_TMDB_ID));
    let pipeline = h.pipeline(NotificationDispatcher::disabled());
    let cancel = CancellationToken::new();

    pipeline.sync_once(&cancel).await.unwrap();
    let second = pipeline.sync_once(&cancel).await.unwrap();

    assert_eq!(second.skipped, 1);
    assert_eq!(second.subscribed, 0);
    assert_eq!(MockBackend::calls(&h.mock.state.subscribe_calls), 1);
    assert_eq!(h.ledger.list_events(Some("1"), 10).unwrap().len(), 1);
}

#[tokio::test]
async fn test_already_existing_media_is_tracked_as_transferred() {
    let h = Harness::new(0).await;
    h.mock.add_source_request(approved_movie(1, MOVIE_TMDB_ID));
    h.mock.script_subscribe(
        200,
        json!({"success": true, "message": "媒体库中已存在", "data": {}}),
    );
    let (notifier, mut rx) = capturing_dispatcher();
    let pipeline = h.pipeline(notifier);

    let report = pipeline.sync_once(&CancellationToken::new()).await.unwrap();

    assert_eq!(report.already_exists, 1);
    let tracking = h.ledger.get_tracking("1").unwrap().unwrap();
    assert_eq!(tracking.status, TrackingStatus::Transferred);
    let notification = rx.recv().await.unwrap();
    assert_eq!(notification.kind, NotificationKind::AlreadyExists);
}

#[tokio::test]
async fn test_failed_request_waits_for_retry_sweep() {
    let h = Harness::new(0).await;
    h.mock.add_source_request(approved_movie(1, MOVIE_TMDB_ID));
    h.mock.script_subscribe(400, json!({"detail": "bad request"}));
    let (notifier, mut rx) = capturing_dispatcher();
    let pipeline = h.pipeline(notifier.clone());
    let cancel = CancellationToken::new();

    let first = pipeline.sync_once(&cancel).await.unwrap();
    assert_eq!(first.failed, 1);
    let link = h.ledger.get_link("1").unwrap().unwrap();
    assert_eq!(link.state, SyncStatus::Failed);
    assert!(link.last_error.unwrap().contains("400"));
    assert_eq!(rx.recv().await.unwrap().kind, NotificationKind::Failed);

    // Not retried by a plain pass
    pipeline.sync_once(&cancel).await.unwrap();
    assert_eq!(MockBackend::calls(&h.mock.state.subscribe_calls), 1);

    let sweeper = RetrySweeper::new(
        h.ledger.clone(),
        h.backend.clone(),
        notifier,
        RetrySettings::default(),
    );
    let later = chrono::Utc::now().timestamp() + 25 * 3600;
    assert_eq!(sweeper.sweep_once(later, &cancel).await.unwrap(), 1);
    assert_eq!(rx.recv().await.unwrap().kind, NotificationKind::Retrying);

    let third = pipeline.sync_once(&cancel).await.unwrap();
    assert_eq!(third.subscribed, 1);
    assert_eq!(
        h.ledger.get_request("1").unwrap().unwrap().status,
        SyncStatus::Synced
    );
    let link = h.ledger.get_link("1").unwrap().unwrap();
    assert_eq!(link.state, SyncStatus::Synced);
    assert_eq!(link.retry_count, 1);
}

#[tokio::test]
async fn test_dry_run_records_without_subscribing() {
    let mock = MockBackend::spawn().await;
    mock.add_source_request(approved_movie(1, MOVIE_TMDB_ID));
    let mut settings = backend_settings(&mock.base_url, 0);
    settings.dry_run = true;
    let ledger = Arc::new(SqliteLedgerStore::in_memory().unwrap());
    let source =
        Arc::new(SeerrClient::new(mock.base_url.clone(), SOURCE_API_KEY.to_string(), 5).unwrap());
    let (notifier, mut rx) = capturing_dispatcher();
    let pipeline = SyncPipeline::new(
        source,
        Arc::new(BackendClient::new(&settings).unwrap()),
        ledger.clone(),
        notifier,
        PipelineSettings {
            page_size: 50,
            tv_mode: TvMode::Season,
        },
    );

    let report = pipeline.sync_once(&CancellationToken::new()).await.unwrap();

    assert_eq!(report.subscribed, 1);
    assert_eq!(MockBackend::calls(&mock.state.subscribe_calls), 0);
    assert_eq!(MockBackend::calls(&mock.state.login_calls), 0);
    assert_eq!(
        ledger.get_link("1").unwrap().unwrap().backend_subscription_id,
        "99999"
    );
    assert_eq!(rx.recv().await.unwrap().kind, NotificationKind::Subscribed);
}

#[tokio::test]
async fn test_unreachable_source_fails_the_pass() {
    let h = Harness::new(0).await;
    let source = Arc::new(
        SeerrClient::new(h.mock.base_url.clone(), "wrong-key".to_string(), 5).unwrap(),
    );
    let pipeline = SyncPipeline::new(
        source,
        h.backend.clone(),
        h.ledger.clone(),
        NotificationDispatcher::disabled(),
        PipelineSettings {
            page_size: 50,
            tv_mode: TvMode::Season,
        },
    );

    assert!(pipeline.sync_once(&CancellationToken::new()).await.is_err());
    assert_eq!(h.ledger.get_stats().unwrap().total, 0);
}

#[tokio::test]
async fn test_rejected_login_aborts_pass_and_keeps_requests_pending() {
    let mock = MockBackend::spawn().await;
    mock.add_source_request(approved_movie(1, MOVIE_TMDB_ID));
    mock.add_source_request(approved_show(2, SHOW_TMDB_ID, &[1]));
    let mut settings = backend_settings(&mock.base_url, 3);
    settings.password = "expired-password".to_string();
    let ledger = Arc::new(SqliteLedgerStore::in_memory().unwrap());
    let source =
        Arc::new(SeerrClient::new(mock.base_url.clone(), SOURCE_API_KEY.to_string(), 5).unwrap());
    let pipeline = SyncPipeline::new(
        source,
        Arc::new(BackendClient::new(&settings).unwrap()),
        ledger.clone(),
        NotificationDispatcher::disabled(),
        PipelineSettings::default(),
    );

    assert!(pipeline.sync_once(&CancellationToken::new()).await.is_err());

    assert_eq!(MockBackend::calls(&mock.state.login_calls), 1);
    assert_eq!(MockBackend::calls(&mock.state.subscribe_calls), 0);
    let stats = ledger.get_stats().unwrap();
    assert_eq!(stats.total, 2);
    assert_eq!(stats.pending, 2);
    assert_eq!(stats.failed, 0);
    assert!(ledger.get_link("1").unwrap().is_none());
}
