//! Periodic re-queueing of failed subscriptions.
//!
//! A failed request stays failed until this sweep moves it to `retrying`, which
//! the next sync pass picks up like a pending request.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backend::AcquisitionBackend;
use crate::config::RetrySettings;
use crate::ledger::{DownloadEvent, EventKind, LedgerStore, Request, SyncStatus};
use crate::notifications::{Notification, NotificationDispatcher};

const FAILED_LINKS_LIMIT: usize = 500;

pub struct RetrySweeper {
    ledger: Arc<dyn LedgerStore>,
    backend: Arc<dyn AcquisitionBackend>,
    notifier: NotificationDispatcher,
    settings: RetrySettings,
}

impl RetrySweeper {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        backend: Arc<dyn AcquisitionBackend>,
        notifier: NotificationDispatcher,
        settings: RetrySettings,
    ) -> Self {
        Self {
            ledger,
            backend,
            notifier,
            settings,
        }
    }

    /// Re-queue eligible failures as of `now` (unix seconds).
    /// Returns the number of requests moved to `retrying`.
    pub async fn sweep_once(&self, now: i64, cancel: &CancellationToken) -> Result<usize> {
        let cutoff = now - (self.settings.delay_hours as i64) * 3600;
        let failed = self
            .ledger
            .list_links_by_state(&[SyncStatus::Failed], FAILED_LINKS_LIMIT)?;

        let mut requeued = 0;
        for link in failed {
            if cancel.is_cancelled() {
                break;
            }
            if link.retry_count >= self.settings.max_attempts || link.updated_at > cutoff {
                continue;
            }
            let Some(request) = self.ledger.get_request(&link.source_request_id)? else {
                warn!("Failed link {} has no request", link.source_request_id);
                continue;
            };
            if !self.ledger.mark_link_retrying(&link.source_request_id)? {
                continue;
            }
            if !self.ledger.transition_request(
                &link.source_request_id,
                &[SyncStatus::Failed],
                SyncStatus::Retrying,
            )? {
                debug!(
                    "Request {} left failed state before the sweep reached it",
                    link.source_request_id
                );
                continue;
            }

            let attempt = link.retry_count + 1;
            info!(
                "Re-queued {} for retry {}/{}",
                request.title, attempt, self.settings.max_attempts
            );
            if self.settings.manual_search {
                self.record_manual_search(&request, cancel).await;
            }
            self.notifier.notify(Notification::retrying(
                &request.title,
                attempt,
                self.settings.max_attempts,
            ));
            requeued += 1;
        }
        Ok(requeued)
    }

    /// Ask the backend whether it can find the title at all and keep the answer
    /// in the audit log.
    async fn record_manual_search(&self, request: &Request, cancel: &CancellationToken) {
        let results = match self
            .backend
            .search_media(&request.title, Some(request.media_kind), cancel)
            .await
        {
            Ok(results) => results,
            Err(e) => {
                warn!("Manual search for {} failed: {}", request.title, e);
                return;
            }
        };

        let exact = results
            .iter()
            .any(|r| r.tmdbid == Some(request.tmdb_id));
        let event = DownloadEvent::new(&request.source_request_id, EventKind::ManualSearch)
            .with_data(json!({
                "tmdb_id": request.tmdb_id,
                "title": request.title,
                "results": results.len(),
                "exact_match": exact,
            }));
        if let Err(e) = self.ledger.append_event(&event) {
            warn!("Failed to append manual search event: {}", e);
        }
    }

    pub async fn run(&self, shutdown: CancellationToken) {
        let interval = Duration::from_secs(self.settings.check_interval_secs);
        info!("Retry sweep starting (interval={}s)", interval.as_secs());

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.cancelled() => {
                    info!("Retry sweep shutting down");
                    break;
                }
            }

            match self
                .sweep_once(chrono::Utc::now().timestamp(), &shutdown)
                .await
            {
                Ok(0) => debug!("Retry sweep found nothing to re-queue"),
                Ok(n) => info!("Retry sweep re-queued {} requests", n),
                Err(e) => error!("Retry sweep failed: {:#}", e),
            }
        }

        info!("Retry sweep stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{
        BackendError, HistoryEntry, MediaSearchResult, SubscribeOutcome, SubscribeSpec,
    };
    use crate::ledger::{MediaKind, SqliteLedgerStore, SubscriptionLink};
    use async_trait::async_trait;

    struct SearchOnlyBackend;

    #[async_trait]
    impl AcquisitionBackend for SearchOnlyBackend {
        async fn subscribe(
            &self,
            _spec: &SubscribeSpec,
            _cancel: &CancellationToken,
        ) -> Result<SubscribeOutcome, BackendError> {
            Err(BackendError::Rejected("not expected".to_string()))
        }

        async fn download_history(
            &self,
            _page: u32,
            _count: u32,
            _cancel: &CancellationToken,
        ) -> Result<Vec<HistoryEntry>, BackendError> {
            Ok(Vec::new())
        }

        async fn transfer_history(
            &self,
            _page: u32,
            _count: u32,
            _cancel: &CancellationToken,
        ) -> Result<Vec<HistoryEntry>, BackendError> {
            Ok(Vec::new())
        }

        async fn search_media(
            &self,
            _title: &str,
            _kind: Option<MediaKind>,
            _cancel: &CancellationToken,
        ) -> Result<Vec<MediaSearchResult>, BackendError> {
            Ok(vec![MediaSearchResult {
                tmdbid: Some(603),
                ..Default::default()
            }])
        }
    }

    fn settings() -> RetrySettings {
        RetrySettings {
            enabled: true,
            max_attempts: 2,
            delay_hours: 24,
            check_interval_secs: 3600,
            manual_search: true,
        }
    }

    fn failed_request(ledger: &SqliteLedgerStore, id: &str) {
        ledger
            .upsert_request(&Request::new(id, MediaKind::Movie, 603, "Film"))
            .unwrap();
        ledger
            .update_request_status(id, SyncStatus::Failed)
            .unwrap();
        ledger
            .save_link(&SubscriptionLink::failed(id, "HTTP 400".to_string()))
            .unwrap();
    }

    fn sweeper(ledger: Arc<SqliteLedgerStore>) -> RetrySweeper {
        RetrySweeper::new(
            ledger,
            Arc::new(SearchOnlyBackend),
            NotificationDispatcher::disabled(),
            settings(),
        )
    }

    const DAY: i64 = 24 * 3600;

    #[tokio::test]
    async fn test_recent_failures_wait_for_delay() {
        let ledger = Arc::new(SqliteLedgerStore::in_memory().unwrap());
        failed_request(&ledger, "1");
        let sweeper = sweeper(ledger.clone());

        let now = chrono::Utc::now().timestamp();
        let requeued = sweeper.sweep_once(now, &CancellationToken::new()).await.unwrap();

        assert_eq!(requeued, 0);
        assert_eq!(ledger.get_request("1").unwrap().unwrap().status, SyncStatus::Failed);
    }

    #[tokio::test]
    async fn test_old_failures_are_requeued() {
        let ledger = Arc::new(SqliteLedgerStore::in_memory().unwrap());
        failed_request(&ledger, "1");
        let sweeper = sweeper(ledger.clone());

        let later = chrono::Utc::now().timestamp() + DAY + 60;
        let requeued = sweeper
            .sweep_once(later, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(requeued, 1);
        assert_eq!(
            ledger.get_request("1").unwrap().unwrap().status,
            SyncStatus::Retrying
        );
        let link = ledger.get_link("1").unwrap().unwrap();
        assert_eq!(link.state, SyncStatus::Retrying);
        assert_eq!(link.retry_count, 1);

        let events = ledger.list_events(Some("1"), 10).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::ManualSearch);
        assert!(events[0].data.contains("\"exact_match\":true"));
    }

    #[tokio::test]
    async fn test_attempt_budget_is_respected() {
        let ledger = Arc::new(SqliteLedgerStore::in_memory().unwrap());
        failed_request(&ledger, "1");
        let sweeper = sweeper(ledger.clone());
        let cancel = CancellationToken::new();
        let mut now = chrono::Utc::now().timestamp();

        for expected_count in 1..=2 {
            now += 2 * DAY;
            assert_eq!(sweeper.sweep_once(now, &cancel).await.unwrap(), 1);
            assert_eq!(
                ledger.get_link("1").unwrap().unwrap().retry_count,
                expected_count
            );
            // The next pass fails again
            ledger
                .save_link(&SubscriptionLink::failed("1", "HTTP 400".to_string()))
                .unwrap();
            ledger
                .update_request_status("1", SyncStatus::Failed)
                .unwrap();
        }

        now += 2 * DAY;
        assert_eq!(sweeper.sweep_once(now, &cancel).await.unwrap(), 0);
        assert_eq!(ledger.get_request("1").unwrap().unwrap().status, SyncStatus::Failed);
    }
}
