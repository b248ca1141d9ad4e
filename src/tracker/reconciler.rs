//! History-polling reconciler.
//!
//! Each tick loads the tracking records that are still in flight, reads one page
//! of download history and one page of transfer history, and advances every
//! record by at most one step. Transitions are conditional on the status the
//! record had when the tick started, so re-running a tick against the same
//! history, or racing another writer, never repeats a transition.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backend::{AcquisitionBackend, BackendError, HistoryEntry};
use crate::ledger::{DownloadEvent, EventKind, LedgerStore, TrackingRecord, TrackingStatus};
use crate::notifications::{Notification, NotificationDispatcher};

/// Tracking records examined per tick.
const ACTIVE_RECORDS_LIMIT: usize = 300;

/// A lifecycle step applied to one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    DownloadStarted,
    TransferComplete,
    Failed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub checked: usize,
    pub download_started: usize,
    pub transferred: usize,
    pub failed: usize,
    /// True when neither history endpoint answered
    pub history_unavailable: bool,
}

pub struct TrackingReconciler {
    backend: Arc<dyn AcquisitionBackend>,
    ledger: Arc<dyn LedgerStore>,
    notifier: NotificationDispatcher,
    history_page_size: u32,
}

/// What the history says about `record`: `None` without a matching entry,
/// `Some(true)` if any matching entry succeeded, `Some(false)` if all of them failed.
///
/// A show has one entry per episode, so a single failed episode next to
/// successful ones does not count against the request.
fn match_outcome(history: Option<&[HistoryEntry]>, record: &TrackingRecord) -> Option<bool> {
    let mut matched = history?
        .iter()
        .filter(|entry| entry.matches(record.tmdb_id, record.media_kind))
        .peekable();
    matched.peek()?;
    Some(matched.any(|entry| !entry.is_failure()))
}

impl TrackingReconciler {
    pub fn new(
        backend: Arc<dyn AcquisitionBackend>,
        ledger: Arc<dyn LedgerStore>,
        notifier: NotificationDispatcher,
        history_page_size: u32,
    ) -> Self {
        Self {
            backend,
            ledger,
            notifier,
            history_page_size,
        }
    }

    async fn fetch_history(
        &self,
        transfer: bool,
        cancel: &CancellationToken,
    ) -> Result<Option<Vec<HistoryEntry>>, BackendError> {
        let (label, result) = if transfer {
            (
                "transfer",
                self.backend
                    .transfer_history(1, self.history_page_size, cancel)
                    .await,
            )
        } else {
            (
                "download",
                self.backend
                    .download_history(1, self.history_page_size, cancel)
                    .await,
            )
        };
        match result {
            Ok(entries) => {
                debug!("Got {} {} history entries", entries.len(), label);
                Ok(Some(entries))
            }
            Err(BackendError::Cancelled) => Err(BackendError::Cancelled),
            Err(e) => {
                warn!("Failed to fetch {} history: {}", label, e);
                Ok(None)
            }
        }
    }

    /// Run one reconciliation tick.
    pub async fn check_once(&self, cancel: &CancellationToken) -> Result<ReconcileReport> {
        let records = self
            .ledger
            .list_tracking_by_status(&TrackingStatus::ACTIVE, ACTIVE_RECORDS_LIMIT)
            .context("Failed to list active tracking records")?;
        let mut report = ReconcileReport {
            checked: records.len(),
            ..ReconcileReport::default()
        };
        if records.is_empty() {
            debug!("No tracking records to check");
            return Ok(report);
        }
        info!("Checking {} tracking records", records.len());

        let downloads = self.fetch_history(false, cancel).await?;
        let transfers = self.fetch_history(true, cancel).await?;
        if downloads.is_none() && transfers.is_none() {
            report.history_unavailable = true;
            return Ok(report);
        }

        let now = chrono::Utc::now().timestamp();
        for record in &records {
            match self.reconcile_record(record, downloads.as_deref(), transfers.as_deref(), now) {
                Ok(Some(Transition::DownloadStarted)) => report.download_started += 1,
                Ok(Some(Transition::TransferComplete)) => report.transferred += 1,
                Ok(Some(Transition::Failed)) => report.failed += 1,
                Ok(None) => {}
                Err(e) => warn!(
                    "Failed to reconcile {} ({}): {:#}",
                    record.title, record.source_request_id, e
                ),
            }
        }
        Ok(report)
    }

    /// Decide and apply at most one transition for `record`, based on the status it
    /// had when it was loaded.
    pub fn reconcile_record(
        &self,
        record: &TrackingRecord,
        downloads: Option<&[HistoryEntry]>,
        transfers: Option<&[HistoryEntry]>,
        now: i64,
    ) -> Result<Option<Transition>> {
        let id = record.source_request_id.as_str();
        match record.status {
            TrackingStatus::Subscribed => {
                match match_outcome(downloads, record) {
                    None => return Ok(None),
                    Some(false) => return self.fail(record, "download reported as failed", now),
                    Some(true) => {}
                }
                if !self.ledger.advance_tracking(
                    id,
                    &[TrackingStatus::Subscribed],
                    TrackingStatus::Downloading,
                    now,
                )? {
                    return Ok(None);
                }
                info!("Download started: {} (tmdb {})", record.title, record.tmdb_id);
                self.record_transition(record, EventKind::DownloadStarted);
                self.notifier
                    .notify(Notification::download_started(&record.title));
                Ok(Some(Transition::DownloadStarted))
            }
            TrackingStatus::Downloading | TrackingStatus::Downloaded => {
                match match_outcome(transfers, record) {
                    None => return Ok(None),
                    Some(false) => return self.fail(record, "transfer reported as failed", now),
                    Some(true) => {}
                }
                if !self.ledger.advance_tracking(
                    id,
                    &[TrackingStatus::Downloading, TrackingStatus::Downloaded],
                    TrackingStatus::Transferred,
                    now,
                )? {
                    return Ok(None);
                }
                info!("Transfer completed: {} (tmdb {})", record.title, record.tmdb_id);
                self.record_transition(record, EventKind::TransferComplete);
                self.notifier
                    .notify(Notification::transfer_complete(&record.title));
                Ok(Some(Transition::TransferComplete))
            }
            _ => Ok(None),
        }
    }

    fn fail(&self, record: &TrackingRecord, reason: &str, now: i64) -> Result<Option<Transition>> {
        if !self
            .ledger
            .fail_tracking(&record.source_request_id, reason, now)?
        {
            return Ok(None);
        }
        warn!("Tracking failed for {}: {}", record.title, reason);
        self.record_transition(record, EventKind::Failed);
        self.notifier
            .notify(Notification::failed(&record.title, reason));
        Ok(Some(Transition::Failed))
    }

    fn record_transition(&self, record: &TrackingRecord, kind: EventKind) {
        let event = DownloadEvent::new(&record.source_request_id, kind).with_data(json!({
            "tmdb_id": record.tmdb_id,
            "title": record.title,
        }));
        if let Err(e) = self.ledger.append_event(&event) {
            warn!(
                "Failed to append {} event for {}: {}",
                kind.as_str(),
                record.source_request_id,
                e
            );
        }
    }

    /// Check immediately, then every `interval`, until shutdown.
    pub async fn run(&self, interval: Duration, shutdown: CancellationToken) {
        info!("Tracking reconciler starting (interval={}s)", interval.as_secs());

        loop {
            match self.check_once(&shutdown).await {
                Ok(report) if report.download_started + report.transferred + report.failed > 0 => {
                    info!(
                        "Tracking check: {} started, {} transferred, {} failed",
                        report.download_started, report.transferred, report.failed
                    )
                }
                Ok(_) => {}
                Err(_) if shutdown.is_cancelled() => {}
                Err(e) => error!("Tracking check failed: {:#}", e),
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.cancelled() => {
                    info!("Tracking reconciler shutting down");
                    break;
                }
            }
        }

        info!("Tracking reconciler stopped");
    }
}
