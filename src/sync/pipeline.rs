//! Sync pipeline.
//!
//! Pulls approved requests from the request source into the ledger, then drives
//! every pending request through subscription creation on the backend. Each
//! request is claimed with a conditional status update before any backend call,
//! so a request is subscribed at most once per claim even if two passes overlap.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backend::{AcquisitionBackend, BackendError, SubscribeOutcome, SubscribeSpec};
use crate::config::TvMode;
use crate::ledger::{
    DownloadEvent, EventKind, LedgerStore, MediaKind, Request, SubscriptionLink, SyncStatus,
    TrackingRecord,
};
use crate::notifications::{Notification, NotificationDispatcher};
use crate::request_source::{
    fallback_title, fetch_all_approved, PosterLookup, RequestSource, SourceRequest,
};

/// Longest error text persisted on a subscription link.
pub const MAX_ERROR_CHARS: usize = 500;

/// Requests taken from the ledger per pass.
const PENDING_BATCH_LIMIT: usize = 100;

lazy_static! {
    static ref BEARER_RE: Regex = Regex::new(r"(?i)(bearer\s+)[A-Za-z0-9._~+/=-]+").unwrap();
    static ref SECRET_PARAM_RE: Regex = Regex::new(
        r#"(?i)((?:access_token|token|password|api_key|apikey)["']?\s*[=:]\s*["']?)[^\s&"',}]+"#
    )
    .unwrap();
}

/// Strip credentials from an error message and cap its length.
pub fn sanitize_error(message: &str) -> String {
    let cleaned = BEARER_RE.replace_all(message, "${1}***");
    let cleaned = SECRET_PARAM_RE.replace_all(&cleaned, "${1}***");
    if cleaned.chars().count() > MAX_ERROR_CHARS {
        let mut truncated: String = cleaned.chars().take(MAX_ERROR_CHARS).collect();
        truncated.push_str("...");
        truncated
    } else {
        cleaned.into_owned()
    }
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub page_size: u32,
    pub tv_mode: TvMode,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            page_size: 50,
            tv_mode: TvMode::Season,
        }
    }
}

/// Counters for one pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Approved requests returned by the source
    pub fetched: usize,
    /// Requests inserted or refreshed in the ledger
    pub upserted: usize,
    /// Requests ignored because they were already synced
    pub skipped: usize,
    /// Requests found in `processing` from an interrupted pass
    pub recovered: usize,
    pub subscribed: usize,
    pub already_exists: usize,
    pub failed: usize,
}

/// Result of driving one request through subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestOutcome {
    Subscribed,
    AlreadyExists,
    /// Sanitized failure reason
    Failed(String),
    /// Another worker owns the request, or its link is already synced
    Skipped,
    /// Shutdown interrupted the attempt; the request is pending again
    Cancelled,
    /// The backend refused our credentials; the request is pending again
    AuthFailed(String),
}

pub struct SyncPipeline {
    source: Arc<dyn RequestSource>,
    posters: Option<Arc<dyn PosterLookup>>,
    backend: Arc<dyn AcquisitionBackend>,
    ledger: Arc<dyn LedgerStore>,
    notifier: NotificationDispatcher,
    settings: PipelineSettings,
}

impl SyncPipeline {
    pub fn new(
        source: Arc<dyn RequestSource>,
        backend: Arc<dyn AcquisitionBackend>,
        ledger: Arc<dyn LedgerStore>,
        notifier: NotificationDispatcher,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            source,
            posters: None,
            backend,
            ledger,
            notifier,
            settings,
        }
    }

    pub fn with_poster_lookup(mut self, posters: Arc<dyn PosterLookup>) -> Self {
        self.posters = Some(posters);
        self
    }

    // =========================================================================
    // Pass driver
    // =========================================================================

    /// Run one full pass: ingest upstream requests, then subscribe pending ones.
    ///
    /// Per-request failures are counted, not returned. The pass only fails when
    /// the source cannot be listed or the ledger is unreadable.
    pub async fn sync_once(&self, cancel: &CancellationToken) -> Result<SyncReport> {
        let mut report = SyncReport {
            recovered: self
                .ledger
                .requeue_interrupted()
                .context("Failed to recover interrupted requests")?,
            ..SyncReport::default()
        };
        if report.recovered > 0 {
            warn!(
                "Recovered {} requests left in processing by an earlier pass",
                report.recovered
            );
        }

        let upstream = fetch_all_approved(self.source.as_ref(), self.settings.page_size, cancel)
            .await
            .context("Failed to fetch approved requests")?;
        report.fetched = upstream.len();
        info!("Fetched {} approved requests", upstream.len());

        for source_request in &upstream {
            if cancel.is_cancelled() {
                return Err(anyhow!("sync pass cancelled"));
            }
            match self.ingest_request(source_request).await {
                Ok(true) => report.upserted += 1,
                Ok(false) => report.skipped += 1,
                Err(e) => warn!("Failed to ingest request {}: {:#}", source_request.id, e),
            }
        }

        self.process_pending(cancel, &mut report).await?;

        match self.ledger.get_stats() {
            Ok(stats) => info!(
                "Sync completed: total={}, pending={}, synced={}, failed={}",
                stats.total, stats.pending, stats.synced, stats.failed
            ),
            Err(e) => warn!("Failed to read ledger stats: {}", e),
        }
        Ok(report)
    }

    /// Run `sync_once` immediately, then every `interval`, until shutdown.
    pub async fn run(&self, interval: Duration, shutdown: CancellationToken) {
        info!("Sync pipeline starting (interval={}s)", interval.as_secs());

        loop {
            match self.sync_once(&shutdown).await {
                Ok(report) => debug!("Sync pass finished: {:?}", report),
                Err(_) if shutdown.is_cancelled() => {}
                Err(e) => {
                    error!("Sync pass failed: {:#}", e);
                    self.notifier
                        .notify(Notification::system_error(&sanitize_error(&format!("{:#}", e))));
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.cancelled() => {
                    info!("Sync pipeline shutting down");
                    break;
                }
            }
        }

        info!("Sync pipeline stopped");
    }

    // =========================================================================
    // Ingestion
    // =========================================================================

    /// Upsert one upstream request. Returns false if it was already synced.
    pub async fn ingest_request(&self, source_request: &SourceRequest) -> Result<bool> {
        let source_request_id = source_request.id.to_string();
        if let Some(existing) = self.ledger.get_request(&source_request_id)? {
            if existing.status == SyncStatus::Synced {
                return Ok(false);
            }
        }

        let kind = source_request.media_kind().ok_or_else(|| {
            anyhow!(
                "unknown media type {:?}",
                source_request.media.media_type
            )
        })?;
        let tmdb_id = source_request.media.tmdb_id;

        let (title, mut poster_path) = match self.source.media_details(kind, tmdb_id).await {
            Ok(details) => (
                details
                    .display_title()
                    .unwrap_or_else(|| fallback_title(tmdb_id)),
                details.poster_path.filter(|p| !p.is_empty()),
            ),
            Err(e) => {
                warn!(
                    "Failed to fetch details for tmdb {}, using fallback title: {}",
                    tmdb_id, e
                );
                (fallback_title(tmdb_id), None)
            }
        };

        if poster_path.is_none() {
            if let Some(posters) = &self.posters {
                match posters.poster_path(kind, tmdb_id).await {
                    Ok(found) => poster_path = found,
                    Err(e) => warn!("Poster lookup failed for tmdb {}: {}", tmdb_id, e),
                }
            }
        }

        let request = build_request(source_request_id, kind, tmdb_id, title, source_request)
            .with_poster(poster_path);
        self.ledger.upsert_request(&request)?;
        debug!(
            "Saved request {} ({}, {})",
            request.source_request_id,
            request.title,
            kind.as_str()
        );
        Ok(true)
    }

    // =========================================================================
    // Subscription
    // =========================================================================

    async fn process_pending(
        &self,
        cancel: &CancellationToken,
        report: &mut SyncReport,
    ) -> Result<()> {
        let pending = self
            .ledger
            .list_requests_by_status(&[SyncStatus::Pending, SyncStatus::Retrying], PENDING_BATCH_LIMIT)
            .context("Failed to list pending requests")?;
        if pending.is_empty() {
            debug!("No pending requests");
            return Ok(());
        }
        info!("Processing {} pending requests", pending.len());

        match self.backend.authenticate(cancel).await {
            Ok(()) => {}
            Err(BackendError::Cancelled) => bail!("sync pass cancelled"),
            Err(e) => bail!(
                "Cannot authenticate with the backend: {}",
                sanitize_error(&e.to_string())
            ),
        }

        for request in &pending {
            if cancel.is_cancelled() {
                break;
            }
            match self.process_request(request, cancel).await {
                Ok(RequestOutcome::Subscribed) => report.subscribed += 1,
                Ok(RequestOutcome::AlreadyExists) => report.already_exists += 1,
                Ok(RequestOutcome::Failed(_)) => report.failed += 1,
                Ok(RequestOutcome::Skipped) => {}
                Ok(RequestOutcome::Cancelled) => break,
                Ok(RequestOutcome::AuthFailed(reason)) => {
                    bail!("Backend authentication failed during the pass: {}", reason)
                }
                Err(e) => {
                    report.failed += 1;
                    error!(
                        "Failed to record outcome for request {}: {:#}",
                        request.source_request_id, e
                    );
                }
            }
        }
        Ok(())
    }

    /// Claim a pending request, subscribe it on the backend and record the outcome.
    pub async fn process_request(
        &self,
        request: &Request,
        cancel: &CancellationToken,
    ) -> Result<RequestOutcome> {
        let id = request.source_request_id.as_str();
        if !self.ledger.transition_request(
            id,
            &[SyncStatus::Pending, SyncStatus::Retrying],
            SyncStatus::Processing,
        )? {
            debug!("Request {} already claimed, skipping", id);
            return Ok(RequestOutcome::Skipped);
        }

        if let Some(link) = self.ledger.get_link(id)? {
            if link.state == SyncStatus::Synced {
                self.ledger.update_request_status(id, SyncStatus::Synced)?;
                return Ok(RequestOutcome::Skipped);
            }
        }

        let specs = subscribe_specs(request, self.settings.tv_mode);
        if specs.is_empty() {
            let reason = "no subscribable seasons: only specials or seasons without episode \
                          lists were requested"
                .to_string();
            self.record_failure(request, &reason)?;
            return Ok(RequestOutcome::Failed(reason));
        }

        match self.subscribe_request(request, &specs, cancel).await {
            Ok(outcome) => {
                self.record_success(request, &outcome)?;
                if outcome.already_exists {
                    Ok(RequestOutcome::AlreadyExists)
                } else {
                    Ok(RequestOutcome::Subscribed)
                }
            }
            Err(BackendError::Cancelled) => {
                self.ledger
                    .transition_request(id, &[SyncStatus::Processing], SyncStatus::Pending)?;
                Ok(RequestOutcome::Cancelled)
            }
            Err(e) if e.is_auth_failure() => {
                self.ledger
                    .transition_request(id, &[SyncStatus::Processing], SyncStatus::Pending)?;
                Ok(RequestOutcome::AuthFailed(sanitize_error(&e.to_string())))
            }
            Err(e) => {
                let reason = sanitize_error(&e.to_string());
                self.record_failure(request, &reason)?;
                Ok(RequestOutcome::Failed(reason))
            }
        }
    }

    /// Issue the subscribe calls for one request.
    ///
    /// The first response decides the subscription id and the already-exists flag
    /// for the whole request; any later failure fails the request.
    async fn subscribe_request(
        &self,
        request: &Request,
        specs: &[SubscribeSpec],
        cancel: &CancellationToken,
    ) -> Result<SubscribeOutcome, BackendError> {
        let mut first: Option<SubscribeOutcome> = None;

        for spec in specs {
            let outcome = self.backend.subscribe(spec, cancel).await?;
            match spec.season {
                Some(season) => info!(
                    "Subscribed {} season {}{}",
                    request.title,
                    season,
                    if outcome.already_exists { " (already exists)" } else { "" }
                ),
                None => info!(
                    "Subscribed {}{}",
                    request.title,
                    if outcome.already_exists { " (already exists)" } else { "" }
                ),
            }
            if first.is_none() {
                first = Some(outcome);
            }
        }

        first.ok_or_else(|| BackendError::Rejected("nothing to subscribe".to_string()))
    }

    fn record_success(&self, request: &Request, outcome: &SubscribeOutcome) -> Result<()> {
        let id = request.source_request_id.as_str();
        let subscription_id = outcome.subscription_id.clone().unwrap_or_default();
        // The request status is what keeps a later pass from subscribing again,
        // so it goes first and the remaining writes are best-effort.
        self.ledger
            .update_request_status(id, SyncStatus::Synced)
            .context("Failed to mark request synced")?;
        if let Err(e) = self
            .ledger
            .save_link(&SubscriptionLink::synced(id, subscription_id.clone()))
        {
            error!("Failed to save subscription link for {}: {:#}", id, e);
        }

        let now = chrono::Utc::now().timestamp();
        let tracking = TrackingRecord::for_subscription(request, outcome.already_exists, now);
        if let Err(e) = self.ledger.save_tracking(&tracking) {
            warn!("Failed to save tracking record for {}: {}", id, e);
        }

        let event = DownloadEvent::new(id, EventKind::Subscribed).with_data(json!({
            "tmdb_id": request.tmdb_id,
            "title": request.title,
            "subscription_id": subscription_id,
            "already_exists": outcome.already_exists,
        }));
        if let Err(e) = self.ledger.append_event(&event) {
            warn!("Failed to append subscribed event for {}: {}", id, e);
        }

        let poster = request.poster_path.as_deref();
        self.notifier.notify(if outcome.already_exists {
            Notification::already_exists(&request.title, request.media_kind, request.tmdb_id, poster)
        } else {
            Notification::subscribed(&request.title, request.media_kind, request.tmdb_id, poster)
        });
        Ok(())
    }

    fn record_failure(&self, request: &Request, reason: &str) -> Result<()> {
        let id = request.source_request_id.as_str();
        warn!("Subscription failed for {} ({}): {}", request.title, id, reason);

        self.ledger
            .save_link(&SubscriptionLink::failed(id, reason.to_string()))
            .context("Failed to save subscription link")?;
        self.ledger
            .update_request_status(id, SyncStatus::Failed)
            .context("Failed to mark request failed")?;
        self.notifier
            .notify(Notification::failed(&request.title, reason));
        Ok(())
    }
}

fn build_request(
    source_request_id: String,
    kind: MediaKind,
    tmdb_id: i64,
    title: String,
    source_request: &SourceRequest,
) -> Request {
    let mut request = Request::new(source_request_id, kind, tmdb_id, title);
    if let Some(requested_at) = source_request.requested_at() {
        request = request.with_requested_at(requested_at);
    }
    if kind == MediaKind::Tv {
        request = request.with_seasons(source_request.seasons.iter().map(|s| s.season_number));
        for season in &source_request.seasons {
            let episodes: Vec<i32> = season.episodes.iter().map(|e| e.episode_number).collect();
            request = request.with_episodes(season.season_number, episodes);
        }
    }
    request
}

/// Subscribe call bodies for a request, in season order.
///
/// A show without requested seasons is subscribed as a whole. Specials are never
/// subscribed. In episode mode only seasons with an explicit episode list get a
/// call. An empty result means the request names nothing that can be subscribed.
pub fn subscribe_specs(request: &Request, tv_mode: TvMode) -> Vec<SubscribeSpec> {
    match request.media_kind {
        MediaKind::Movie => vec![SubscribeSpec::movie(&request.title, request.tmdb_id)],
        MediaKind::Tv if request.seasons.is_empty() => {
            let mut spec = SubscribeSpec::tv_season(&request.title, request.tmdb_id, 0);
            spec.season = None;
            vec![spec]
        }
        MediaKind::Tv => {
            let regular = request.seasons.iter().copied().filter(|&season| season > 0);
            match tv_mode {
                TvMode::Season => regular
                    .map(|season| SubscribeSpec::tv_season(&request.title, request.tmdb_id, season))
                    .collect(),
                TvMode::Episode => regular
                    .filter_map(|season| {
                        let episodes = request.episodes.get(&season)?;
                        Some(
                            SubscribeSpec::tv_season(&request.title, request.tmdb_id, season)
                                .with_episodes(episodes.clone()),
                        )
                    })
                    .collect(),
            }
        }
    }
}
