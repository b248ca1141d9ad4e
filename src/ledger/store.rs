//! Ledger storage and persistence.
//!
//! SQLite-backed storage for requests, subscription links, tracking records,
//! the download event log and daily reports. Every mutation touches a single row
//! keyed by `source_request_id`; state transitions that may race are expressed as
//! conditional updates so that only one writer wins.

use super::models::*;
use super::schema::LEDGER_VERSIONED_SCHEMAS;
use crate::sqlite_persistence::open_versioned;
use anyhow::{Context, Result};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Trait for ledger storage operations.
pub trait LedgerStore: Send + Sync {
    // === Requests ===

    /// Insert a request or refresh its descriptive fields.
    ///
    /// The sync status of an existing row is never overwritten, so re-upserting an
    /// upstream request on every pass cannot undo progress.
    fn upsert_request(&self, request: &Request) -> Result<()>;

    fn get_request(&self, source_request_id: &str) -> Result<Option<Request>>;

    /// Requests in any of `statuses`, oldest `requested_at` first.
    fn list_requests_by_status(
        &self,
        statuses: &[SyncStatus],
        limit: usize,
    ) -> Result<Vec<Request>>;

    /// Most recently created requests first.
    fn list_requests(&self, limit: usize) -> Result<Vec<Request>>;

    /// Unconditionally set a request's status.
    fn update_request_status(&self, source_request_id: &str, status: SyncStatus) -> Result<()>;

    /// Atomically move a request from one of `from` to `to`.
    /// Returns false if the request was not in any of the expected states.
    fn transition_request(
        &self,
        source_request_id: &str,
        from: &[SyncStatus],
        to: SyncStatus,
    ) -> Result<bool>;

    /// Move requests left in `processing` by an interrupted pass back to pending.
    /// Returns the number of recovered requests.
    fn requeue_interrupted(&self) -> Result<usize>;

    fn get_stats(&self) -> Result<LedgerStats>;

    // === Subscription links ===

    /// Insert or replace the link for a request. The retry count of an existing
    /// row is preserved.
    fn save_link(&self, link: &SubscriptionLink) -> Result<()>;

    fn get_link(&self, source_request_id: &str) -> Result<Option<SubscriptionLink>>;

    fn list_links_by_state(
        &self,
        states: &[SyncStatus],
        limit: usize,
    ) -> Result<Vec<SubscriptionLink>>;

    fn list_links(&self, limit: usize) -> Result<Vec<SubscriptionLink>>;

    /// Mark a failed link as retrying and bump its retry count.
    /// Returns false if the link was not in `failed` state.
    fn mark_link_retrying(&self, source_request_id: &str) -> Result<bool>;

    // === Tracking records ===

    /// Insert or replace a tracking record.
    fn save_tracking(&self, record: &TrackingRecord) -> Result<()>;

    fn get_tracking(&self, source_request_id: &str) -> Result<Option<TrackingRecord>>;

    fn list_tracking_by_status(
        &self,
        statuses: &[TrackingStatus],
        limit: usize,
    ) -> Result<Vec<TrackingRecord>>;

    /// Atomically advance a tracking record from one of `from` to `to`, stamping the
    /// timestamp column that belongs to `to`.
    /// Returns false if the record was no longer in any of the expected states.
    fn advance_tracking(
        &self,
        source_request_id: &str,
        from: &[TrackingStatus],
        to: TrackingStatus,
        at: i64,
    ) -> Result<bool>;

    /// Atomically move a non-terminal tracking record to `failed`.
    fn fail_tracking(&self, source_request_id: &str, error: &str, at: i64) -> Result<bool>;

    fn get_tracking_stats(&self) -> Result<TrackingStats>;

    // === Events ===

    /// Append an event. Returns the new event id.
    fn append_event(&self, event: &DownloadEvent) -> Result<i64>;

    /// Most recent events first, optionally for a single request.
    fn list_events(
        &self,
        source_request_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<DownloadEvent>>;

    // === Daily reports ===

    /// Insert or replace the report for its date.
    fn save_report(&self, report: &DailyReport) -> Result<()>;

    fn get_report(&self, report_date: &str) -> Result<Option<DailyReport>>;

    fn list_recent_reports(&self, limit: usize) -> Result<Vec<DailyReport>>;
}

/// SQLite-backed ledger.
pub struct SqliteLedgerStore {
    conn: Arc<Mutex<Connection>>,
}

fn placeholders(count: usize, offset: usize) -> String {
    (0..count)
        .map(|i| format!("?{}", i + offset + 1))
        .collect::<Vec<_>>()
        .join(", ")
}

impl SqliteLedgerStore {
    /// Opens the ledger at `db_path`, creating or migrating it as needed.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = open_versioned(db_path.as_ref(), LEDGER_VERSIONED_SCHEMAS, "ledger")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory ledger (tests and dry runs).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        LEDGER_VERSIONED_SCHEMAS
            .last()
            .context("No schemas defined")?
            .create(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn row_to_request(row: &rusqlite::Row) -> rusqlite::Result<Request> {
        let seasons: Vec<i32> = row
            .get::<_, Option<String>>("seasons")?
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default();
        let episodes: BTreeMap<i32, Vec<i32>> = row
            .get::<_, Option<String>>("episodes")?
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default();

        Ok(Request {
            id: row.get("id")?,
            source_request_id: row.get("source_request_id")?,
            media_kind: MediaKind::from_str(&row.get::<_, String>("media_kind")?)
                .unwrap_or(MediaKind::Movie),
            tmdb_id: row.get("tmdb_id")?,
            title: row.get("title")?,
            poster_path: row.get("poster_path")?,
            seasons,
            episodes,
            status: SyncStatus::from_str(&row.get::<_, String>("status")?)
                .unwrap_or(SyncStatus::Pending),
            requested_at: row.get("requested_at")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }

    fn row_to_link(row: &rusqlite::Row) -> rusqlite::Result<SubscriptionLink> {
        Ok(SubscriptionLink {
            id: row.get("id")?,
            source_request_id: row.get("source_request_id")?,
            backend_subscription_id: row
                .get::<_, Option<String>>("backend_subscription_id")?
                .unwrap_or_default(),
            state: SyncStatus::from_str(&row.get::<_, String>("state")?)
                .unwrap_or(SyncStatus::Failed),
            last_error: row.get("last_error")?,
            retry_count: row.get("retry_count")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }

    fn row_to_tracking(row: &rusqlite::Row) -> rusqlite::Result<TrackingRecord> {
        Ok(TrackingRecord {
            id: row.get("id")?,
            source_request_id: row.get("source_request_id")?,
            tmdb_id: row.get("tmdb_id")?,
            title: row.get("title")?,
            media_kind: MediaKind::from_str(&row.get::<_, String>("media_kind")?)
                .unwrap_or(MediaKind::Movie),
            status: TrackingStatus::from_str(&row.get::<_, String>("status")?)
                .unwrap_or(TrackingStatus::Pending),
            subscribe_time: row.get("subscribe_time")?,
            download_start_time: row.get("download_start_time")?,
            download_finish_time: row.get("download_finish_time")?,
            transfer_time: row.get("transfer_time")?,
            retry_count: row.get("retry_count")?,
            last_retry_time: row.get("last_retry_time")?,
            error_message: row.get("error_message")?,
            poster_path: row.get("poster_path")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }

    fn row_to_event(row: &rusqlite::Row) -> rusqlite::Result<DownloadEvent> {
        Ok(DownloadEvent {
            id: row.get("id")?,
            source_request_id: row.get("source_request_id")?,
            kind: EventKind::from_str(&row.get::<_, String>("event_kind")?)
                .unwrap_or(EventKind::Failed),
            data: row
                .get::<_, Option<String>>("event_data")?
                .unwrap_or_default(),
            created_at: row.get("created_at")?,
        })
    }

    fn row_to_report(row: &rusqlite::Row) -> rusqlite::Result<DailyReport> {
        Ok(DailyReport {
            id: row.get("id")?,
            report_date: row.get("report_date")?,
            total_subscribed: row.get::<_, i64>("total_subscribed")? as usize,
            total_downloaded: row.get::<_, i64>("total_downloaded")? as usize,
            total_transferred: row.get::<_, i64>("total_transferred")? as usize,
            total_failed: row.get::<_, i64>("total_failed")? as usize,
            content: row
                .get::<_, Option<String>>("report_content")?
                .unwrap_or_default(),
            created_at: row.get("created_at")?,
        })
    }
}

impl LedgerStore for SqliteLedgerStore {
    // ==================== Requests ====================

    fn upsert_request(&self, request: &Request) -> Result<()> {
        let seasons = serde_json::to_string(&request.seasons)?;
        let episodes = serde_json::to_string(&request.episodes)?;
        let now = chrono::Utc::now().timestamp();

        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO requests (
                source_request_id, media_kind, tmdb_id, title, poster_path,
                seasons, episodes, status, requested_at, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)
            ON CONFLICT(source_request_id) DO UPDATE SET
                media_kind = excluded.media_kind,
                tmdb_id = excluded.tmdb_id,
                title = excluded.title,
                poster_path = COALESCE(excluded.poster_path, requests.poster_path),
                seasons = excluded.seasons,
                episodes = excluded.episodes,
                requested_at = excluded.requested_at,
                updated_at = excluded.updated_at
            "#,
            params![
                request.source_request_id,
                request.media_kind.as_str(),
                request.tmdb_id,
                request.title,
                request.poster_path,
                seasons,
                episodes,
                request.status.as_str(),
                request.requested_at,
                now,
            ],
        )?;
        Ok(())
    }

    fn get_request(&self, source_request_id: &str) -> Result<Option<Request>> {
        let conn = self.conn.lock().unwrap();
        let request = conn
            .query_row(
                "SELECT * FROM requests WHERE source_request_id = ?1",
                params![source_request_id],
                Self::row_to_request,
            )
            .optional()?;
        Ok(request)
    }

    fn list_requests_by_status(
        &self,
        statuses: &[SyncStatus],
        limit: usize,
    ) -> Result<Vec<Request>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT * FROM requests WHERE status IN ({}) ORDER BY requested_at ASC, id ASC LIMIT {}",
            placeholders(statuses.len(), 0),
            limit
        );
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&sql)?;
        let requests = stmt
            .query_map(
                params_from_iter(statuses.iter().map(|s| s.as_str())),
                Self::row_to_request,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(requests)
    }

    fn list_requests(&self, limit: usize) -> Result<Vec<Request>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT * FROM requests ORDER BY id DESC LIMIT ?1")?;
        let requests = stmt
            .query_map(params![limit as i64], Self::row_to_request)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(requests)
    }

    fn update_request_status(&self, source_request_id: &str, status: SyncStatus) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE requests SET status = ?1, updated_at = ?2 WHERE source_request_id = ?3",
            params![
                status.as_str(),
                chrono::Utc::now().timestamp(),
                source_request_id
            ],
        )?;
        Ok(())
    }

    fn transition_request(
        &self,
        source_request_id: &str,
        from: &[SyncStatus],
        to: SyncStatus,
    ) -> Result<bool> {
        if from.is_empty() {
            return Ok(false);
        }
        let sql = format!(
            "UPDATE requests SET status = ?1, updated_at = ?2
             WHERE source_request_id = ?3 AND status IN ({})",
            placeholders(from.len(), 3)
        );
        let now = chrono::Utc::now().timestamp();
        let mut values: Vec<rusqlite::types::Value> = vec![
            to.as_str().to_string().into(),
            now.into(),
            source_request_id.to_string().into(),
        ];
        values.extend(from.iter().map(|s| s.as_str().to_string().into()));

        let conn = self.conn.lock().unwrap();
        let rows = conn.execute(&sql, params_from_iter(values))?;
        Ok(rows > 0)
    }

    fn requeue_interrupted(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let rows = conn.execute(
            "UPDATE requests SET status = ?1, updated_at = ?2 WHERE status = ?3",
            params![
                SyncStatus::Pending.as_str(),
                chrono::Utc::now().timestamp(),
                SyncStatus::Processing.as_str()
            ],
        )?;
        Ok(rows)
    }

    fn get_stats(&self) -> Result<LedgerStats> {
        let conn = self.conn.lock().unwrap();
        let stats = conn.query_row(
            r#"
            SELECT
                COUNT(*),
                COALESCE(SUM(CASE WHEN status IN ('pending', 'retrying') THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN status = 'synced' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END), 0)
            FROM requests
            "#,
            [],
            |row| {
                Ok(LedgerStats {
                    total: row.get::<_, i64>(0)? as usize,
                    pending: row.get::<_, i64>(1)? as usize,
                    synced: row.get::<_, i64>(2)? as usize,
                    failed: row.get::<_, i64>(3)? as usize,
                })
            },
        )?;
        Ok(stats)
    }

    // ==================== Subscription links ====================

    fn save_link(&self, link: &SubscriptionLink) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO subscription_links (
                source_request_id, backend_subscription_id, state, last_error,
                retry_count, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
            ON CONFLICT(source_request_id) DO UPDATE SET
                backend_subscription_id = excluded.backend_subscription_id,
                state = excluded.state,
                last_error = excluded.last_error,
                updated_at = excluded.updated_at
            "#,
            params![
                link.source_request_id,
                link.backend_subscription_id,
                link.state.as_str(),
                link.last_error,
                link.retry_count,
                now,
            ],
        )?;
        Ok(())
    }

    fn get_link(&self, source_request_id: &str) -> Result<Option<SubscriptionLink>> {
        let conn = self.conn.lock().unwrap();
        let link = conn
            .query_row(
                "SELECT * FROM subscription_links WHERE source_request_id = ?1",
                params![source_request_id],
                Self::row_to_link,
            )
            .optional()?;
        Ok(link)
    }

    fn list_links_by_state(
        &self,
        states: &[SyncStatus],
        limit: usize,
    ) -> Result<Vec<SubscriptionLink>> {
        if states.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT * FROM subscription_links WHERE state IN ({}) ORDER BY updated_at ASC LIMIT {}",
            placeholders(states.len(), 0),
            limit
        );
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&sql)?;
        let links = stmt
            .query_map(
                params_from_iter(states.iter().map(|s| s.as_str())),
                Self::row_to_link,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(links)
    }

    fn list_links(&self, limit: usize) -> Result<Vec<SubscriptionLink>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT * FROM subscription_links ORDER BY id DESC LIMIT ?1")?;
        let links = stmt
            .query_map(params![limit as i64], Self::row_to_link)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(links)
    }

    fn mark_link_retrying(&self, source_request_id: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let rows = conn.execute(
            r#"
            UPDATE subscription_links
            SET state = ?1, retry_count = retry_count + 1, updated_at = ?2
            WHERE source_request_id = ?3 AND state = ?4
            "#,
            params![
                SyncStatus::Retrying.as_str(),
                chrono::Utc::now().timestamp(),
                source_request_id,
                SyncStatus::Failed.as_str()
            ],
        )?;
        Ok(rows > 0)
    }

    // ==================== Tracking records ====================

    fn save_tracking(&self, record: &TrackingRecord) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO tracking_records (
                source_request_id, tmdb_id, title, media_kind, status,
                subscribe_time, download_start_time, download_finish_time, transfer_time,
                retry_count, last_retry_time, error_message, created_at, updated_at, poster_path
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            ON CONFLICT(source_request_id) DO UPDATE SET
                tmdb_id = excluded.tmdb_id,
                title = excluded.title,
                media_kind = excluded.media_kind,
                status = excluded.status,
                subscribe_time = excluded.subscribe_time,
                download_start_time = excluded.download_start_time,
                download_finish_time = excluded.download_finish_time,
                transfer_time = excluded.transfer_time,
                retry_count = excluded.retry_count,
                last_retry_time = excluded.last_retry_time,
                error_message = excluded.error_message,
                updated_at = excluded.updated_at,
                poster_path = COALESCE(excluded.poster_path, tracking_records.poster_path)
            "#,
            params![
                record.source_request_id,
                record.tmdb_id,
                record.title,
                record.media_kind.as_str(),
                record.status.as_str(),
                record.subscribe_time,
                record.download_start_time,
                record.download_finish_time,
                record.transfer_time,
                record.retry_count,
                record.last_retry_time,
                record.error_message,
                record.created_at,
                record.updated_at,
                record.poster_path,
            ],
        )?;
        Ok(())
    }

    fn get_tracking(&self, source_request_id: &str) -> Result<Option<TrackingRecord>> {
        let conn = self.conn.lock().unwrap();
        let record = conn
            .query_row(
                "SELECT * FROM tracking_records WHERE source_request_id = ?1",
                params![source_request_id],
                Self::row_to_tracking,
            )
            .optional()?;
        Ok(record)
    }

    fn list_tracking_by_status(
        &self,
        statuses: &[TrackingStatus],
        limit: usize,
    ) -> Result<Vec<TrackingRecord>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT * FROM tracking_records WHERE status IN ({}) ORDER BY updated_at ASC, id ASC LIMIT {}",
            placeholders(statuses.len(), 0),
            limit
        );
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&sql)?;
        let records = stmt
            .query_map(
                params_from_iter(statuses.iter().map(|s| s.as_str())),
                Self::row_to_tracking,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    fn advance_tracking(
        &self,
        source_request_id: &str,
        from: &[TrackingStatus],
        to: TrackingStatus,
        at: i64,
    ) -> Result<bool> {
        if from.is_empty() {
            return Ok(false);
        }
        let stamp = match to {
            TrackingStatus::Subscribed => ", subscribe_time = ?2",
            TrackingStatus::Downloading => ", download_start_time = ?2",
            TrackingStatus::Downloaded => ", download_finish_time = ?2",
            TrackingStatus::Transferred => ", transfer_time = ?2",
            _ => "",
        };
        let sql = format!(
            "UPDATE tracking_records SET status = ?1, updated_at = ?2{}
             WHERE source_request_id = ?3 AND status IN ({})",
            stamp,
            placeholders(from.len(), 3)
        );
        let mut values: Vec<rusqlite::types::Value> = vec![
            to.as_str().to_string().into(),
            at.into(),
            source_request_id.to_string().into(),
        ];
        values.extend(from.iter().map(|s| s.as_str().to_string().into()));

        let conn = self.conn.lock().unwrap();
        let rows = conn.execute(&sql, params_from_iter(values))?;
        Ok(rows > 0)
    }

    fn fail_tracking(&self, source_request_id: &str, error: &str, at: i64) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let rows = conn.execute(
            r#"
            UPDATE tracking_records
            SET status = ?1, error_message = ?2, updated_at = ?3
            WHERE source_request_id = ?4 AND status NOT IN (?5, ?1)
            "#,
            params![
                TrackingStatus::Failed.as_str(),
                error,
                at,
                source_request_id,
                TrackingStatus::Transferred.as_str(),
            ],
        )?;
        Ok(rows > 0)
    }

    fn get_tracking_stats(&self) -> Result<TrackingStats> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT status, COUNT(*) FROM tracking_records GROUP BY status")?;
        let mut stats = TrackingStats::default();
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
        })?;
        for row in rows {
            let (status, count) = row?;
            match TrackingStatus::from_str(&status) {
                Some(TrackingStatus::Subscribed) => stats.subscribed += count,
                Some(TrackingStatus::Downloading) => stats.downloading += count,
                Some(TrackingStatus::Downloaded) => stats.downloaded += count,
                Some(TrackingStatus::Transferred) => stats.transferred += count,
                Some(TrackingStatus::Failed) => stats.failed += count,
                _ => {}
            }
        }
        Ok(stats)
    }

    // ==================== Events ====================

    fn append_event(&self, event: &DownloadEvent) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO download_events (source_request_id, event_kind, event_data, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                event.source_request_id,
                event.kind.as_str(),
                event.data,
                event.created_at
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn list_events(
        &self,
        source_request_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<DownloadEvent>> {
        let conn = self.conn.lock().unwrap();
        let events = match source_request_id {
            Some(id) => {
                let mut stmt = conn.prepare(
                    "SELECT * FROM download_events WHERE source_request_id = ?1
                     ORDER BY id DESC LIMIT ?2",
                )?;
                let events = stmt
                    .query_map(params![id, limit as i64], Self::row_to_event)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                events
            }
            None => {
                let mut stmt =
                    conn.prepare("SELECT * FROM download_events ORDER BY id DESC LIMIT ?1")?;
                let events = stmt
                    .query_map(params![limit as i64], Self::row_to_event)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                events
            }
        };
        Ok(events)
    }

    // ==================== Daily reports ====================

    fn save_report(&self, report: &DailyReport) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO daily_reports (
                report_date, total_subscribed, total_downloaded, total_transferred,
                total_failed, report_content, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(report_date) DO UPDATE SET
                total_subscribed = excluded.total_subscribed,
                total_downloaded = excluded.total_downloaded,
                total_transferred = excluded.total_transferred,
                total_failed = excluded.total_failed,
                report_content = excluded.report_content,
                created_at = excluded.created_at
            "#,
            params![
                report.report_date,
                report.total_subscribed as i64,
                report.total_downloaded as i64,
                report.total_transferred as i64,
                report.total_failed as i64,
                report.content,
                report.created_at,
            ],
        )?;
        Ok(())
    }

    fn get_report(&self, report_date: &str) -> Result<Option<DailyReport>> {
        let conn = self.conn.lock().unwrap();
        let report = conn
            .query_row(
                "SELECT * FROM daily_reports WHERE report_date = ?1",
                params![report_date],
                Self::row_to_report,
            )
            .optional()?;
        Ok(report)
    }

    fn list_recent_reports(&self, limit: usize) -> Result<Vec<DailyReport>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT * FROM daily_reports ORDER BY report_date DESC LIMIT ?1")?;
        let reports = stmt
            .query_map(params![limit as i64], Self::row_to_report)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(reports)
    }
}
