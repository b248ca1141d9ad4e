use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate, NaiveDateTime, NaiveTime};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::ledger::{DailyReport, LedgerStats, LedgerStore, TrackingStats};
use crate::notifications::{Notification, NotificationDispatcher};

/// Snapshot the ledger into a report for `date`. Does not persist it.
pub fn build_daily_report(
    ledger: &dyn LedgerStore,
    date: NaiveDate,
    now: i64,
) -> Result<DailyReport> {
    let tracking = ledger
        .get_tracking_stats()
        .context("Failed to read tracking stats")?;
    let requests = ledger.get_stats().context("Failed to read request stats")?;

    Ok(DailyReport {
        id: 0,
        report_date: date.format("%Y-%m-%d").to_string(),
        total_subscribed: tracking.subscribed,
        total_downloaded: tracking.downloading + tracking.downloaded,
        total_transferred: tracking.transferred,
        total_failed: tracking.failed,
        content: render_content(date, &tracking, &requests),
        created_at: now,
    })
}

fn render_content(date: NaiveDate, tracking: &TrackingStats, requests: &LedgerStats) -> String {
    let mut lines = vec![format!("📅 日期: {}", date.format("%Y-%m-%d")), String::new()];
    lines.push("📥 订阅跟踪".to_string());
    lines.push(format!("  已订阅: {}", tracking.subscribed));
    lines.push(format!("  下载中: {}", tracking.downloading + tracking.downloaded));
    lines.push(format!("  已入库: {}", tracking.transferred));
    lines.push(format!("  失败: {}", tracking.failed));
    lines.push(String::new());
    lines.push("📋 请求同步".to_string());
    lines.push(format!("  总数: {}", requests.total));
    lines.push(format!("  待处理: {}", requests.pending));
    lines.push(format!("  已同步: {}", requests.synced));
    lines.push(format!("  失败: {}", requests.failed));
    lines.join("\n")
}

/// Time from `now` until the next wall-clock `at`. An `at` equal to `now` is a
/// full day away.
pub fn until_next(now: NaiveDateTime, at: NaiveTime) -> Duration {
    let today = now.date().and_time(at);
    let next = if today > now {
        today
    } else {
        today + chrono::Duration::days(1)
    };
    (next - now).to_std().unwrap_or_default()
}

pub struct DailyReporter {
    ledger: Arc<dyn LedgerStore>,
    notifier: NotificationDispatcher,
    at: NaiveTime,
}

impl DailyReporter {
    pub fn new(ledger: Arc<dyn LedgerStore>, notifier: NotificationDispatcher, at: NaiveTime) -> Self {
        Self {
            ledger,
            notifier,
            at,
        }
    }

    /// Build, persist and send the report for `date`.
    pub fn publish(&self, date: NaiveDate) -> Result<DailyReport> {
        let report = build_daily_report(
            self.ledger.as_ref(),
            date,
            chrono::Utc::now().timestamp(),
        )?;
        self.ledger
            .save_report(&report)
            .context("Failed to save daily report")?;
        self.notifier
            .notify(Notification::daily_report(&report.content));
        Ok(report)
    }

    pub async fn run(&self, shutdown: CancellationToken) {
        info!("Daily report scheduled at {}", self.at.format("%H:%M"));

        loop {
            let wait = until_next(Local::now().naive_local(), self.at);
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = shutdown.cancelled() => {
                    info!("Daily report scheduler shutting down");
                    break;
                }
            }

            match self.publish(Local::now().date_naive()) {
                Ok(report) => info!(
                    "Daily report {}: {} subscribed, {} downloading, {} transferred, {} failed",
                    report.report_date,
                    report.total_subscribed,
                    report.total_downloaded,
                    report.total_transferred,
                    report.total_failed
                ),
                Err(e) => error!("Daily report failed: {:#}", e),
            }
        }

        info!("Daily report scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{MediaKind, Request, SqliteLedgerStore, TrackingRecord, TrackingStatus};

    fn at(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 10).unwrap()
    }

    #[test]
    fn test_until_next_later_today() {
        let now = day().and_time(at(8, 30));
        assert_eq!(until_next(now, at(9, 0)), Duration::from_secs(30 * 60));
    }

    #[test]
    fn test_until_next_rolls_to_tomorrow() {
        let now = day().and_time(at(9, 0));
        assert_eq!(until_next(now, at(9, 0)), Duration::from_secs(24 * 3600));
        let now = day().and_time(at(23, 0));
        assert_eq!(until_next(now, at(1, 0)), Duration::from_secs(2 * 3600));
    }

    #[test]
    fn test_publish_persists_one_row_per_date() {
        let ledger = Arc::new(SqliteLedgerStore::in_memory().unwrap());
        for (id, status) in [
            ("1", TrackingStatus::Subscribed),
            ("2", TrackingStatus::Downloading),
            ("3", TrackingStatus::Transferred),
            ("4", TrackingStatus::Transferred),
        ] {
            let request = Request::new(id, MediaKind::Movie, 600 + id.parse::<i64>().unwrap(), "Film");
            ledger.upsert_request(&request).unwrap();
            let mut record = TrackingRecord::for_subscription(&request, false, 1);
            record.status = status;
            ledger.save_tracking(&record).unwrap();
        }
        let reporter = DailyReporter::new(
            ledger.clone(),
            NotificationDispatcher::disabled(),
            at(9, 0),
        );

        let report = reporter.publish(day()).unwrap();
        assert_eq!(report.report_date, "2024-03-10");
        assert_eq!(report.total_subscribed, 1);
        assert_eq!(report.total_downloaded, 1);
        assert_eq!(report.total_transferred, 2);
        assert!(report.content.contains("已入库: 2"));
        assert!(report.content.contains("总数: 4"));

        reporter.publish(day()).unwrap();
        assert_eq!(ledger.list_recent_reports(10).unwrap().len(), 1);
        assert!(ledger.get_report("2024-03-10").unwrap().is_some());
    }
}
