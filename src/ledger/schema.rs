//! Database schema for the ledger (syncer.db).
//!
//! Version 0 holds requests, subscription links, tracking records and the
//! event log. Version 1 adds the daily report table and the poster column on
//! tracking records.

use crate::sqlite_column;
use crate::sqlite_persistence::{Column, SqlType, Table, VersionedSchema, DEFAULT_TIMESTAMP};
use anyhow::Result;
use rusqlite::Connection;

// =============================================================================
// Requests
// =============================================================================

const REQUESTS_TABLE_V0: Table = Table {
    name: "requests",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!(
            "source_request_id",
            &SqlType::Text,
            non_null = true,
            is_unique = true
        ),
        sqlite_column!("media_kind", &SqlType::Text, non_null = true),
        sqlite_column!("tmdb_id", &SqlType::Integer, non_null = true),
        sqlite_column!("title", &SqlType::Text, non_null = true),
        sqlite_column!("poster_path", &SqlType::Text),
        // JSON array of season numbers
        sqlite_column!("seasons", &SqlType::Text, default_value = Some("'[]'")),
        // JSON object season -> [episodes]
        sqlite_column!("episodes", &SqlType::Text, default_value = Some("'{}'")),
        sqlite_column!("status", &SqlType::Text, non_null = true),
        sqlite_column!("requested_at", &SqlType::Integer, non_null = true),
        sqlite_column!(
            "created_at",
            &SqlType::Integer,
            non_null = true,
            default_value = Some(DEFAULT_TIMESTAMP)
        ),
        sqlite_column!("updated_at", &SqlType::Integer, non_null = true),
    ],
    indices: &[
        ("idx_requests_status", "status, requested_at"),
        ("idx_requests_tmdb", "tmdb_id, media_kind"),
    ],
};

// =============================================================================
// Subscription links
// =============================================================================

const SUBSCRIPTION_LINKS_TABLE_V0: Table = Table {
    name: "subscription_links",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!(
            "source_request_id",
            &SqlType::Text,
            non_null = true,
            is_unique = true
        ),
        sqlite_column!("backend_subscription_id", &SqlType::Text),
        sqlite_column!("state", &SqlType::Text, non_null = true),
        sqlite_column!("last_error", &SqlType::Text),
        sqlite_column!("retry_count", &SqlType::Integer, default_value = Some("0")),
        sqlite_column!("created_at", &SqlType::Integer, non_null = true),
        sqlite_column!("updated_at", &SqlType::Integer, non_null = true),
    ],
    indices: &[("idx_links_state", "state")],
};

// =============================================================================
// Tracking records
// =============================================================================

const TRACKING_RECORDS_TABLE_V0: Table = Table {
    name: "tracking_records",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!(
            "source_request_id",
            &SqlType::Text,
            non_null = true,
            is_unique = true
        ),
        sqlite_column!("tmdb_id", &SqlType::Integer, non_null = true),
        sqlite_column!("title", &SqlType::Text, non_null = true),
        sqlite_column!("media_kind", &SqlType::Text, non_null = true),
        sqlite_column!("status", &SqlType::Text, non_null = true),
        sqlite_column!("subscribe_time", &SqlType::Integer),
        sqlite_column!("download_start_time", &SqlType::Integer),
        sqlite_column!("download_finish_time", &SqlType::Integer),
        sqlite_column!("transfer_time", &SqlType::Integer),
        sqlite_column!("retry_count", &SqlType::Integer, default_value = Some("0")),
        sqlite_column!("last_retry_time", &SqlType::Integer),
        sqlite_column!("error_message", &SqlType::Text),
        sqlite_column!("created_at", &SqlType::Integer, non_null = true),
        sqlite_column!("updated_at", &SqlType::Integer, non_null = true),
    ],
    indices: &[
        ("idx_tracking_status", "status"),
        ("idx_tracking_tmdb", "tmdb_id, media_kind"),
    ],
};

/// Version 1 appends `poster_path` so notifications can carry artwork.
const TRACKING_RECORDS_TABLE_V1: Table = Table {
    name: "tracking_records",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!(
            "source_request_id",
            &SqlType::Text,
            non_null = true,
            is_unique = true
        ),
        sqlite_column!("tmdb_id", &SqlType::Integer, non_null = true),
        sqlite_column!("title", &SqlType::Text, non_null = true),
        sqlite_column!("media_kind", &SqlType::Text, non_null = true),
        sqlite_column!("status", &SqlType::Text, non_null = true),
        sqlite_column!("subscribe_time", &SqlType::Integer),
        sqlite_column!("download_start_time", &SqlType::Integer),
        sqlite_column!("download_finish_time", &SqlType::Integer),
        sqlite_column!("transfer_time", &SqlType::Integer),
        sqlite_column!("retry_count", &SqlType::Integer, default_value = Some("0")),
        sqlite_column!("last_retry_time", &SqlType::Integer),
        sqlite_column!("error_message", &SqlType::Text),
        sqlite_column!("created_at", &SqlType::Integer, non_null = true),
        sqlite_column!("updated_at", &SqlType::Integer, non_null = true),
        sqlite_column!("poster_path", &SqlType::Text),
    ],
    indices: &[
        ("idx_tracking_status", "status"),
        ("idx_tracking_tmdb", "tmdb_id, media_kind"),
    ],
};

// =============================================================================
// Download events (append-only)
// =============================================================================

const DOWNLOAD_EVENTS_TABLE_V0: Table = Table {
    name: "download_events",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("source_request_id", &SqlType::Text, non_null = true),
        sqlite_column!("event_kind", &SqlType::Text, non_null = true),
        sqlite_column!("event_data", &SqlType::Text),
        sqlite_column!("created_at", &SqlType::Integer, non_null = true),
    ],
    indices: &[("idx_events_request", "source_request_id, created_at")],
};

// =============================================================================
// Daily reports
// =============================================================================

const DAILY_REPORTS_TABLE_V1: Table = Table {
    name: "daily_reports",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!(
            "report_date",
            &SqlType::Text,
            non_null = true,
            is_unique = true
        ),
        sqlite_column!("total_subscribed", &SqlType::Integer, default_value = Some("0")),
        sqlite_column!("total_downloaded", &SqlType::Integer, default_value = Some("0")),
        sqlite_column!("total_transferred", &SqlType::Integer, default_value = Some("0")),
        sqlite_column!("total_failed", &SqlType::Integer, default_value = Some("0")),
        sqlite_column!("report_content", &SqlType::Text),
        sqlite_column!("created_at", &SqlType::Integer, non_null = true),
    ],
    indices: &[],
};

fn migrate_v0_to_v1(conn: &Connection) -> Result<()> {
    TRACKING_RECORDS_TABLE_V1.add_column(conn, "poster_path")?;
    DAILY_REPORTS_TABLE_V1.create(conn)?;
    Ok(())
}

pub const LEDGER_VERSIONED_SCHEMAS: &[VersionedSchema] = &[
    VersionedSchema {
        version: 0,
        tables: &[
            REQUESTS_TABLE_V0,
            SUBSCRIPTION_LINKS_TABLE_V0,
            TRACKING_RECORDS_TABLE_V0,
            DOWNLOAD_EVENTS_TABLE_V0,
        ],
        migration: None,
    },
    VersionedSchema {
        version: 1,
        tables: &[
            REQUESTS_TABLE_V0,
            SUBSCRIPTION_LINKS_TABLE_V0,
            TRACKING_RECORDS_TABLE_V1,
            DOWNLOAD_EVENTS_TABLE_V0,
            DAILY_REPORTS_TABLE_V1,
        ],
        migration: Some(migrate_v0_to_v1),
    },
];
