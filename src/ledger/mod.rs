//! Local ledger.
//!
//! Persistent record of every upstream request, the backend subscription created
//! for it, its lifecycle tracking record and an append-only event log.

mod models;
mod schema;
mod store;

pub use models::{
    DailyReport, DownloadEvent, EventKind, LedgerStats, MediaKind, Request, SubscriptionLink,
    SyncStatus, TrackingRecord, TrackingStats, TrackingStatus,
};
pub use store::{LedgerStore, SqliteLedgerStore};
