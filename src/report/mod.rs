//! Daily summary of the ledger, persisted and sent as a notification.

mod daily;

pub use daily::{build_daily_report, until_next, DailyReporter};
