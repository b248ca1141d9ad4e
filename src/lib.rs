//! Request Syncer Library
//!
//! Mirrors approved media requests into subscriptions on an acquisition backend
//! and follows each subscription until it lands in the library.

pub mod backend;
pub mod config;
pub mod ledger;
pub mod notifications;
pub mod report;
pub mod request_source;
pub mod sqlite_persistence;
pub mod sync;
pub mod tracker;

// Re-export commonly used types for convenience
pub use backend::{AcquisitionBackend, BackendClient, BackendError};
pub use config::AppConfig;
pub use ledger::{LedgerStore, SqliteLedgerStore};
pub use notifications::NotificationDispatcher;
