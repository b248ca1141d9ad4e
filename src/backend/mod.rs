//! Acquisition backend client.
//!
//! Subscribes media on the backend and reads its download/transfer history.
//! Calls are rate limited, authenticated with a cached token and, for
//! subscriptions, retried with exponential backoff.

mod client;
mod error;
mod models;
mod retry_policy;
mod throttle;
mod token;

#[cfg(feature = "mock")]
pub use client::MockAcquisitionBackend;
pub use client::{AcquisitionBackend, AuthScheme, BackendClient};
pub use error::BackendError;
pub use models::{
    is_already_exists, HistoryEntry, MediaSearchResult, SubscribeOutcome, SubscribeSpec,
    ALREADY_EXISTS_KEYWORDS, DRY_RUN_SUBSCRIPTION_ID,
};
pub use retry_policy::RetryPolicy;
pub use throttle::{RequestThrottler, ThrottleStats, ThrottlerConfig};
pub use token::TokenManager;
