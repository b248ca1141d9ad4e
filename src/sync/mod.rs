//! Request synchronization.
//!
//! `pipeline` turns approved upstream requests into backend subscriptions;
//! `retry_sweep` periodically re-queues failed ones.

mod pipeline;
mod retry_sweep;

pub use pipeline::{
    sanitize_error, subscribe_specs, PipelineSettings, RequestOutcome, SyncPipeline, SyncReport,
    MAX_ERROR_CHARS,
};
pub use retry_sweep::RetrySweeper;
