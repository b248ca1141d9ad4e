//! Download lifecycle tracking.
//!
//! The reconciler polls the backend's histories and owns all tracking-state
//! changes. The push listener relays the backend's live messages as
//! notifications.

mod push_listener;
mod reconciler;

pub use push_listener::{
    extract_media_title, notification_for, parse_push_payload, PushListener, PushMessage,
    SseParser,
};
pub use reconciler::{ReconcileReport, TrackingReconciler, Transition};
