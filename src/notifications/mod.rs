//! Outbound notifications

mod models;
mod service;

pub use models::{escape_html, poster_url, Notification, NotificationKind, POSTER_BASE_URL};
pub use service::{LogNotifier, Notifier, NotificationDispatcher, TelegramNotifier};
