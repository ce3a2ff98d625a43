//! # procsman-notify
//!
//! Fire-and-forget text notifications for lifecycle events. The
//! supervision core only sees the [`Notifier`] trait; the Telegram
//! transport and its file-backed settings live here.

pub mod settings;
pub mod telegram;

use async_trait::async_trait;

pub use settings::NotificationsSettings;
pub use telegram::TelegramNotifier;

/// Fire-and-forget message sink. Errors never propagate to callers; they
/// are logged by the implementation.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, text: &str);
}

/// Discards every message. Used in tests and when notifications are
/// disabled.
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn send(&self, _text: &str) {}
}
