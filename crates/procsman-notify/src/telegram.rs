//! Telegram notification transport.

use crate::settings::NotificationsSettings;
use crate::Notifier;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::json;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

/// Sends lifecycle notifications to the configured Telegram chats.
///
/// Every per-chat failure is logged at `warn` and swallowed; the Runner
/// never observes a notifier error.
pub struct TelegramNotifier {
    client: reqwest::Client,
    settings: RwLock<NotificationsSettings>,
    settings_path: PathBuf,
    api_base: String,
}

impl TelegramNotifier {
    pub fn new(settings: NotificationsSettings, settings_path: PathBuf) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .expect("reqwest client with static configuration"),
            settings: RwLock::new(settings),
            settings_path,
            api_base: "https://api.telegram.org".to_string(),
        }
    }

    #[cfg(test)]
    fn with_api_base(mut self, base: String) -> Self {
        self.api_base = base;
        self
    }

    pub fn settings(&self) -> NotificationsSettings {
        self.settings.read().clone()
    }

    /// Replace and persist the settings.
    pub fn update_settings(&self, new: NotificationsSettings) -> std::io::Result<()> {
        new.save(&self.settings_path)?;
        *self.settings.write() = new;
        Ok(())
    }

    async fn send_to_chat(&self, token: &str, chat_id: i64, text: &str) -> Result<(), String> {
        let url = format!("{}/bot{}/sendMessage", self.api_base, token);
        let response = self
            .client
            .post(&url)
            .json(&json!({ "chat_id": chat_id, "text": text }))
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let status = response.status();
        let body: serde_json::Value = response.json().await.map_err(|e| e.to_string())?;
        let ok = body.get("ok").and_then(|v| v.as_bool()).unwrap_or(false);
        if !ok || status.is_client_error() || status.is_server_error() {
            let description = body
                .get("description")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown error");
            return Err(description.to_string());
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, text: &str) {
        let settings = self.settings();
        if !settings.enabled {
            return;
        }
        for chat_id in &settings.telegram_target_chat_ids {
            if let Err(error) = self
                .send_to_chat(&settings.telegram_bot_token, *chat_id, text)
                .await
            {
                warn!(chat_id, %error, "failed to send notification");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_notifier_sends_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let notifier = TelegramNotifier::new(
            NotificationsSettings::default(),
            dir.path().join("notifications.json"),
        )
        // An unroutable base: a send attempt would error loudly in logs,
        // but a disabled notifier must not even try.
        .with_api_base("http://127.0.0.1:1".to_string());

        notifier.send("ignored").await;
    }

    #[tokio::test]
    async fn transport_errors_are_swallowed() {
        let dir = tempfile::tempdir().unwrap();
        let notifier = TelegramNotifier::new(
            NotificationsSettings {
                enabled: true,
                telegram_bot_token: "tok".to_string(),
                telegram_target_chat_ids: vec![42],
            },
            dir.path().join("notifications.json"),
        )
        .with_api_base("http://127.0.0.1:1".to_string());

        // Must complete without panicking or returning an error.
        notifier.send("hello").await;
    }

    #[test]
    fn update_settings_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notifications.json");
        let notifier = TelegramNotifier::new(NotificationsSettings::default(), path.clone());

        notifier
            .update_settings(NotificationsSettings {
                enabled: true,
                telegram_bot_token: "tok".to_string(),
                telegram_target_chat_ids: vec![7],
            })
            .unwrap();

        let reloaded = NotificationsSettings::load_or_create(&path).unwrap();
        assert!(reloaded.enabled);
        assert_eq!(reloaded.telegram_target_chat_ids, vec![7]);
        assert_eq!(notifier.settings(), reloaded);
    }
}
