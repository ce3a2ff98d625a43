//! The event recorder: one journal insert per lifecycle event, with an
//! optional fire-and-forget notification.

use procsman_common::{EffectiveConfiguration, Event, EventKind, ProcessId, StoreResult};
use procsman_notify::Notifier;
use procsman_store::SharedStore;
use std::sync::Arc;

/// Inserts typed lifecycle events and dispatches notifications when the
/// matching `notify_on_*` flag is set. Notification transport runs on its
/// own task; the Runner never waits on it.
#[derive(Clone)]
pub struct EventRecorder {
    store: SharedStore,
    notifier: Arc<dyn Notifier>,
}

impl EventRecorder {
    pub fn new(store: SharedStore, notifier: Arc<dyn Notifier>) -> Self {
        Self { store, notifier }
    }

    pub async fn record(
        &self,
        process_id: ProcessId,
        process_name: &str,
        config: &EffectiveConfiguration,
        kind: EventKind,
        extra: Option<serde_json::Value>,
    ) -> StoreResult<Event> {
        if config.notifies_on(kind) {
            let notifier = Arc::clone(&self.notifier);
            let text = notification_text(kind, process_name);
            tokio::spawn(async move {
                notifier.send(&text).await;
            });
        }
        self.store.insert_event(process_id, kind, extra).await
    }
}

fn notification_text(kind: EventKind, name: &str) -> String {
    match kind {
        EventKind::Start => format!("Process {} has started", name),
        EventKind::Stop => format!("Process {} has stopped", name),
        EventKind::Crash => format!("Process {} has crashed", name),
        EventKind::FullStop => format!("Process {} has fully stopped", name),
        EventKind::FullCrash => format!("Process {} has fully crashed", name),
        EventKind::ManuallyStopped => format!("Process {} has been manually stopped", name),
        EventKind::Restart => format!("Process {} has been restarted", name),
    }
}
