//! The Supervisor: registry and lifecycle owner for all Runners.

use crate::config::ProcsmanConfig;
use crate::events::EventRecorder;
use crate::runner::{spawn_runner, RunnerDeps, RunnerHandle, Signal};
use parking_lot::RwLock;
use procsman_common::{Configuration, Process, ProcessId, StoreResult};
use procsman_notify::Notifier;
use procsman_store::SharedStore;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Owns the `id -> Runner` map behind a readers-writer lock: many
/// concurrent admin lookups, rare mutations.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

struct Inner {
    deps: Arc<RunnerDeps>,
    runners: RwLock<HashMap<ProcessId, Arc<RunnerHandle>>>,
}

impl Supervisor {
    /// Load every persisted process and start a Runner for each in its
    /// own task. Runners set their initial status to `UNKNOWN` and start
    /// themselves when enabled.
    pub async fn new(
        store: SharedStore,
        notifier: Arc<dyn Notifier>,
        config: &ProcsmanConfig,
        defaults: Configuration,
    ) -> StoreResult<Self> {
        let deps = Arc::new(RunnerDeps {
            recorder: EventRecorder::new(Arc::clone(&store), notifier),
            store,
            defaults,
            logs_folder: config.logs_folder.clone(),
            log_file_timespan: config.log_file_timespan(),
            flush_interval: config.flush_interval(),
            stats_interval: config.process_stats_interval(),
        });

        let supervisor = Self {
            inner: Arc::new(Inner {
                deps,
                runners: RwLock::new(HashMap::new()),
            }),
        };

        let processes = supervisor.inner.deps.store.list_processes().await?;
        info!(count = processes.len(), "starting runners for persisted processes");
        for process in processes {
            supervisor.add_runner(process);
        }
        Ok(supervisor)
    }

    pub fn store(&self) -> &SharedStore {
        &self.inner.deps.store
    }

    pub fn defaults(&self) -> &Configuration {
        &self.inner.deps.defaults
    }

    /// Construct and start a Runner for a (freshly created) process.
    pub fn add_runner(&self, process: Process) -> Arc<RunnerHandle> {
        let id = process.id;
        let handle = spawn_runner(Arc::clone(&self.inner.deps), process);
        self.inner.runners.write().insert(id, Arc::clone(&handle));
        handle
    }

    /// Send `Deleted` (fire-and-forget) and drop the registry entry. The
    /// Runner purges its on-disk logs and terminates.
    pub fn remove_runner(&self, id: ProcessId) {
        let handle = self.inner.runners.write().remove(&id);
        if let Some(handle) = handle {
            // Deleted must not be dropped even under back-pressure.
            tokio::spawn(async move {
                let _ = handle.signal(Signal::Deleted).await;
            });
        }
    }

    pub fn get_runner(&self, id: ProcessId) -> Option<Arc<RunnerHandle>> {
        self.inner.runners.read().get(&id).cloned()
    }

    /// Route a signal into a Runner's control channel. Waits for channel
    /// capacity. False when no Runner exists or it has terminated.
    pub async fn signal(&self, id: ProcessId, signal: Signal) -> bool {
        match self.get_runner(id) {
            Some(handle) => handle.signal(signal).await,
            None => false,
        }
    }

    /// Queue one stdin line for a process's current child.
    pub async fn write_stdin(&self, id: ProcessId, line: String) -> bool {
        match self.get_runner(id) {
            Some(handle) => handle.write_stdin(line).await,
            None => false,
        }
    }

    /// Stop every Runner and await their tasks within `deadline`.
    pub async fn shutdown(&self, deadline: Duration) {
        let handles: Vec<Arc<RunnerHandle>> = {
            let mut runners = self.inner.runners.write();
            runners.drain().map(|(_, handle)| handle).collect()
        };
        info!(count = handles.len(), "shutting down runners");

        for handle in &handles {
            let _ = handle.signal(Signal::Stop).await;
        }

        let joins: Vec<_> = handles
            .iter()
            .filter_map(|handle| handle.take_join().map(|j| (handle.process_id, j)))
            .collect();
        // Dropping the handles closes each signal channel, which is what
        // lets the Runner loops exit.
        drop(handles);

        for (process_id, join) in joins {
            match tokio::time::timeout(deadline, join).await {
                Ok(_) => {}
                Err(_) => {
                    warn!(%process_id, "runner did not drain before deadline, abandoning");
                }
            }
        }
        info!("supervisor shut down");
    }
}
