//! Shared fixtures for the supervisor integration tests.

#![allow(dead_code)]

use procsman_common::{Configuration, Process, ProcessId, ProcessSpec, Status};
use procsman_notify::{Notifier, NoopNotifier};
use procsman_store::{MemoryStore, SharedStore, Store};
use procsman_supervisor::{EventRecorder, RunnerDeps, RunnerHandle};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub struct Fixture {
    pub store: Arc<MemoryStore>,
    pub deps: Arc<RunnerDeps>,
    pub logs_folder: PathBuf,
    _tmp: tempfile::TempDir,
}

pub fn fixture() -> Fixture {
    let tmp = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::new());
    let shared: SharedStore = Arc::clone(&store) as SharedStore;
    let deps = Arc::new(RunnerDeps {
        recorder: EventRecorder::new(Arc::clone(&shared), Arc::new(NoopNotifier) as Arc<dyn Notifier>),
        store: shared,
        defaults: Configuration::builtin_defaults(),
        logs_folder: tmp.path().to_path_buf(),
        log_file_timespan: Duration::from_secs(60),
        flush_interval: Duration::from_millis(100),
        stats_interval: Duration::from_secs(1),
    });
    Fixture {
        store,
        deps,
        logs_folder: tmp.path().to_path_buf(),
        _tmp: tmp,
    }
}

/// Write an executable shell script into `dir` and return its path.
#[cfg(unix)]
pub fn script(dir: &Path, name: &str, body: &str) -> String {
    use std::os::unix::fs::PermissionsExt;
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path.to_string_lossy().into_owned()
}

pub fn spec(executable: &str, configuration: Configuration) -> ProcessSpec {
    ProcessSpec {
        name: "svc".to_string(),
        group: None,
        color: None,
        enabled: false,
        executable_path: executable.to_string(),
        arguments: String::new(),
        working_dir: String::new(),
        environment: HashMap::new(),
        configuration,
    }
}

pub async fn create_process(fixture: &Fixture, spec: ProcessSpec) -> Process {
    fixture.store.create_process(spec).await.unwrap()
}

/// Poll the handle status until `predicate` holds or the timeout hits.
pub async fn wait_for_status(
    handle: &RunnerHandle,
    predicate: impl Fn(Status) -> bool,
    timeout: Duration,
) {
    let result = tokio::time::timeout(timeout, async {
        loop {
            if predicate(handle.status()) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    if result.is_err() {
        panic!(
            "wait_for_status timed out after {:?}; final status: {}",
            timeout,
            handle.status()
        );
    }
}

/// Poll the journal until `predicate` over the event kinds holds.
pub async fn wait_for_events(
    fixture: &Fixture,
    id: ProcessId,
    predicate: impl Fn(&[procsman_common::EventKind]) -> bool,
    timeout: Duration,
) -> Vec<procsman_common::EventKind> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let kinds = event_kinds(fixture, id).await;
        if predicate(&kinds) {
            return kinds;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("wait_for_events timed out after {:?}; events: {:?}", timeout, kinds);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub async fn event_kinds(fixture: &Fixture, id: ProcessId) -> Vec<procsman_common::EventKind> {
    fixture
        .store
        .events_since(id, chrono::DateTime::<chrono::Utc>::UNIX_EPOCH)
        .await
        .unwrap()
        .iter()
        .map(|e| e.kind)
        .collect()
}
