//! Admin operation semantics: validation taxonomy, refresh-on-update,
//! delete cascade, queries.

#![cfg(unix)]

mod common;

use common::*;
use procsman_common::{AdminError, Configuration, EventKind, ProcessId, Status};
use procsman_notify::{Notifier, NoopNotifier};
use procsman_store::{SharedStore, Store};
use procsman_supervisor::{
    AdminService, CreateGroupRequest, CreateProcessRequest, ProcsmanConfig, Signal, Supervisor,
};
use std::sync::Arc;
use std::time::Duration;

const LONG: Duration = Duration::from_secs(15);

async fn admin(fx: &Fixture) -> AdminService {
    let mut config = ProcsmanConfig {
        db: "memory".to_string(),
        logs_folder: fx.logs_folder.clone(),
        log_file_timespan: 60,
        flush_interval: 100,
        process_stats_interval: 1,
    };
    config.validate().unwrap();
    let supervisor = Supervisor::new(
        Arc::clone(&fx.store) as SharedStore,
        Arc::new(NoopNotifier) as Arc<dyn Notifier>,
        &config,
        Configuration::builtin_defaults(),
    )
    .await
    .unwrap();
    AdminService::new(supervisor)
}

fn quiet() -> Configuration {
    Configuration {
        auto_restart_on_stop: Some(false),
        auto_restart_on_crash: Some(false),
        record_stats: Some(false),
        notify_on_start: Some(false),
        notify_on_stop: Some(false),
        notify_on_crash: Some(false),
        notify_on_restart: Some(false),
        ..Default::default()
    }
}

fn request(executable: &str) -> CreateProcessRequest {
    CreateProcessRequest {
        name: "svc".to_string(),
        executable_path: executable.to_string(),
        configuration: quiet(),
        ..Default::default()
    }
}

#[tokio::test]
async fn create_validates_name_and_executable() {
    let fx = fixture();
    let admin = admin(&fx).await;

    let mut req = request("/bin/sh");
    req.name = String::new();
    assert!(matches!(
        admin.create_process(req).await.unwrap_err(),
        AdminError::NameRequired
    ));

    let req = request("");
    assert!(matches!(
        admin.create_process(req).await.unwrap_err(),
        AdminError::ExecutableRequired
    ));

    let req = request("/definitely/not/here");
    assert!(matches!(
        admin.create_process(req).await.unwrap_err(),
        AdminError::ExecutableNotFound
    ));

    let dir = tempfile::tempdir().unwrap();
    let req = request(dir.path().to_str().unwrap());
    assert!(matches!(
        admin.create_process(req).await.unwrap_err(),
        AdminError::ExecutableNotFile
    ));

    let plain = dir.path().join("plain");
    std::fs::write(&plain, "data").unwrap();
    let req = request(plain.to_str().unwrap());
    assert!(matches!(
        admin.create_process(req).await.unwrap_err(),
        AdminError::ExecutableNotExecutable
    ));
}

#[tokio::test]
async fn create_validates_working_dir_and_defaults_it() {
    let fx = fixture();
    let admin = admin(&fx).await;

    let mut req = request("/bin/sh");
    req.working_dir = "/definitely/not/here".to_string();
    assert!(matches!(
        admin.create_process(req).await.unwrap_err(),
        AdminError::WorkingDirNotFound
    ));

    let mut req = request("/bin/sh");
    req.working_dir = "/bin/sh".to_string();
    assert!(matches!(
        admin.create_process(req).await.unwrap_err(),
        AdminError::WorkingDirNotDir
    ));

    // Empty working_dir resolves to the executable's directory.
    let created = admin.create_process(request("/bin/sh")).await.unwrap();
    assert_eq!(created.working_directory, "/bin");
}

#[tokio::test]
async fn create_rejects_unknown_group_and_duplicate_new_group() {
    let fx = fixture();
    let admin = admin(&fx).await;

    let mut req = request("/bin/sh");
    req.group = Some(procsman_common::GroupId::new(42));
    assert!(matches!(
        admin.create_process(req).await.unwrap_err(),
        AdminError::InvalidGroup
    ));

    admin
        .create_group(CreateGroupRequest {
            name: "web".to_string(),
            color: None,
        })
        .await
        .unwrap();
    let mut req = request("/bin/sh");
    req.create_new_group = true;
    req.new_group = Some(CreateGroupRequest {
        name: "web".to_string(),
        color: None,
    });
    assert!(matches!(
        admin.create_process(req).await.unwrap_err(),
        AdminError::GroupAlreadyExists
    ));
}

#[tokio::test]
async fn create_starts_a_runner_and_enabled_process_runs() {
    let fx = fixture();
    let admin = admin(&fx).await;
    let exe = script(&fx.logs_folder, "long.sh", "sleep 300");

    let mut req = request(&exe);
    req.enabled = true;
    let created = admin.create_process(req).await.unwrap();

    let handle = admin.supervisor().get_runner(created.id).expect("runner registered");
    wait_for_status(&handle, |s| s == Status::Running, LONG).await;

    admin.signal(created.id, Signal::Stop).await.unwrap();
    wait_for_status(&handle, |s| s == Status::Stopped, LONG).await;
}

#[tokio::test]
async fn update_sends_refresh_only_when_supervision_fields_change() {
    let fx = fixture();
    let admin = admin(&fx).await;
    let dir = tempfile::tempdir().unwrap();
    let exe_a = script(dir.path(), "a.sh", "touch ran_a\nsleep 300");
    let exe_b = script(dir.path(), "b.sh", "touch ran_b\nsleep 300");

    let mut req = request(&exe_a);
    req.enabled = true;
    req.working_dir = dir.path().to_string_lossy().into_owned();
    req.configuration.auto_restart_delay = Some(300);
    let created = admin.create_process(req.clone()).await.unwrap();
    let handle = admin.supervisor().get_runner(created.id).unwrap();
    wait_for_status(&handle, |s| s == Status::Running, LONG).await;

    // Rename only: no refresh, no restart journal entries.
    let mut rename = req.clone();
    rename.name = "renamed".to_string();
    admin.update_process(created.id, rename.clone()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(event_kinds(&fx, created.id).await, [EventKind::Start]);

    // Executable change: refresh, restart, new executable runs.
    let mut change = rename;
    change.executable_path = exe_b;
    admin.update_process(created.id, change).await.unwrap();

    let deadline = tokio::time::Instant::now() + LONG;
    while !dir.path().join("ran_b").exists() {
        assert!(tokio::time::Instant::now() < deadline, "updated executable never ran");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let kinds = wait_for_events(
        &fx,
        created.id,
        |kinds| kinds.ends_with(&[EventKind::Restart, EventKind::Start]),
        LONG,
    )
    .await;
    assert_eq!(kinds, [EventKind::Start, EventKind::Restart, EventKind::Start]);

    admin.signal(created.id, Signal::Stop).await.unwrap();
    wait_for_status(&handle, |s| s == Status::Stopped, LONG).await;
}

#[tokio::test]
async fn delete_cascades_and_purges() {
    let fx = fixture();
    let admin = admin(&fx).await;
    let exe = script(&fx.logs_folder, "long.sh", "sleep 300");

    let mut req = request(&exe);
    req.enabled = true;
    req.configuration.store_logs = Some(true);
    let created = admin.create_process(req).await.unwrap();
    let handle = admin.supervisor().get_runner(created.id).unwrap();
    wait_for_status(&handle, |s| s == Status::Running, LONG).await;

    let log_dir = fx.logs_folder.join(created.id.to_string());
    assert!(log_dir.exists());

    admin.delete_process(created.id).await.unwrap();

    assert!(matches!(
        admin.get_process(created.id).await.unwrap_err(),
        AdminError::ProcessNotFound
    ));
    let deadline = tokio::time::Instant::now() + LONG;
    while log_dir.exists() {
        assert!(tokio::time::Instant::now() < deadline, "log dir never purged");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    // Cascaded rows are gone.
    let far_past = chrono::DateTime::<chrono::Utc>::UNIX_EPOCH;
    assert!(fx.store.events_since(created.id, far_past).await.unwrap().is_empty());
}

#[tokio::test]
async fn stdin_requires_running_enabled_process_and_text() {
    let fx = fixture();
    let admin = admin(&fx).await;
    let exe = script(&fx.logs_folder, "long.sh", "sleep 300");

    let created = admin.create_process(request(&exe)).await.unwrap();

    assert!(matches!(
        admin.write_stdin(created.id, String::new()).await.unwrap_err(),
        AdminError::TextRequired
    ));
    // Not running yet.
    assert!(matches!(
        admin.write_stdin(created.id, "x".to_string()).await.unwrap_err(),
        AdminError::ProcessNotRunning
    ));
    assert!(matches!(
        admin.write_stdin(ProcessId::new(999), "x".to_string()).await.unwrap_err(),
        AdminError::ProcessNotFound
    ));
}

#[tokio::test]
async fn queries_404_on_unknown_process() {
    let fx = fixture();
    let admin = admin(&fx).await;
    let missing = ProcessId::new(12345);

    assert!(matches!(
        admin.events(missing, None, None, None).await.unwrap_err(),
        AdminError::ProcessNotFound
    ));
    assert!(matches!(
        admin.stats(missing, None, None).await.unwrap_err(),
        AdminError::ProcessNotFound
    ));
    assert!(matches!(
        admin.logs(missing, None, None).await.unwrap_err(),
        AdminError::ProcessNotFound
    ));
}

#[tokio::test]
async fn log_query_collapses_and_flags_missing_files() {
    let fx = fixture();
    let admin = admin(&fx).await;
    let exe = script(&fx.logs_folder, "long.sh", "sleep 300");
    let created = admin.create_process(request(&exe)).await.unwrap();

    // Two indexed files: one real with a long repeated run, one missing.
    let dir = fx.logs_folder.join(created.id.to_string());
    std::fs::create_dir_all(&dir).unwrap();
    let real = dir.join("100.procLog");
    std::fs::write(&real, "spam\n".repeat(30)).unwrap();
    let now = chrono::Utc::now();
    fx.store
        .insert_log_file(created.id, real.clone(), now - chrono::Duration::minutes(10))
        .await
        .unwrap();
    fx.store
        .insert_log_file(created.id, dir.join("200.procLog"), now - chrono::Duration::minutes(5))
        .await
        .unwrap();

    let pieces = admin.logs(created.id, None, None).await.unwrap();
    assert_eq!(pieces.len(), 2);
    assert!(!pieces[0].missing);
    assert_eq!(pieces[0].text, "spam\n{Last line repeated 30 times}\n");
    assert!(pieces[1].missing);
}
