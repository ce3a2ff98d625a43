//! End-to-end Runner behavior against real child processes.

#![cfg(unix)]

mod common;

use common::*;
use procsman_common::{Configuration, EventKind, Status};
use procsman_store::Store;
use procsman_supervisor::runner::spawn_runner;
use procsman_supervisor::Signal;
use std::time::Duration;

const LONG: Duration = Duration::from_secs(15);

fn no_restart() -> Configuration {
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

#[tokio::test]
async fn start_runs_and_clean_exit_without_policy_is_terminal() {
    let fx = fixture();
    let exe = script(&fx.logs_folder, "short.sh", "sleep 0.3\nexit 0");
    let process = create_process(&fx, spec(&exe, no_restart())).await;
    let handle = spawn_runner(fx.deps.clone(), process.clone());

    assert!(handle.signal(Signal::Start).await);
    wait_for_status(&handle, |s| s == Status::Running, LONG).await;
    wait_for_status(&handle, |s| s == Status::Stopped, LONG).await;

    let kinds = event_kinds(&fx, process.id).await;
    assert_eq!(kinds, [EventKind::Start, EventKind::FullStop]);

    // in-memory and persisted status agree
    let stored = fx.store.get_process(process.id).await.unwrap();
    assert_eq!(stored.status, handle.status());
}

#[tokio::test]
async fn clean_exits_restart_until_budget_exhausts() {
    let fx = fixture();
    let exe = script(&fx.logs_folder, "short.sh", "sleep 0.3\nexit 0");
    let config = Configuration {
        auto_restart_on_stop: Some(true),
        auto_restart_on_crash: Some(false),
        auto_restart_max_retries: Some(3),
        auto_restart_max_retries_frame: Some(60),
        auto_restart_delay: Some(50),
        record_stats: Some(false),
        ..no_restart()
    };
    let process = create_process(&fx, spec(&exe, config)).await;
    let handle = spawn_runner(fx.deps.clone(), process.clone());

    assert!(handle.signal(Signal::Start).await);
    let kinds = wait_for_events(
        &fx,
        process.id,
        |kinds| kinds.contains(&EventKind::FullStop),
        LONG,
    )
    .await;

    // START (STOP START){3} FULL_STOP: three retried exits within the
    // frame, then the budget declines the fourth.
    assert_eq!(
        kinds,
        [
            EventKind::Start,
            EventKind::Stop,
            EventKind::Start,
            EventKind::Stop,
            EventKind::Start,
            EventKind::Stop,
            EventKind::Start,
            EventKind::FullStop,
        ]
    );
    wait_for_status(&handle, |s| s == Status::Stopped, LONG).await;
}

#[tokio::test]
async fn crash_loop_exhausts_budget_and_lands_crashed() {
    let fx = fixture();
    let exe = script(&fx.logs_folder, "crash.sh", "sleep 0.3\nexit 7");
    let config = Configuration {
        auto_restart_on_stop: Some(false),
        auto_restart_on_crash: Some(true),
        auto_restart_max_retries: Some(2),
        auto_restart_max_retries_frame: Some(60),
        auto_restart_delay: Some(50),
        record_stats: Some(false),
        ..no_restart()
    };
    let process = create_process(&fx, spec(&exe, config)).await;
    let handle = spawn_runner(fx.deps.clone(), process.clone());

    assert!(handle.signal(Signal::Start).await);
    let kinds = wait_for_events(
        &fx,
        process.id,
        |kinds| kinds.contains(&EventKind::FullCrash),
        LONG,
    )
    .await;

    assert_eq!(
        kinds,
        [
            EventKind::Start,
            EventKind::Crash,
            EventKind::Start,
            EventKind::Crash,
            EventKind::Start,
            EventKind::FullCrash,
        ]
    );
    wait_for_status(&handle, |s| s == Status::Crashed, LONG).await;
}

#[tokio::test]
async fn preseeded_window_declines_the_first_retry() {
    let fx = fixture();
    let exe = script(&fx.logs_folder, "short.sh", "sleep 0.3\nexit 0");
    let config = Configuration {
        auto_restart_on_stop: Some(true),
        auto_restart_max_retries: Some(3),
        auto_restart_max_retries_frame: Some(60),
        auto_restart_delay: Some(50),
        ..no_restart()
    };
    let process = create_process(&fx, spec(&exe, config)).await;

    // Three retried exits already in the window: the budget is spent.
    for _ in 0..3 {
        fx.store
            .insert_event(process.id, EventKind::Stop, None)
            .await
            .unwrap();
    }

    let handle = spawn_runner(fx.deps.clone(), process.clone());
    assert!(handle.signal(Signal::Start).await);
    wait_for_status(&handle, |s| s == Status::Stopped, LONG).await;

    let kinds = event_kinds(&fx, process.id).await;
    // The three seeds, then START and an immediate FULL_STOP.
    assert_eq!(kinds[3..], [EventKind::Start, EventKind::FullStop]);
}

#[tokio::test]
async fn manual_stop_overrides_autorestart() {
    let fx = fixture();
    let exe = script(&fx.logs_folder, "long.sh", "sleep 300");
    let config = Configuration {
        auto_restart_on_stop: Some(true),
        auto_restart_on_crash: Some(true),
        ..no_restart()
    };
    let process = create_process(&fx, spec(&exe, config)).await;
    let handle = spawn_runner(fx.deps.clone(), process.clone());

    assert!(handle.signal(Signal::Start).await);
    wait_for_status(&handle, |s| s == Status::Running, LONG).await;

    assert!(handle.signal(Signal::Stop).await);
    wait_for_status(&handle, |s| s == Status::Stopped, LONG).await;

    // No automatic START follows a manual stop.
    tokio::time::sleep(Duration::from_millis(500)).await;
    let kinds = event_kinds(&fx, process.id).await;
    assert_eq!(kinds, [EventKind::Start, EventKind::ManuallyStopped]);
    assert_eq!(handle.status(), Status::Stopped);
}

#[tokio::test]
async fn restart_signal_journals_restart_then_start() {
    let fx = fixture();
    let exe = script(&fx.logs_folder, "long.sh", "sleep 300");
    let config = Configuration {
        auto_restart_delay: Some(300),
        ..no_restart()
    };
    let process = create_process(&fx, spec(&exe, config)).await;
    let handle = spawn_runner(fx.deps.clone(), process.clone());

    assert!(handle.signal(Signal::Start).await);
    wait_for_status(&handle, |s| s == Status::Running, LONG).await;

    assert!(handle.signal(Signal::Restart).await);
    let kinds = wait_for_events(
        &fx,
        process.id,
        |kinds| kinds.len() >= 3 && *kinds.last().unwrap() == EventKind::Start,
        LONG,
    )
    .await;
    assert_eq!(kinds, [EventKind::Start, EventKind::Restart, EventKind::Start]);
    wait_for_status(&handle, |s| s == Status::Running, LONG).await;

    // No FULL_STOP for the replaced child.
    assert!(!event_kinds(&fx, process.id).await.contains(&EventKind::FullStop));

    assert!(handle.signal(Signal::Stop).await);
    wait_for_status(&handle, |s| s == Status::Stopped, LONG).await;
}

#[tokio::test]
async fn refresh_restarts_with_the_new_executable() {
    let fx = fixture();
    let dir = tempfile::tempdir().unwrap();
    let exe_a = script(dir.path(), "a.sh", "touch ran_a\nsleep 300");
    let exe_b = script(dir.path(), "b.sh", "touch ran_b\nsleep 300");

    let mut process_spec = spec(&exe_a, Configuration {
        auto_restart_delay: Some(300),
        ..no_restart()
    });
    process_spec.working_dir = dir.path().to_string_lossy().into_owned();
    process_spec.enabled = true;
    let process = create_process(&fx, process_spec.clone()).await;
    let handle = spawn_runner(fx.deps.clone(), process.clone());

    // enabled=true: the Runner starts itself.
    wait_for_status(&handle, |s| s == Status::Running, LONG).await;
    assert!(dir.path().join("ran_a").exists());

    // Point the record at the new executable and refresh.
    let mut updated = process_spec;
    updated.executable_path = exe_b;
    fx.store.update_process(process.id, updated).await.unwrap();
    assert!(handle.signal(Signal::Refresh).await);

    let deadline = tokio::time::Instant::now() + LONG;
    while !dir.path().join("ran_b").exists() {
        assert!(tokio::time::Instant::now() < deadline, "new executable never ran");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    wait_for_status(&handle, |s| s == Status::Running, LONG).await;

    let kinds = event_kinds(&fx, process.id).await;
    assert_eq!(kinds, [EventKind::Start, EventKind::Restart, EventKind::Start]);

    assert!(handle.signal(Signal::Stop).await);
    wait_for_status(&handle, |s| s == Status::Stopped, LONG).await;
}

#[tokio::test]
async fn refresh_stops_a_disabled_process() {
    let fx = fixture();
    let exe = script(&fx.logs_folder, "long.sh", "sleep 300");
    let mut process_spec = spec(&exe, no_restart());
    process_spec.enabled = true;
    let process = create_process(&fx, process_spec.clone()).await;
    let handle = spawn_runner(fx.deps.clone(), process.clone());
    wait_for_status(&handle, |s| s == Status::Running, LONG).await;

    let mut disabled = process_spec;
    disabled.enabled = false;
    fx.store.update_process(process.id, disabled).await.unwrap();
    assert!(handle.signal(Signal::Refresh).await);

    wait_for_status(&handle, |s| s == Status::Stopped, LONG).await;
}

#[tokio::test]
async fn stdin_lines_reach_the_child_in_order() {
    let fx = fixture();
    let dir = tempfile::tempdir().unwrap();
    let exe = script(
        dir.path(),
        "reader.sh",
        "while read line; do echo \"$line\" >> received.txt; done",
    );
    let mut process_spec = spec(&exe, no_restart());
    process_spec.working_dir = dir.path().to_string_lossy().into_owned();
    let process = create_process(&fx, process_spec).await;
    let handle = spawn_runner(fx.deps.clone(), process.clone());

    assert!(handle.signal(Signal::Start).await);
    wait_for_status(&handle, |s| s == Status::Running, LONG).await;

    assert!(handle.write_stdin("a".to_string()).await);
    assert!(handle.write_stdin("b".to_string()).await);
    assert!(handle.write_stdin("c".to_string()).await);

    let received = dir.path().join("received.txt");
    let deadline = tokio::time::Instant::now() + LONG;
    loop {
        let contents = std::fs::read_to_string(&received).unwrap_or_default();
        if contents == "a\nb\nc\n" {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "stdin never arrived; got {:?}",
            contents
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert!(handle.signal(Signal::Stop).await);
    wait_for_status(&handle, |s| s == Status::Stopped, LONG).await;
}

#[tokio::test]
async fn child_output_lands_in_the_indexed_log_file() {
    let fx = fixture();
    let exe = script(&fx.logs_folder, "emit.sh", "echo out-line\necho err-line >&2\nsleep 300");
    let mut config = no_restart();
    config.store_logs = Some(true);
    let process = create_process(&fx, spec(&exe, config)).await;
    let handle = spawn_runner(fx.deps.clone(), process.clone());

    assert!(handle.signal(Signal::Start).await);
    wait_for_status(&handle, |s| s == Status::Running, LONG).await;

    let deadline = tokio::time::Instant::now() + LONG;
    loop {
        let record = fx.store.latest_log_file(process.id).await.unwrap();
        let contents = record
            .as_ref()
            .and_then(|r| std::fs::read_to_string(&r.path).ok())
            .unwrap_or_default();
        if contents.contains("out-line") && contents.contains("err-line") {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "log never captured: {:?}", contents);
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert!(handle.signal(Signal::Stop).await);
    wait_for_status(&handle, |s| s == Status::Stopped, LONG).await;
}

#[tokio::test]
async fn deleted_purges_logs_and_terminates_the_runner() {
    let fx = fixture();
    let exe = script(&fx.logs_folder, "long.sh", "sleep 300");
    let mut config = no_restart();
    config.store_logs = Some(true);
    let process = create_process(&fx, spec(&exe, config)).await;
    let handle = spawn_runner(fx.deps.clone(), process.clone());

    assert!(handle.signal(Signal::Start).await);
    wait_for_status(&handle, |s| s == Status::Running, LONG).await;

    let log_dir = fx.logs_folder.join(process.id.to_string());
    assert!(log_dir.exists());

    assert!(handle.signal(Signal::Deleted).await);
    let join = handle.take_join().expect("join handle");
    tokio::time::timeout(LONG, join)
        .await
        .expect("runner terminated")
        .unwrap();
    assert!(!log_dir.exists());
}

#[tokio::test]
async fn spawn_failure_is_a_full_crash() {
    let fx = fixture();
    let process = create_process(&fx, spec("/definitely/not/here", no_restart())).await;
    let handle = spawn_runner(fx.deps.clone(), process.clone());

    assert!(handle.signal(Signal::Start).await);
    wait_for_status(&handle, |s| s == Status::Crashed, LONG).await;

    let kinds = event_kinds(&fx, process.id).await;
    assert_eq!(kinds, [EventKind::FullCrash]);
    let stored = fx.store.get_process(process.id).await.unwrap();
    assert_eq!(stored.status, Status::Crashed);
}

#[tokio::test]
async fn usage_samples_are_recorded_for_a_running_child() {
    let fx = fixture();
    // Busy enough to accumulate some CPU, quiet enough to not matter.
    let exe = script(&fx.logs_folder, "busy.sh", "while true; do :; done");
    let mut config = no_restart();
    config.record_stats = Some(true);
    let process = create_process(&fx, spec(&exe, config)).await;
    let handle = spawn_runner(fx.deps.clone(), process.clone());

    assert!(handle.signal(Signal::Start).await);
    wait_for_status(&handle, |s| s == Status::Running, LONG).await;

    // stats_interval is 1s: the first tick seeds, the second writes.
    let far_past = chrono::DateTime::<chrono::Utc>::UNIX_EPOCH;
    let deadline = tokio::time::Instant::now() + LONG;
    let samples = loop {
        let samples = fx
            .store
            .samples_range(process.id, far_past, chrono::Utc::now())
            .await
            .unwrap();
        if !samples.is_empty() {
            break samples;
        }
        assert!(tokio::time::Instant::now() < deadline, "no usage sample recorded");
        tokio::time::sleep(Duration::from_millis(50)).await;
    };

    let cores = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
    for sample in &samples {
        assert!(sample.cpu_percent >= 0.0);
        assert!(sample.cpu_percent <= 100.0 * cores as f64);
        assert!(sample.memory_bytes > 0);
        assert!(sample.cpu_nanos >= 0);
    }

    assert!(handle.signal(Signal::Stop).await);
    wait_for_status(&handle, |s| s == Status::Stopped, LONG).await;
}
