//! The per-process Runner: one cooperative task owning one supervised
//! child.
//!
//! The Runner multiplexes its bounded signal channel with a periodic
//! tick. Each loop iteration either consumes one signal or drives the
//! background work: log rotation, usage sampling, and the auto-restart
//! follow-through. Two helper tasks exist per live child: the stdin
//! forwarder and the child waiter.
//!
//! Shared-state rules: the Runner task is the single writer of the
//! process record; `status` and `stopped_by_user` are also read by the
//! child waiter and live behind a mutex / atomic.

use crate::events::EventRecorder;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use procsman_common::{
    Configuration, EffectiveConfiguration, EventKind, Process, ProcessId, ProcessResult, Status,
};
use procsman_logs::ProcessLogWriter;
use procsman_process::{kill_process_tree, spawn_child, SpawnOptions, UsageTracker};
use procsman_store::{NewUsageSample, SharedStore};
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, warn};

/// Control signals accepted by a Runner.
///
/// `Stop` kills the tree and records a manual stop. `Restart` cycles the
/// child after the configured cooldown. `Deleted` tears the Runner down
/// and purges its on-disk logs. `Refresh` re-reads the process record and
/// queues a `Restart` when the process is enabled, else a `Stop`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Start,
    Stop,
    Restart,
    Deleted,
    Refresh,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Signal::Start => "Start",
            Signal::Stop => "Stop",
            Signal::Restart => "Restart",
            Signal::Deleted => "Deleted",
            Signal::Refresh => "Refresh",
        };
        write!(f, "{}", s)
    }
}

pub const SIGNAL_CHANNEL_CAPACITY: usize = 2;
pub const STDIN_CHANNEL_CAPACITY: usize = 2;

const IDLE_TICK: Duration = Duration::from_millis(100);

/// Dependencies shared by every Runner.
pub struct RunnerDeps {
    pub store: SharedStore,
    pub recorder: EventRecorder,
    pub defaults: Configuration,
    pub logs_folder: PathBuf,
    pub log_file_timespan: Duration,
    pub flush_interval: Duration,
    pub stats_interval: Duration,
}

/// Fields shared between the Runner task and its child waiter.
struct Shared {
    status: Mutex<Status>,
    stopped_by_user: AtomicBool,
}

/// Handle to a live Runner. Cloned into the Supervisor map and the admin
/// surface.
pub struct RunnerHandle {
    pub process_id: ProcessId,
    signal_tx: mpsc::Sender<Signal>,
    stdin: Arc<RwLock<Option<mpsc::Sender<String>>>>,
    shared: Arc<Shared>,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl RunnerHandle {
    /// The Runner's in-memory status.
    pub fn status(&self) -> Status {
        *self.shared.status.lock()
    }

    /// Send a signal, waiting for channel capacity. Returns false when
    /// the Runner has terminated.
    pub async fn signal(&self, signal: Signal) -> bool {
        self.signal_tx.send(signal).await.is_ok()
    }

    /// Send a signal without waiting. Returns false when the channel is
    /// full or closed.
    pub fn try_signal(&self, signal: Signal) -> bool {
        self.signal_tx.try_send(signal).is_ok()
    }

    /// Queue one stdin line for the current child. The Runner appends the
    /// newline. Returns false when no child is accepting input.
    pub async fn write_stdin(&self, line: String) -> bool {
        let tx = self.stdin.read().clone();
        match tx {
            Some(tx) => tx.send(line).await.is_ok(),
            None => false,
        }
    }

    /// Take the Runner task's join handle (used once, at shutdown).
    pub fn take_join(&self) -> Option<JoinHandle<()>> {
        self.join.lock().take()
    }
}

/// Construct and start a Runner task for `process`.
pub fn spawn_runner(deps: Arc<RunnerDeps>, process: Process) -> Arc<RunnerHandle> {
    let (signal_tx, signal_rx) = mpsc::channel(SIGNAL_CHANNEL_CAPACITY);
    let shared = Arc::new(Shared {
        status: Mutex::new(process.status),
        stopped_by_user: AtomicBool::new(false),
    });
    let stdin = Arc::new(RwLock::new(None));
    let writer = Arc::new(ProcessLogWriter::new(
        Arc::clone(&deps.store),
        process.id,
        &deps.logs_folder,
        deps.log_file_timespan,
        deps.flush_interval,
    ));

    let runner = Runner {
        deps,
        process,
        shared: Arc::clone(&shared),
        writer,
        signal_weak: signal_tx.downgrade(),
        signal_rx,
        stdin: Arc::clone(&stdin),
        current: None,
    };
    let process_id = runner.process.id;
    let join = tokio::spawn(runner.run());

    Arc::new(RunnerHandle {
        process_id,
        signal_tx,
        stdin,
        shared,
        join: Mutex::new(Some(join)),
    })
}

struct CurrentChild {
    pid: u32,
    tracker: UsageTracker,
}

enum Flow {
    Continue,
    /// Deleted: logs already purged, skip the final log finalize.
    ExitPurged,
}

struct Runner {
    deps: Arc<RunnerDeps>,
    process: Process,
    shared: Arc<Shared>,
    writer: Arc<ProcessLogWriter>,
    /// Weak so the Runner's own self-signals never keep the channel open
    /// after the Supervisor drops its handle.
    signal_weak: mpsc::WeakSender<Signal>,
    signal_rx: mpsc::Receiver<Signal>,
    stdin: Arc<RwLock<Option<mpsc::Sender<String>>>>,
    current: Option<CurrentChild>,
}

impl Runner {
    async fn run(mut self) {
        if self.process.enabled {
            self.enqueue(Signal::Start);
        }
        self.set_status(Status::Unknown).await;
        if let Err(e) = self.writer.cycle(self.effective().store_logs).await {
            error!(process_id = %self.process.id, error = %e, "initial log cycle failed");
        }

        let mut tick = tokio::time::interval(IDLE_TICK);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                // Signals first: a queued signal is always consumed before
                // the next background tick.
                biased;

                maybe_signal = self.signal_rx.recv() => {
                    match maybe_signal {
                        None => break,
                        Some(signal) => {
                            if let Flow::ExitPurged = self.handle_signal(signal).await {
                                return;
                            }
                        }
                    }
                }

                _ = tick.tick() => self.background().await,
            }
        }

        // Supervisor dropped the handle: release the child and close out
        // the open log file.
        self.kill_current(false);
        if let Err(e) = self.writer.finalize().await {
            warn!(process_id = %self.process.id, error = %e, "failed to finalize log on exit");
        }
    }

    fn effective(&self) -> EffectiveConfiguration {
        self.process.configuration.resolve(&self.deps.defaults)
    }

    fn status(&self) -> Status {
        *self.shared.status.lock()
    }

    async fn set_status(&mut self, status: Status) {
        persist_status(&self.deps.store, &self.shared, self.process.id, status).await;
        self.process.status = status;
    }

    fn enqueue(&self, signal: Signal) {
        if let Some(tx) = self.signal_weak.upgrade() {
            if tx.try_send(signal).is_err() {
                // Capacity 2 and the loop drains before issuing another;
                // a full channel here only delays to the next tick.
                debug!(process_id = %self.process.id, %signal, "signal channel full");
            }
        }
    }

    async fn handle_signal(&mut self, signal: Signal) -> Flow {
        debug!(process_id = %self.process.id, %signal, "received signal");
        match signal {
            Signal::Start => {
                let status = self.status();
                // Ignored while live; a pending auto-restart already owns
                // the next spawn.
                if !status.is_live() && !status.will_restart() {
                    self.set_status(Status::Starting).await;
                    self.kill_current(false);
                    match self.spawn_current(true).await {
                        Ok(()) => self.set_status(Status::Running).await,
                        Err(e) => {
                            error!(process_id = %self.process.id, error = %e, "failed to start process");
                            self.record(EventKind::FullCrash).await;
                            self.set_status(Status::Crashed).await;
                        }
                    }
                }
                Flow::Continue
            }

            Signal::Stop => {
                if !matches!(
                    self.status(),
                    Status::Stopping | Status::Stopped | Status::Crashed
                ) {
                    self.set_status(Status::Stopping).await;
                    self.kill_current(true);
                    self.record(EventKind::ManuallyStopped).await;
                    self.set_status(Status::Stopped).await;
                }
                Flow::Continue
            }

            Signal::Restart => {
                // Internal follow-through restarts are not journalled as
                // RESTART; each successful spawn records its own START.
                let requested = !self.status().will_restart();
                self.set_status(Status::Stopping).await;
                if requested {
                    self.record(EventKind::Restart).await;
                }
                self.shared.stopped_by_user.store(true, Ordering::SeqCst);
                self.kill_current(false);

                let delay = self.effective().auto_restart_delay;
                if !delay.is_zero() {
                    debug!(process_id = %self.process.id, ?delay, "sleeping before restart");
                    tokio::time::sleep(delay).await;
                }

                self.set_status(Status::Starting).await;
                match self.spawn_current(true).await {
                    Ok(()) => self.set_status(Status::Running).await,
                    Err(e) => {
                        error!(process_id = %self.process.id, error = %e, "failed to restart process");
                        self.record(EventKind::FullCrash).await;
                        self.set_status(Status::Crashed).await;
                    }
                }
                Flow::Continue
            }

            Signal::Deleted => {
                self.kill_current(true);
                if let Err(e) = self.writer.finalize_on_delete().await {
                    error!(process_id = %self.process.id, error = %e, "failed to purge logs");
                }
                Flow::ExitPurged
            }

            Signal::Refresh => {
                match self.deps.store.get_process(self.process.id).await {
                    Ok(process) => {
                        self.process = process;
                        if let Err(e) = self.writer.cycle(self.effective().store_logs).await {
                            error!(process_id = %self.process.id, error = %e, "log cycle failed");
                        }
                        if self.process.enabled {
                            self.enqueue(Signal::Restart);
                        } else {
                            self.enqueue(Signal::Stop);
                        }
                    }
                    Err(e) => {
                        error!(process_id = %self.process.id, error = %e, "failed to refresh process");
                    }
                }
                Flow::Continue
            }
        }
    }

    /// The non-signal branch of the loop: auto-restart follow-through,
    /// log rotation tick, usage sampling.
    async fn background(&mut self) {
        if self.status().will_restart() {
            debug!(process_id = %self.process.id, "restarting per configuration");
            self.enqueue(Signal::Restart);
        }

        if let Err(e) = self.writer.cycle(self.effective().store_logs).await {
            error!(process_id = %self.process.id, error = %e, "log cycle failed");
        }

        if self.status() == Status::Running && self.effective().record_stats {
            self.maybe_sample().await;
        }
    }

    async fn maybe_sample(&mut self) {
        let interval = self.deps.stats_interval;
        let Some(current) = self.current.as_mut() else {
            return;
        };

        if let Some(last) = current.tracker.last_sampled_at() {
            let elapsed = Utc::now()
                .signed_duration_since(last)
                .to_std()
                .unwrap_or(Duration::ZERO);
            if elapsed < interval {
                return;
            }
        }

        match current.tracker.record(current.pid) {
            // First sample only seeds the baseline.
            Ok(None) => {}
            Ok(Some(delta)) => {
                let sample = NewUsageSample {
                    process_id: self.process.id,
                    created_at: delta.sampled_at,
                    cpu_nanos: delta.cpu_delta.as_nanos() as i64,
                    cpu_percent: delta.cpu_percent,
                    memory_bytes: delta.memory_bytes,
                };
                if let Err(e) = self.deps.store.insert_usage_sample(sample).await {
                    error!(process_id = %self.process.id, error = %e, "failed to record usage");
                }
            }
            Err(e) => {
                // The child may have exited between the status check and
                // the sample.
                debug!(process_id = %self.process.id, error = %e, "usage sampling failed");
            }
        }
    }

    /// Spawn a child for the current process record and wire up its three
    /// helper tasks.
    async fn spawn_current(&mut self, report_start: bool) -> ProcessResult<()> {
        self.shared.stopped_by_user.store(false, Ordering::SeqCst);
        let effective = self.effective();

        let opts = SpawnOptions {
            id: self.process.id.to_string(),
            executable: self.process.executable_path.clone(),
            arguments: self.process.arguments.clone(),
            working_dir: self.process.working_directory.clone(),
            environment: self.process.environment.clone(),
            capture_output: effective.store_logs,
        };
        let mut spawned = spawn_child(&opts)?;
        debug!(process_id = %self.process.id, pid = spawned.pid, "spawned child");

        // Fresh stdin channel per child: lines queued for a dead child are
        // dropped with its forwarder, never delivered to the successor.
        let (stdin_tx, stdin_rx) = mpsc::channel(STDIN_CHANNEL_CAPACITY);
        *self.stdin.write() = Some(stdin_tx);
        spawn_stdin_forwarder(self.process.id, stdin_rx, spawned.stdin);

        if let Some(stdout) = spawned.stdout.take() {
            spawn_output_pump(self.process.id, stdout, Arc::clone(&self.writer));
        }
        if let Some(stderr) = spawned.stderr.take() {
            spawn_output_pump(self.process.id, stderr, Arc::clone(&self.writer));
        }

        if report_start {
            self.record(EventKind::Start).await;
        }

        let waiter = WaiterCtx {
            deps: Arc::clone(&self.deps),
            shared: Arc::clone(&self.shared),
            writer: Arc::clone(&self.writer),
            process_id: self.process.id,
            process_name: self.process.name.clone(),
            effective,
        };
        let mut child = spawned.child;
        tokio::spawn(async move {
            let result = child.wait().await;
            handle_child_exit(waiter, result).await;
        });

        self.current = Some(CurrentChild {
            pid: spawned.pid,
            tracker: UsageTracker::new(),
        });
        Ok(())
    }

    /// Kill the current child's tree, if any. `mark_stopped` flags the
    /// exit as user-initiated for the waiter.
    fn kill_current(&mut self, mark_stopped: bool) {
        if let Some(current) = self.current.take() {
            if mark_stopped {
                self.shared.stopped_by_user.store(true, Ordering::SeqCst);
            }
            if let Err(e) = kill_process_tree(current.pid) {
                warn!(process_id = %self.process.id, pid = current.pid, error = %e, "kill failed");
            }
        }
        // Closing the sender ends the stdin forwarder and drops unsent
        // lines.
        *self.stdin.write() = None;
    }

    async fn record(&self, kind: EventKind) {
        record_event(
            &self.deps.recorder,
            self.process.id,
            &self.process.name,
            &self.effective(),
            kind,
        )
        .await;
    }
}

/// Everything the child waiter needs after the Runner moves on.
struct WaiterCtx {
    deps: Arc<RunnerDeps>,
    shared: Arc<Shared>,
    writer: Arc<ProcessLogWriter>,
    process_id: ProcessId,
    process_name: String,
    effective: EffectiveConfiguration,
}

/// Compute the post-exit transition. Runs on the waiter task, concurrent
/// with the Runner loop; synchronizes via `status` and `stopped_by_user`.
async fn handle_child_exit(ctx: WaiterCtx, result: std::io::Result<std::process::ExitStatus>) {
    if *ctx.shared.status.lock() == Status::Stopping {
        // The stop path owns the bookkeeping for this exit.
        debug!(process_id = %ctx.process_id, "exit during stop, nothing to do");
        return;
    }

    let was_stopped = ctx.shared.stopped_by_user.swap(false, Ordering::SeqCst);
    if let Err(e) = ctx.writer.flush().await {
        warn!(process_id = %ctx.process_id, error = %e, "flush after exit failed");
    }

    match result {
        _ if was_stopped => {
            debug!(process_id = %ctx.process_id, "child exit initiated by user");
            finalize(&ctx, true, false).await;
        }
        Err(error) => {
            // The wait itself failed; treat like a kill we delivered.
            warn!(process_id = %ctx.process_id, %error, "wait failed");
            finalize(&ctx, true, false).await;
        }
        Ok(status) if status.success() => finalize(&ctx, true, true).await,
        Ok(status) => {
            warn!(process_id = %ctx.process_id, %status, "child crashed");
            finalize(&ctx, false, true).await;
        }
    }
}

/// Decide between the will-restart and terminal outcomes of an exit and
/// persist status + event accordingly.
async fn finalize(ctx: &WaiterCtx, is_stop: bool, try_restart: bool) {
    let policy_allows = if is_stop {
        ctx.effective.auto_restart_on_stop
    } else {
        ctx.effective.auto_restart_on_crash
    };
    let permitted = try_restart && policy_allows && budget_permits(ctx).await;

    let (status, kind) = match (is_stop, permitted) {
        (true, true) => (Status::StoppedWillRestart, EventKind::Stop),
        (true, false) => (Status::Stopped, EventKind::FullStop),
        (false, true) => (Status::CrashedWillRestart, EventKind::Crash),
        (false, false) => (Status::Crashed, EventKind::FullCrash),
    };

    persist_status(&ctx.deps.store, &ctx.shared, ctx.process_id, status).await;
    record_event(
        &ctx.deps.recorder,
        ctx.process_id,
        &ctx.process_name,
        &ctx.effective,
        kind,
    )
    .await;
}

/// Sliding-window budget: permit a restart iff fewer than `max_retries`
/// retried exits were recorded within the trailing frame. A frame of 0
/// disables the check. The window is read from the store, never from
/// memory.
async fn budget_permits(ctx: &WaiterCtx) -> bool {
    let frame = ctx.effective.auto_restart_max_retries_frame;
    if frame == 0 {
        return true;
    }
    let since = Utc::now() - chrono::Duration::seconds(frame as i64);
    match ctx.deps.store.events_since(ctx.process_id, since).await {
        Ok(events) => {
            let retried = events.iter().filter(|e| e.kind.counts_toward_budget()).count();
            retried < ctx.effective.auto_restart_max_retries as usize
        }
        Err(e) => {
            error!(process_id = %ctx.process_id, error = %e, "failed to read restart window");
            false
        }
    }
}

/// Persist the status, then mirror it in memory. On a store failure the
/// in-memory status is left untouched so the two never diverge.
async fn persist_status(store: &SharedStore, shared: &Shared, id: ProcessId, status: Status) {
    debug!(process_id = %id, %status, "setting status");
    if let Err(e) = store.set_process_status(id, status).await {
        error!(process_id = %id, %status, error = %e, "failed to persist status");
        return;
    }
    *shared.status.lock() = status;
}

async fn record_event(
    recorder: &EventRecorder,
    id: ProcessId,
    name: &str,
    effective: &EffectiveConfiguration,
    kind: EventKind,
) {
    if let Err(e) = recorder.record(id, name, effective, kind, None).await {
        error!(process_id = %id, %kind, error = %e, "failed to record event");
    }
}

fn spawn_stdin_forwarder(
    process_id: ProcessId,
    mut stdin_rx: mpsc::Receiver<String>,
    mut child_stdin: tokio::process::ChildStdin,
) {
    tokio::spawn(async move {
        while let Some(line) = stdin_rx.recv().await {
            let mut bytes = line.into_bytes();
            bytes.push(b'\n');
            if let Err(e) = child_stdin.write_all(&bytes).await {
                error!(process_id = %process_id, error = %e, "stdin write failed");
                return;
            }
            if let Err(e) = child_stdin.flush().await {
                error!(process_id = %process_id, error = %e, "stdin flush failed");
                return;
            }
        }
    });
}

fn spawn_output_pump(
    process_id: ProcessId,
    mut stream: impl tokio::io::AsyncRead + Unpin + Send + 'static,
    writer: Arc<ProcessLogWriter>,
) {
    tokio::spawn(async move {
        let mut buf = [0u8; 8192];
        loop {
            match stream.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    // A failed write never blocks the child; the next
                    // cycle reopens the file.
                    if let Err(e) = writer.write(&buf[..n]).await {
                        warn!(process_id = %process_id, error = %e, "log write failed");
                    }
                }
                Err(e) => {
                    warn!(process_id = %process_id, error = %e, "output read failed");
                    break;
                }
            }
        }
    });
}
