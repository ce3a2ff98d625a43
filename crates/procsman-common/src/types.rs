//! Core domain types: supervised processes, their per-process policy,
//! lifecycle statuses, journal events, and the records persisted through
//! the store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Stable integer id of a supervised process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessId(i64);

impl ProcessId {
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl From<i64> for ProcessId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable integer id of a process group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(i64);

impl GroupId {
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl From<i64> for GroupId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle status of a supervised process.
///
/// `Unknown` is the initial status of a fresh Runner; `Stopped` and
/// `Crashed` persist until the next signal. The `*WillRestart` pair marks
/// an exit that the Runner has already decided to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Unknown,
    Starting,
    Running,
    Stopping,
    Stopped,
    Crashed,
    StoppedWillRestart,
    CrashedWillRestart,
}

impl Status {
    /// True for the pair of statuses the auto-restart follow-through
    /// reacts to.
    pub fn will_restart(&self) -> bool {
        matches!(self, Status::StoppedWillRestart | Status::CrashedWillRestart)
    }

    /// True once a Start signal would be ignored.
    pub fn is_live(&self) -> bool {
        matches!(self, Status::Starting | Status::Running)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Unknown => "UNKNOWN",
            Status::Starting => "STARTING",
            Status::Running => "RUNNING",
            Status::Stopping => "STOPPING",
            Status::Stopped => "STOPPED",
            Status::Crashed => "CRASHED",
            Status::StoppedWillRestart => "STOPPED_WILL_RESTART",
            Status::CrashedWillRestart => "CRASHED_WILL_RESTART",
        };
        write!(f, "{}", s)
    }
}

/// Kind of a journal event.
///
/// `Stop`/`Crash` record exits that will be retried; `FullStop`/
/// `FullCrash` record exits that exhausted or declined the retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    Start,
    Stop,
    Crash,
    FullStop,
    FullCrash,
    ManuallyStopped,
    Restart,
}

impl EventKind {
    /// Terminal events end a START -> ... -> END cycle.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EventKind::FullStop | EventKind::FullCrash | EventKind::ManuallyStopped
        )
    }

    /// Only retried exits count against the sliding-window restart budget.
    pub fn counts_toward_budget(&self) -> bool {
        matches!(self, EventKind::Stop | EventKind::Crash)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventKind::Start => "START",
            EventKind::Stop => "STOP",
            EventKind::Crash => "CRASH",
            EventKind::FullStop => "FULL_STOP",
            EventKind::FullCrash => "FULL_CRASH",
            EventKind::ManuallyStopped => "MANUALLY_STOPPED",
            EventKind::Restart => "RESTART",
        };
        write!(f, "{}", s)
    }
}

/// Built-in fallbacks applied when neither the process configuration nor
/// the loaded defaults file carries a value.
const BUILTIN_MAX_RETRIES: u32 = 3;
const BUILTIN_MAX_RETRIES_FRAME_SECS: u64 = 60;
const BUILTIN_RESTART_DELAY_MS: u64 = 5000;

/// Per-process policy. Every field is optional; unset fields fall back to
/// the process-global defaults loaded from `default_process_config.json`,
/// then to the built-in values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    #[serde(default)]
    pub auto_restart_on_stop: Option<bool>,
    #[serde(default)]
    pub auto_restart_on_crash: Option<bool>,

    /// Restart budget: at most `auto_restart_max_retries` retried exits
    /// within the trailing `auto_restart_max_retries_frame` seconds. A
    /// frame of 0 disables the check.
    #[serde(default)]
    pub auto_restart_max_retries: Option<u32>,
    #[serde(default)]
    pub auto_restart_max_retries_frame: Option<u64>,
    /// Cooldown in milliseconds inserted before a restart.
    #[serde(default)]
    pub auto_restart_delay: Option<u64>,

    #[serde(default)]
    pub notify_on_start: Option<bool>,
    #[serde(default)]
    pub notify_on_stop: Option<bool>,
    #[serde(default)]
    pub notify_on_crash: Option<bool>,
    #[serde(default)]
    pub notify_on_restart: Option<bool>,

    #[serde(default)]
    pub record_stats: Option<bool>,
    #[serde(default)]
    pub store_logs: Option<bool>,
}

impl Configuration {
    /// Fully populated defaults, written to `default_process_config.json`
    /// on first run.
    pub fn builtin_defaults() -> Self {
        Self {
            auto_restart_on_stop: Some(true),
            auto_restart_on_crash: Some(true),
            auto_restart_max_retries: Some(BUILTIN_MAX_RETRIES),
            auto_restart_max_retries_frame: Some(BUILTIN_MAX_RETRIES_FRAME_SECS),
            auto_restart_delay: Some(BUILTIN_RESTART_DELAY_MS),
            notify_on_start: Some(true),
            notify_on_stop: Some(true),
            notify_on_crash: Some(true),
            notify_on_restart: Some(true),
            record_stats: Some(true),
            store_logs: Some(true),
        }
    }

    /// Resolve this configuration against the loaded defaults, yielding
    /// concrete values for every field.
    pub fn resolve(&self, defaults: &Configuration) -> EffectiveConfiguration {
        EffectiveConfiguration {
            auto_restart_on_stop: self
                .auto_restart_on_stop
                .or(defaults.auto_restart_on_stop)
                .unwrap_or(true),
            auto_restart_on_crash: self
                .auto_restart_on_crash
                .or(defaults.auto_restart_on_crash)
                .unwrap_or(true),
            auto_restart_max_retries: self
                .auto_restart_max_retries
                .or(defaults.auto_restart_max_retries)
                .unwrap_or(BUILTIN_MAX_RETRIES),
            auto_restart_max_retries_frame: self
                .auto_restart_max_retries_frame
                .or(defaults.auto_restart_max_retries_frame)
                .unwrap_or(BUILTIN_MAX_RETRIES_FRAME_SECS),
            auto_restart_delay: Duration::from_millis(
                self.auto_restart_delay
                    .or(defaults.auto_restart_delay)
                    .unwrap_or(BUILTIN_RESTART_DELAY_MS),
            ),
            notify_on_start: self
                .notify_on_start
                .or(defaults.notify_on_start)
                .unwrap_or(true),
            notify_on_stop: self
                .notify_on_stop
                .or(defaults.notify_on_stop)
                .unwrap_or(true),
            notify_on_crash: self
                .notify_on_crash
                .or(defaults.notify_on_crash)
                .unwrap_or(true),
            notify_on_restart: self
                .notify_on_restart
                .or(defaults.notify_on_restart)
                .unwrap_or(true),
            record_stats: self.record_stats.or(defaults.record_stats).unwrap_or(true),
            store_logs: self.store_logs.or(defaults.store_logs).unwrap_or(true),
        }
    }
}

/// A [`Configuration`] with all fallbacks applied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EffectiveConfiguration {
    pub auto_restart_on_stop: bool,
    pub auto_restart_on_crash: bool,
    pub auto_restart_max_retries: u32,
    pub auto_restart_max_retries_frame: u64,
    pub auto_restart_delay: Duration,
    pub notify_on_start: bool,
    pub notify_on_stop: bool,
    pub notify_on_crash: bool,
    pub notify_on_restart: bool,
    pub record_stats: bool,
    pub store_logs: bool,
}

impl EffectiveConfiguration {
    /// Whether the matching `notify_on_*` flag is set for an event kind.
    pub fn notifies_on(&self, kind: EventKind) -> bool {
        match kind {
            EventKind::Start => self.notify_on_start,
            EventKind::Restart => self.notify_on_restart,
            EventKind::Stop | EventKind::FullStop | EventKind::ManuallyStopped => {
                self.notify_on_stop
            }
            EventKind::Crash | EventKind::FullCrash => self.notify_on_crash,
        }
    }
}

/// A supervised program as persisted in the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Process {
    pub id: ProcessId,
    pub name: String,
    pub group: Option<GroupId>,
    pub color: Option<String>,
    pub executable_path: String,
    /// Whitespace-split into argv at spawn time. No shell, no quoting:
    /// an argument containing spaces cannot be expressed.
    pub arguments: String,
    pub working_directory: String,
    pub environment: HashMap<String, String>,
    pub configuration: Configuration,
    pub enabled: bool,
    pub status: Status,
    pub created_at: DateTime<Utc>,
}

/// Validated payload for creating or updating a process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessSpec {
    pub name: String,
    #[serde(default)]
    pub group: Option<GroupId>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub enabled: bool,
    pub executable_path: String,
    #[serde(default)]
    pub arguments: String,
    #[serde(default)]
    pub working_dir: String,
    #[serde(default)]
    pub environment: HashMap<String, String>,
    #[serde(default)]
    pub configuration: Configuration,
}

/// A named group of processes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessGroup {
    pub id: GroupId,
    pub name: String,
    pub color: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// One journal row. Appended, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: i64,
    pub process_id: ProcessId,
    pub kind: EventKind,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub extra: Option<serde_json::Value>,
}

/// Index row for one on-disk log file. At most one row per process has
/// `end_time == None` at any instant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogFileRecord {
    pub id: i64,
    pub process_id: ProcessId,
    pub path: PathBuf,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

/// One resource-usage sample. `cpu_nanos` is the delta of aggregate CPU
/// time over the process tree since the previous sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageSample {
    pub id: i64,
    pub process_id: ProcessId,
    pub created_at: DateTime<Utc>,
    pub cpu_nanos: i64,
    pub cpu_percent: f64,
    pub memory_bytes: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_predicates() {
        assert!(Status::StoppedWillRestart.will_restart());
        assert!(Status::CrashedWillRestart.will_restart());
        assert!(!Status::Stopped.will_restart());

        assert!(Status::Running.is_live());
        assert!(Status::Starting.is_live());
        assert!(!Status::Crashed.is_live());
    }

    #[test]
    fn status_serializes_screaming_snake() {
        let s = serde_json::to_string(&Status::StoppedWillRestart).unwrap();
        assert_eq!(s, "\"STOPPED_WILL_RESTART\"");
        let back: Status = serde_json::from_str("\"CRASHED\"").unwrap();
        assert_eq!(back, Status::Crashed);
    }

    #[test]
    fn event_kind_predicates() {
        assert!(EventKind::FullStop.is_terminal());
        assert!(EventKind::ManuallyStopped.is_terminal());
        assert!(!EventKind::Stop.is_terminal());

        assert!(EventKind::Stop.counts_toward_budget());
        assert!(EventKind::Crash.counts_toward_budget());
        assert!(!EventKind::FullCrash.counts_toward_budget());
        assert!(!EventKind::Restart.counts_toward_budget());
    }

    #[test]
    fn configuration_resolution_order() {
        let defaults = Configuration {
            auto_restart_max_retries: Some(5),
            notify_on_crash: Some(false),
            ..Default::default()
        };
        let cfg = Configuration {
            auto_restart_max_retries: Some(1),
            ..Default::default()
        };

        let eff = cfg.resolve(&defaults);
        // process value wins over defaults
        assert_eq!(eff.auto_restart_max_retries, 1);
        // defaults win over built-ins
        assert!(!eff.notify_on_crash);
        // built-ins fill the rest
        assert_eq!(eff.auto_restart_delay, Duration::from_millis(5000));
        assert_eq!(eff.auto_restart_max_retries_frame, 60);
        assert!(eff.store_logs);
    }

    #[test]
    fn notification_mapping() {
        let eff = Configuration::default().resolve(&Configuration {
            notify_on_stop: Some(false),
            ..Default::default()
        });
        assert!(!eff.notifies_on(EventKind::Stop));
        assert!(!eff.notifies_on(EventKind::FullStop));
        assert!(!eff.notifies_on(EventKind::ManuallyStopped));
        assert!(eff.notifies_on(EventKind::Start));
        assert!(eff.notifies_on(EventKind::Crash));
    }
}
