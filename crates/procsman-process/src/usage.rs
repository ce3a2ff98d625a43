//! CPU and memory accounting over a process tree.
//!
//! One sample covers the root child and all transitive descendants. On
//! Unix this reads `/proc/<pid>/stat` (utime + stime, scaled by the clock
//! tick rate) and `/proc/<pid>/statm` (resident pages times the page
//! size). The Windows side walks parent links via `sysinfo` and sums
//! accumulated CPU time and memory.
//!
//! The first sample after a spawn only seeds the delta baseline; the
//! tracker reports `None` for it and a [`UsageDelta`] for every sample
//! after that.

use chrono::{DateTime, Utc};
use procsman_common::ProcessResult;
use std::time::Duration;

/// Aggregate usage of one process tree at one instant.
#[derive(Debug, Clone, Copy)]
pub struct UsageInfo {
    /// Total CPU time consumed so far by the whole tree.
    pub cpu: Duration,
    pub memory_bytes: i64,
    pub sampled_at: DateTime<Utc>,
}

/// Usage of a tree since the previous sample.
#[derive(Debug, Clone, Copy)]
pub struct UsageDelta {
    pub cpu_delta: Duration,
    /// `cpu_delta / (num_cores * wall_delta) * 100`, rounded to three
    /// decimals. In `[0, 100 * num_cores]`.
    pub cpu_percent: f64,
    pub memory_bytes: i64,
    pub sampled_at: DateTime<Utc>,
    pub wall_delta: Duration,
}

/// Delta tracker over successive [`sample_tree`] calls.
#[derive(Debug, Default)]
pub struct UsageTracker {
    last: Option<UsageInfo>,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// When the previous sample was taken, if any. Drives the sampling
    /// interval check.
    pub fn last_sampled_at(&self) -> Option<DateTime<Utc>> {
        self.last.map(|u| u.sampled_at)
    }

    /// Sample the tree rooted at `pid`. The first call seeds the baseline
    /// and returns `Ok(None)`.
    pub fn record(&mut self, pid: u32) -> ProcessResult<Option<UsageDelta>> {
        let current = sample_tree(pid)?;
        let Some(previous) = self.last.replace(current) else {
            return Ok(None);
        };

        let cpu_delta = current.cpu.saturating_sub(previous.cpu);
        let wall_delta = (current.sampled_at - previous.sampled_at)
            .to_std()
            .unwrap_or(Duration::ZERO);

        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let denominator = cores as f64 * wall_delta.as_nanos() as f64;
        let percent = if denominator > 0.0 {
            cpu_delta.as_nanos() as f64 / denominator * 100.0
        } else {
            0.0
        };

        Ok(Some(UsageDelta {
            cpu_delta,
            cpu_percent: round_to_3_decimals(percent),
            memory_bytes: current.memory_bytes,
            sampled_at: current.sampled_at,
            wall_delta,
        }))
    }
}

pub(crate) fn round_to_3_decimals(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// Take one snapshot of the tree rooted at `pid`.
#[cfg(unix)]
pub fn sample_tree(pid: u32) -> ProcessResult<UsageInfo> {
    let mut info = UsageInfo {
        cpu: Duration::ZERO,
        memory_bytes: 0,
        sampled_at: Utc::now(),
    };
    accumulate(&mut info, pid)?;
    Ok(info)
}

#[cfg(windows)]
pub fn sample_tree(pid: u32) -> ProcessResult<UsageInfo> {
    crate::usage_windows::sample_tree(pid)
}

#[cfg(unix)]
fn accumulate(info: &mut UsageInfo, pid: u32) -> ProcessResult<()> {
    use procsman_common::ProcessError;

    for child in crate::kill::child_pids(pid) {
        accumulate(info, child)?;
    }

    let stat = std::fs::read_to_string(format!("/proc/{}/stat", pid))
        .map_err(|e| ProcessError::usage_failed(pid, e.to_string()))?;
    // The comm field may contain spaces and parentheses; fields 3.. start
    // after the last ')'.
    let rest = stat
        .rsplit_once(')')
        .map(|(_, rest)| rest)
        .ok_or_else(|| ProcessError::usage_failed(pid, "malformed /proc stat"))?;
    let fields: Vec<&str> = rest.split_whitespace().collect();
    // utime and stime are stat fields 14 and 15; `rest` starts at field 3.
    let utime: u64 = fields
        .get(11)
        .and_then(|f| f.parse().ok())
        .ok_or_else(|| ProcessError::usage_failed(pid, "missing utime"))?;
    let stime: u64 = fields
        .get(12)
        .and_then(|f| f.parse().ok())
        .ok_or_else(|| ProcessError::usage_failed(pid, "missing stime"))?;
    info.cpu += ticks_to_duration(utime + stime);

    let statm = std::fs::read_to_string(format!("/proc/{}/statm", pid))
        .map_err(|e| ProcessError::usage_failed(pid, e.to_string()))?;
    let resident_pages: i64 = statm
        .split_whitespace()
        .nth(1)
        .and_then(|f| f.parse().ok())
        .ok_or_else(|| ProcessError::usage_failed(pid, "malformed /proc statm"))?;
    info.memory_bytes += resident_pages * page_size();

    Ok(())
}

#[cfg(unix)]
fn ticks_to_duration(ticks: u64) -> Duration {
    Duration::from_nanos(ticks.saturating_mul(1_000_000_000) / clock_ticks_per_second())
}

#[cfg(unix)]
fn clock_ticks_per_second() -> u64 {
    use nix::unistd::{sysconf, SysconfVar};
    sysconf(SysconfVar::CLK_TCK)
        .ok()
        .flatten()
        .map(|v| v as u64)
        .filter(|v| *v > 0)
        .unwrap_or(100)
}

#[cfg(unix)]
fn page_size() -> i64 {
    use nix::unistd::{sysconf, SysconfVar};
    sysconf(SysconfVar::PAGE_SIZE)
        .ok()
        .flatten()
        .map(|v| v as i64)
        .unwrap_or(4096)
}
