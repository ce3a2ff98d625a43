//! Windows usage sampling via `sysinfo`.
//!
//! Builds the process subtree by walking parent links over a fresh
//! process snapshot, then sums accumulated CPU time and memory.

use crate::usage::UsageInfo;
use chrono::Utc;
use procsman_common::{ProcessError, ProcessResult};
use std::time::Duration;
use sysinfo::{Pid, ProcessesToUpdate, System};

pub(crate) fn sample_tree(pid: u32) -> ProcessResult<UsageInfo> {
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::All, true);

    let root = Pid::from_u32(pid);
    if system.process(root).is_none() {
        return Err(ProcessError::usage_failed(pid, "process not found"));
    }

    let mut cpu_millis: u64 = 0;
    let mut memory_bytes: i64 = 0;
    let mut frontier = vec![root];

    while let Some(current) = frontier.pop() {
        if let Some(process) = system.process(current) {
            cpu_millis = cpu_millis.saturating_add(process.accumulated_cpu_time());
            memory_bytes += process.memory() as i64;
        }
        for (child_pid, process) in system.processes() {
            if process.parent() == Some(current) {
                frontier.push(*child_pid);
            }
        }
    }

    Ok(UsageInfo {
        cpu: Duration::from_millis(cpu_millis),
        memory_bytes,
        sampled_at: Utc::now(),
    })
}
