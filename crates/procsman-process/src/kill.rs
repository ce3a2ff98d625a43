//! Recursive process-tree termination.
//!
//! Unix resolves children with `pgrep -P`, kills leaves first with
//! SIGKILL, then the root. Windows delegates the whole tree to
//! `taskkill /T /F`. Failures on individual descendants are logged and do
//! not abort the traversal.

use procsman_common::{ProcessError, ProcessResult};
use tracing::warn;

/// Direct children of `pid`. Failures (including "no children") resolve
/// to an empty list.
#[cfg(unix)]
pub fn child_pids(pid: u32) -> Vec<u32> {
    let output = std::process::Command::new("pgrep")
        .arg("-P")
        .arg(pid.to_string())
        .output();

    match output {
        Ok(out) => String::from_utf8_lossy(&out.stdout)
            .lines()
            .filter_map(|line| line.trim().parse::<u32>().ok())
            .collect(),
        Err(e) => {
            warn!(pid, error = %e, "pgrep failed, assuming no children");
            Vec::new()
        }
    }
}

#[cfg(windows)]
pub fn child_pids(_pid: u32) -> Vec<u32> {
    // taskkill /T walks the tree itself; nothing needs the listing here.
    Vec::new()
}

/// Kill the process tree rooted at `pid`, leaves first.
#[cfg(unix)]
pub fn kill_process_tree(pid: u32) -> ProcessResult<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    for child in child_pids(pid) {
        if let Err(e) = kill_process_tree(child) {
            warn!(pid = child, error = %e, "failed to kill descendant, continuing");
        }
    }

    match kill(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        Ok(()) => Ok(()),
        // Already gone counts as killed.
        Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(ProcessError::kill_failed(pid, e.to_string())),
    }
}

#[cfg(windows)]
pub fn kill_process_tree(pid: u32) -> ProcessResult<()> {
    let status = std::process::Command::new("taskkill")
        .args(["/T", "/F", "/PID", &pid.to_string()])
        .status()
        .map_err(|e| ProcessError::kill_failed(pid, e.to_string()))?;
    if status.success() {
        Ok(())
    } else {
        Err(ProcessError::kill_failed(
            pid,
            format!("taskkill exited with {}", status),
        ))
    }
}
