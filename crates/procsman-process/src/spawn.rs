//! Spawning a supervised child.
//!
//! The spawn contract: resolve the executable (stat first, then a PATH
//! search; directories rejected; on Unix any execute bit required), split
//! the argument string on whitespace (no shell, no quoting), merge the
//! per-process environment over the parent environment, and place the
//! child in its own process group (Unix) / process group flag (Windows)
//! so the whole tree can be killed later.

use procsman_common::{ProcessError, ProcessResult};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout};

/// Everything needed to spawn one supervised child.
#[derive(Debug, Clone)]
pub struct SpawnOptions {
    /// Used only for error reporting.
    pub id: String,
    pub executable: String,
    /// Whitespace-split into argv. Arguments containing spaces cannot be
    /// expressed; shell-like quoting is out of scope.
    pub arguments: String,
    /// Empty string means "directory of the resolved executable".
    pub working_dir: String,
    pub environment: HashMap<String, String>,
    /// When false, stdout/stderr are discarded instead of piped.
    pub capture_output: bool,
}

/// A freshly spawned child with its pipes taken out of the handle.
pub struct SpawnedChild {
    pub child: Child,
    pub pid: u32,
    pub stdin: ChildStdin,
    pub stdout: Option<ChildStdout>,
    pub stderr: Option<ChildStderr>,
}

/// Resolve an executable path the way the admin validation does: stat the
/// given path, fall back to a PATH lookup for bare names, reject
/// directories, and on Unix require any execute bit.
pub fn resolve_executable(source: &str) -> ProcessResult<PathBuf> {
    if let Ok(meta) = std::fs::metadata(source) {
        check_candidate(&meta, source)?;
        return Ok(PathBuf::from(source));
    }

    // Only bare names get the PATH treatment; a missing explicit path is
    // simply not found.
    let is_bare = !source.contains(std::path::MAIN_SEPARATOR) && !source.contains('/');
    if is_bare {
        if let Some(paths) = std::env::var_os("PATH") {
            for dir in std::env::split_paths(&paths) {
                let candidate = dir.join(source);
                if let Ok(meta) = std::fs::metadata(&candidate) {
                    if check_candidate(&meta, source).is_ok() {
                        return Ok(candidate);
                    }
                }
            }
        }
    }

    Err(ProcessError::ExecutableNotFound {
        path: source.to_string(),
    })
}

fn check_candidate(meta: &std::fs::Metadata, source: &str) -> ProcessResult<()> {
    if meta.is_dir() {
        return Err(ProcessError::ExecutableNotFile {
            path: source.to_string(),
        });
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if meta.permissions().mode() & 0o111 == 0 {
            return Err(ProcessError::ExecutableNotExecutable {
                path: source.to_string(),
            });
        }
    }
    Ok(())
}

/// Spawn the child described by `opts`.
///
/// A stdin pipe is always opened. Stdout/stderr are piped only when
/// `capture_output` is set, otherwise both discard.
pub fn spawn_child(opts: &SpawnOptions) -> ProcessResult<SpawnedChild> {
    let resolved = resolve_executable(&opts.executable)?;

    let working_dir = if opts.working_dir.is_empty() {
        resolved
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    } else {
        PathBuf::from(&opts.working_dir)
    };

    let mut command = std::process::Command::new(&resolved);
    command
        .args(opts.arguments.split_whitespace())
        .current_dir(working_dir)
        .envs(&opts.environment)
        .stdin(Stdio::piped());

    if opts.capture_output {
        command.stdout(Stdio::piped()).stderr(Stdio::piped());
    } else {
        command.stdout(Stdio::null()).stderr(Stdio::null());
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }
    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
        command.creation_flags(CREATE_NEW_PROCESS_GROUP);
    }

    let mut child = tokio::process::Command::from(command)
        .spawn()
        .map_err(|e| ProcessError::spawn_failed(&opts.id, e.to_string()))?;

    let pid = child
        .id()
        .ok_or_else(|| ProcessError::spawn_failed(&opts.id, "child exited before pid was read"))?;
    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| ProcessError::spawn_failed(&opts.id, "stdin pipe missing"))?;
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    Ok(SpawnedChild {
        child,
        pid,
        stdin,
        stdout,
        stderr,
    })
}
