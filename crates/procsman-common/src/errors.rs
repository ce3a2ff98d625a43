//! Error types shared across the procsman crates.
//!
//! Three families, by locus:
//!
//! - [`StoreError`] — persistence failures; `not_found` is distinguished
//!   so the admin surface can map it to a 404.
//! - [`ProcessError`] — OS-level failures (path resolution, spawn, kill,
//!   usage sampling, log files).
//! - [`AdminError`] — validation and request failures on the admin
//!   surface, each carrying a stable machine code and an HTTP-style
//!   status.

use thiserror::Error;

/// Result alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Errors produced by the typed query interface.
#[derive(Debug, Error, Clone)]
pub enum StoreError {
    #[error("not found: {what}")]
    NotFound { what: String },

    #[error("conflict: {what}")]
    Conflict { what: String },

    #[error("store error: {0}")]
    Internal(String),
}

impl StoreError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    pub fn conflict(what: impl Into<String>) -> Self {
        Self::Conflict { what: what.into() }
    }

    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal(reason.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Result alias for OS-level process operations.
pub type ProcessResult<T> = std::result::Result<T, ProcessError>;

/// Errors from spawning, killing, sampling, and log-file handling.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("executable not found: {path}")]
    ExecutableNotFound { path: String },

    #[error("executable is not a regular file: {path}")]
    ExecutableNotFile { path: String },

    #[error("executable is not executable: {path}")]
    ExecutableNotExecutable { path: String },

    #[error("spawn failed for {id}: {reason}")]
    SpawnFailed { id: String, reason: String },

    #[error("failed to kill pid {pid}: {reason}")]
    KillFailed { pid: u32, reason: String },

    #[error("usage sampling failed for pid {pid}: {reason}")]
    UsageFailed { pid: u32, reason: String },

    #[error("log writer error for process {id}: {reason}")]
    Logging { id: String, reason: String },

    #[error("process has exited")]
    Exited,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ProcessError {
    pub fn spawn_failed(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SpawnFailed {
            id: id.into(),
            reason: reason.into(),
        }
    }

    pub fn kill_failed(pid: u32, reason: impl Into<String>) -> Self {
        Self::KillFailed {
            pid,
            reason: reason.into(),
        }
    }

    pub fn usage_failed(pid: u32, reason: impl Into<String>) -> Self {
        Self::UsageFailed {
            pid,
            reason: reason.into(),
        }
    }

    pub fn logging(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Logging {
            id: id.into(),
            reason: reason.into(),
        }
    }
}

/// Result alias for admin-surface operations.
pub type AdminResult<T> = std::result::Result<T, AdminError>;

/// Validation and request failures on the admin surface.
///
/// Every variant maps to a stable machine code ([`AdminError::code`]) and
/// an HTTP-style status ([`AdminError::http_status`]) that the transport
/// layer surfaces verbatim.
#[derive(Debug, Error, Clone)]
pub enum AdminError {
    #[error("process not found")]
    ProcessNotFound,

    #[error("no id provided")]
    NoIdProvided,

    #[error("invalid id")]
    InvalidId,

    #[error("name is required")]
    NameRequired,

    #[error("executable_path is required")]
    ExecutableRequired,

    #[error("executable_path does not exist")]
    ExecutableNotFound,

    #[error("executable_path is not a file")]
    ExecutableNotFile,

    #[error("executable_path is not executable")]
    ExecutableNotExecutable,

    #[error("working_dir does not exist")]
    WorkingDirNotFound,

    #[error("working_dir is not a directory")]
    WorkingDirNotDir,

    #[error("invalid group")]
    InvalidGroup,

    #[error("group not found")]
    GroupNotFound,

    #[error("group already exists")]
    GroupAlreadyExists,

    #[error("process is not running")]
    ProcessNotRunning,

    #[error("invalid time frame")]
    InvalidTimeFrame,

    #[error("invalid limit")]
    InvalidLimit,

    #[error("text required")]
    TextRequired,

    #[error("internal error: {0}")]
    Internal(String),
}

impl AdminError {
    pub fn internal(reason: impl std::fmt::Display) -> Self {
        Self::Internal(reason.to_string())
    }

    /// Stable machine code carried in error payloads.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ProcessNotFound => "process_not_found",
            Self::NoIdProvided => "no_id_provided",
            Self::InvalidId => "invalid_id",
            Self::NameRequired => "name_required",
            Self::ExecutableRequired => "executable_required",
            Self::ExecutableNotFound => "executable_not_found",
            Self::ExecutableNotFile => "executable_not_file",
            Self::ExecutableNotExecutable => "executable_not_executable",
            Self::WorkingDirNotFound => "wd_not_found",
            Self::WorkingDirNotDir => "wd_not_dir",
            Self::InvalidGroup => "invalid_group",
            Self::GroupNotFound => "group_not_found",
            Self::GroupAlreadyExists => "group_already_exists",
            Self::ProcessNotRunning => "process_not_running",
            Self::InvalidTimeFrame => "invalid_time_frame",
            Self::InvalidLimit => "invalid_limit",
            Self::TextRequired => "text_required",
            Self::Internal(_) => "internal_error",
        }
    }

    /// HTTP-style status the transport layer responds with.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::ProcessNotFound | Self::GroupNotFound => 404,
            Self::Internal(_) => 500,
            _ => 400,
        }
    }
}

impl From<StoreError> for AdminError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { .. } => AdminError::ProcessNotFound,
            other => AdminError::internal(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_not_found_is_distinguished() {
        let err = StoreError::not_found("process 7");
        assert!(err.is_not_found());
        assert!(!StoreError::internal("boom").is_not_found());
    }

    #[test]
    fn admin_error_codes_are_stable() {
        assert_eq!(AdminError::ProcessNotFound.code(), "process_not_found");
        assert_eq!(AdminError::WorkingDirNotDir.code(), "wd_not_dir");
        assert_eq!(AdminError::internal("x").code(), "internal_error");
    }

    #[test]
    fn admin_error_status_mapping() {
        assert_eq!(AdminError::ProcessNotFound.http_status(), 404);
        assert_eq!(AdminError::GroupNotFound.http_status(), 404);
        assert_eq!(AdminError::NameRequired.http_status(), 400);
        assert_eq!(AdminError::internal("x").http_status(), 500);
    }

    #[test]
    fn store_not_found_maps_to_admin_404() {
        let admin: AdminError = StoreError::not_found("process 1").into();
        assert!(matches!(admin, AdminError::ProcessNotFound));

        let admin: AdminError = StoreError::internal("db down").into();
        assert!(matches!(admin, AdminError::Internal(_)));
    }
}
