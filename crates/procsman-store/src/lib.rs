//! # procsman-store
//!
//! The typed query interface over procsman's persisted state: processes,
//! process groups, the event journal, usage samples, and the log-file
//! index. The supervision core only ever talks to [`Store`]; the SQL
//! backend is an external concern behind this trait.
//!
//! Multi-step mutations that must be atomic (closing the open log row and
//! inserting its successor) are single composite operations so every
//! backend supplies the transactionality and callers cannot interleave
//! the steps.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use procsman_common::{
    Configuration, Event, EventKind, GroupId, LogFileRecord, Process, ProcessGroup, ProcessId,
    ProcessSpec, Status, StoreResult, UsageSample,
};
use std::path::PathBuf;
use std::sync::Arc;

pub use memory::MemoryStore;

/// A new usage sample, before the store assigns its row id.
#[derive(Debug, Clone)]
pub struct NewUsageSample {
    pub process_id: ProcessId,
    pub created_at: DateTime<Utc>,
    pub cpu_nanos: i64,
    pub cpu_percent: f64,
    pub memory_bytes: i64,
}

/// Typed query operations over the persisted state.
///
/// `not_found` failures are reported as `StoreError::NotFound`; all other
/// backend failures surface as `StoreError::Internal`.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    // ----- processes ------------------------------------------------------

    async fn create_process(&self, spec: ProcessSpec) -> StoreResult<Process>;

    async fn update_process(&self, id: ProcessId, spec: ProcessSpec) -> StoreResult<Process>;

    async fn get_process(&self, id: ProcessId) -> StoreResult<Process>;

    async fn list_processes(&self) -> StoreResult<Vec<Process>>;

    /// Deletes the row and cascades to its events, samples, and log-file
    /// index entries.
    async fn delete_process(&self, id: ProcessId) -> StoreResult<()>;

    async fn set_process_status(&self, id: ProcessId, status: Status) -> StoreResult<()>;

    // ----- groups ---------------------------------------------------------

    async fn create_group(&self, name: String, color: Option<String>)
        -> StoreResult<ProcessGroup>;

    async fn get_group(&self, id: GroupId) -> StoreResult<ProcessGroup>;

    async fn list_groups(&self) -> StoreResult<Vec<ProcessGroup>>;

    /// Deletes the group; member processes keep running and lose their
    /// group reference.
    async fn delete_group(&self, id: GroupId) -> StoreResult<()>;

    // ----- event journal --------------------------------------------------

    async fn insert_event(
        &self,
        process_id: ProcessId,
        kind: EventKind,
        extra: Option<serde_json::Value>,
    ) -> StoreResult<Event>;

    /// Events recorded against `process_id` at or after `since`. Feeds the
    /// sliding-window restart budget.
    async fn events_since(
        &self,
        process_id: ProcessId,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<Event>>;

    async fn events_range(
        &self,
        process_id: ProcessId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<Event>>;

    // ----- usage samples --------------------------------------------------

    async fn insert_usage_sample(&self, sample: NewUsageSample) -> StoreResult<UsageSample>;

    async fn samples_range(
        &self,
        process_id: ProcessId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<UsageSample>>;

    // ----- log-file index -------------------------------------------------

    async fn insert_log_file(
        &self,
        process_id: ProcessId,
        path: PathBuf,
        start_time: DateTime<Utc>,
    ) -> StoreResult<LogFileRecord>;

    /// The most recently started log file for the process, open or not.
    async fn latest_log_file(&self, process_id: ProcessId) -> StoreResult<Option<LogFileRecord>>;

    async fn close_log_file(&self, id: i64, end_time: DateTime<Utc>) -> StoreResult<()>;

    /// Atomically closes `close` (when given) and inserts the successor
    /// row. The single operation preserves the at-most-one-open-log
    /// invariant across rotation.
    async fn rotate_log_file(
        &self,
        close: Option<i64>,
        process_id: ProcessId,
        new_path: PathBuf,
        start_time: DateTime<Utc>,
    ) -> StoreResult<LogFileRecord>;

    async fn log_files_range(
        &self,
        process_id: ProcessId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<LogFileRecord>>;
}

/// Shared handle to a store backend.
pub type SharedStore = Arc<dyn Store>;

/// Build a process record from a validated spec. Backends use this when
/// materializing `create_process`.
pub(crate) fn process_from_spec(
    id: ProcessId,
    spec: ProcessSpec,
    created_at: DateTime<Utc>,
) -> Process {
    Process {
        id,
        name: spec.name,
        group: spec.group,
        color: spec.color,
        executable_path: spec.executable_path,
        arguments: spec.arguments,
        working_directory: spec.working_dir,
        environment: spec.environment,
        configuration: spec.configuration,
        enabled: spec.enabled,
        status: Status::Unknown,
        created_at,
    }
}

/// Apply an update spec onto an existing record, preserving identity,
/// status, and creation time.
pub(crate) fn apply_spec(process: &mut Process, spec: ProcessSpec) {
    process.name = spec.name;
    process.group = spec.group;
    process.color = spec.color;
    process.executable_path = spec.executable_path;
    process.arguments = spec.arguments;
    process.working_directory = spec.working_dir;
    process.environment = spec.environment;
    process.configuration = spec.configuration;
    process.enabled = spec.enabled;
}

/// Convenience used by the Runner: did the fields that require a Refresh
/// change between two records?
pub fn needs_refresh(
    before: &Process,
    after: &ProcessSpec,
    defaults: &Configuration,
) -> bool {
    before.enabled != after.enabled
        || before.executable_path != after.executable_path
        || before.arguments != after.arguments
        || before.working_directory != after.working_dir
        || before.environment != after.environment
        || before.configuration.resolve(defaults) != after.configuration.resolve(defaults)
}
