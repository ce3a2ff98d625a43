//! # procsman-common
//!
//! Shared error taxonomy and core domain types used by every procsman
//! crate: process records, per-process configuration with layered
//! defaults, lifecycle statuses, event kinds, and the records persisted
//! through the store.

pub mod errors;
pub mod types;

pub use errors::{AdminError, AdminResult, ProcessError, ProcessResult, StoreError, StoreResult};
pub use types::{
    Configuration, EffectiveConfiguration, Event, EventKind, GroupId, LogFileRecord, Process,
    ProcessGroup, ProcessId, ProcessSpec, Status, UsageSample,
};
