//! # procsman-supervisor
//!
//! The per-process supervision engine: one Runner task per supervised
//! process (spawn, monitor, restart, terminate, log capture, usage
//! sampling, event journal), the Supervisor registry that owns them, and
//! the admin operations the HTTP surface is built on.

pub mod admin;
pub mod config;
pub mod events;
pub mod runner;
pub mod supervisor;

pub use admin::{
    AdminService, CreateGroupRequest, CreateProcessRequest, LogPiece, UpdateProcessRequest,
};
pub use config::{load_or_create_defaults, ProcsmanConfig};
pub use events::EventRecorder;
pub use runner::{RunnerDeps, RunnerHandle, Signal};
pub use supervisor::Supervisor;
