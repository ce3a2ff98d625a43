//! # procsman-process
//!
//! OS-level process primitives behind a narrow interface with exactly two
//! implementations per operation: spawning a supervised child in its own
//! process group, killing a whole process tree, and sampling CPU and
//! memory across the tree.

pub mod kill;
pub mod spawn;
pub mod usage;

#[cfg(windows)]
mod usage_windows;

pub use kill::{child_pids, kill_process_tree};
pub use spawn::{resolve_executable, spawn_child, SpawnOptions, SpawnedChild};
pub use usage::{sample_tree, UsageDelta, UsageInfo, UsageTracker};
