//! # procsman-logs
//!
//! The rotating append-only log file kept per supervised process, indexed
//! in the store, plus the read-side post-processing applied when admin
//! code fetches log contents.
//!
//! Layout on disk: `{logs_folder}/{process_id}/{unix_seconds}.procLog`.

pub mod reader;
pub mod writer;

pub use reader::{collapse_repeated_lines, REPEAT_THRESHOLD};
pub use writer::ProcessLogWriter;
