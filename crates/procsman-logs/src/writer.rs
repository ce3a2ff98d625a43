//! The per-process rotating log writer.
//!
//! One writer per Runner. It owns at most one open file and its store
//! row; `cycle` is the only place rotations happen and is called on every
//! Runner loop iteration. `write` is safe to call concurrently with
//! `cycle` from the stdout/stderr pump tasks.

use chrono::{DateTime, Utc};
use procsman_common::{LogFileRecord, ProcessError, ProcessId, ProcessResult};
use procsman_store::SharedStore;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

struct OpenLog {
    record: LogFileRecord,
    file: std::fs::File,
    last_flush: DateTime<Utc>,
}

/// Rotating append-only log file for one process, indexed in the store.
///
/// Invariant: at most one store row per process has a null `end_time`;
/// rotation goes through a single composite store operation so the
/// invariant holds across the switch.
pub struct ProcessLogWriter {
    store: SharedStore,
    process_id: ProcessId,
    dir: PathBuf,
    timespan: Duration,
    flush_interval: Duration,
    inner: Mutex<Option<OpenLog>>,
}

impl ProcessLogWriter {
    pub fn new(
        store: SharedStore,
        process_id: ProcessId,
        logs_folder: &std::path::Path,
        timespan: Duration,
        flush_interval: Duration,
    ) -> Self {
        Self {
            store,
            process_id,
            dir: logs_folder.join(process_id.to_string()),
            timespan,
            flush_interval,
            inner: Mutex::new(None),
        }
    }

    /// The per-process log directory (`{logs_folder}/{process_id}`).
    pub fn dir(&self) -> &std::path::Path {
        &self.dir
    }

    /// Drive rotation and flushing. No-op when log capture is disabled.
    ///
    /// Called on every Runner loop iteration; also used at startup to
    /// attach to (or open) the current log file.
    pub async fn cycle(&self, store_logs: bool) -> ProcessResult<()> {
        if !store_logs {
            return Ok(());
        }
        let mut guard = self.inner.lock().await;

        let expired_id = match guard.as_ref() {
            None => return self.retrieve(&mut guard).await,
            Some(open) if self.expired(open.record.start_time) => Some(open.record.id),
            Some(_) => None,
        };

        if let Some(close_id) = expired_id {
            if let Some(open) = guard.take() {
                let _ = open.file.sync_all();
            }
            return self.open_new(&mut guard, Some(close_id)).await;
        }

        if let Some(open) = guard.as_mut() {
            let now = Utc::now();
            if now
                .signed_duration_since(open.last_flush)
                .to_std()
                .map_or(false, |since| since > self.flush_interval)
            {
                open.file
                    .sync_all()
                    .map_err(|e| self.logging_err(e.to_string()))?;
                open.last_flush = now;
            }
        }
        Ok(())
    }

    /// Append raw bytes, lazily opening the current log when none is open.
    pub async fn write(&self, bytes: &[u8]) -> ProcessResult<()> {
        let mut guard = self.inner.lock().await;
        if guard.is_none() {
            self.retrieve(&mut guard).await?;
        }
        let open = guard
            .as_mut()
            .ok_or_else(|| self.logging_err("no open log file"))?;
        open.file
            .write_all(bytes)
            .map_err(|e| self.logging_err(e.to_string()))
    }

    /// Fsync the open file, if any.
    pub async fn flush(&self) -> ProcessResult<()> {
        let mut guard = self.inner.lock().await;
        if let Some(open) = guard.as_mut() {
            open.file
                .sync_all()
                .map_err(|e| self.logging_err(e.to_string()))?;
            open.last_flush = Utc::now();
        }
        Ok(())
    }

    /// Flush, close, and set the row's `end_time`. After this neither the
    /// file nor the row is used again.
    pub async fn finalize(&self) -> ProcessResult<()> {
        let mut guard = self.inner.lock().await;
        let Some(open) = guard.take() else {
            return Ok(());
        };
        let _ = open.file.sync_all();
        drop(open.file);
        self.store
            .close_log_file(open.record.id, Utc::now())
            .await
            .map_err(ProcessError::Store)
    }

    /// Flush, close, then delete the whole per-process log directory.
    pub async fn finalize_on_delete(&self) -> ProcessResult<()> {
        let mut guard = self.inner.lock().await;
        if let Some(open) = guard.take() {
            let _ = open.file.sync_all();
        }
        match std::fs::remove_dir_all(&self.dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.logging_err(e.to_string())),
        }
    }

    /// Load the most recent log row and attach to it: reopen a current
    /// file for append, or open a fresh one when there is none, the last
    /// one has aged out, or its file has gone missing on disk.
    async fn retrieve(&self, guard: &mut Option<OpenLog>) -> ProcessResult<()> {
        let latest = self
            .store
            .latest_log_file(self.process_id)
            .await
            .map_err(ProcessError::Store)?;

        match latest {
            None => self.open_new(guard, None).await,
            Some(record) if self.expired(record.start_time) => {
                let close = record.end_time.is_none().then_some(record.id);
                self.open_new(guard, close).await
            }
            Some(record) => {
                match std::fs::OpenOptions::new().append(true).open(&record.path) {
                    Ok(file) => {
                        *guard = Some(OpenLog {
                            record,
                            file,
                            last_flush: Utc::now(),
                        });
                        Ok(())
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        // File deleted out from under us: finalize the row
                        // and start over.
                        warn!(
                            process_id = %self.process_id,
                            path = %record.path.display(),
                            "log file missing on disk, opening a fresh one"
                        );
                        if record.end_time.is_none() {
                            self.store
                                .close_log_file(record.id, Utc::now())
                                .await
                                .map_err(ProcessError::Store)?;
                        }
                        self.open_new(guard, None).await
                    }
                    Err(e) => Err(self.logging_err(e.to_string())),
                }
            }
        }
    }

    /// Create the next log file and its row. When `close` is given the
    /// store closes that row and inserts the successor in one atomic
    /// operation.
    async fn open_new(&self, guard: &mut Option<OpenLog>, close: Option<i64>) -> ProcessResult<()> {
        std::fs::create_dir_all(&self.dir).map_err(|e| self.logging_err(e.to_string()))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = std::fs::set_permissions(&self.dir, std::fs::Permissions::from_mode(0o755));
        }

        let now = Utc::now();
        let path = self.dir.join(format!("{}.procLog", now.timestamp()));
        let file = std::fs::File::create(&path).map_err(|e| self.logging_err(e.to_string()))?;

        let result = match close {
            Some(close_id) => {
                self.store
                    .rotate_log_file(Some(close_id), self.process_id, path.clone(), now)
                    .await
            }
            None => self.store.insert_log_file(self.process_id, path.clone(), now).await,
        };

        match result {
            Ok(record) => {
                debug!(
                    process_id = %self.process_id,
                    path = %record.path.display(),
                    "opened log file"
                );
                *guard = Some(OpenLog {
                    record,
                    file,
                    last_flush: now,
                });
                Ok(())
            }
            Err(e) => {
                // Do not leave an unindexed file behind.
                let _ = std::fs::remove_file(&path);
                Err(ProcessError::Store(e))
            }
        }
    }

    fn expired(&self, start_time: DateTime<Utc>) -> bool {
        Utc::now()
            .signed_duration_since(start_time)
            .to_std()
            .map_or(false, |age| age > self.timespan)
    }

    fn logging_err(&self, reason: impl Into<String>) -> ProcessError {
        ProcessError::logging(self.process_id.to_string(), reason)
    }
}
