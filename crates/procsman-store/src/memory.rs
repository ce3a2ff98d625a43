//! In-memory store backend.
//!
//! The reference implementation of [`Store`]: a single `RwLock` over
//! plain maps. Every composite operation holds the write lock for its
//! whole duration, which is what makes the "transactional" trait
//! operations atomic here.

use crate::{apply_spec, process_from_spec, NewUsageSample, Store};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use procsman_common::{
    Event, EventKind, GroupId, LogFileRecord, Process, ProcessGroup, ProcessId, ProcessSpec,
    Status, StoreError, StoreResult, UsageSample,
};
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Default)]
struct State {
    processes: HashMap<i64, Process>,
    groups: HashMap<i64, ProcessGroup>,
    events: Vec<Event>,
    samples: Vec<UsageSample>,
    log_files: Vec<LogFileRecord>,

    next_process_id: i64,
    next_group_id: i64,
    next_event_id: i64,
    next_sample_id: i64,
    next_log_id: i64,
}

impl State {
    fn new() -> Self {
        Self {
            next_process_id: 1,
            next_group_id: 1,
            next_event_id: 1,
            next_sample_id: 1,
            next_log_id: 1,
            ..Default::default()
        }
    }
}

/// In-memory [`Store`] backend.
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::new()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_process(&self, spec: ProcessSpec) -> StoreResult<Process> {
        let mut state = self.state.write();
        if let Some(group) = spec.group {
            if !state.groups.contains_key(&group.as_i64()) {
                return Err(StoreError::not_found(format!("group {}", group)));
            }
        }
        let id = state.next_process_id;
        state.next_process_id += 1;
        let process = process_from_spec(ProcessId::new(id), spec, Utc::now());
        state.processes.insert(id, process.clone());
        Ok(process)
    }

    async fn update_process(&self, id: ProcessId, spec: ProcessSpec) -> StoreResult<Process> {
        let mut state = self.state.write();
        if let Some(group) = spec.group {
            if !state.groups.contains_key(&group.as_i64()) {
                return Err(StoreError::not_found(format!("group {}", group)));
            }
        }
        let process = state
            .processes
            .get_mut(&id.as_i64())
            .ok_or_else(|| StoreError::not_found(format!("process {}", id)))?;
        apply_spec(process, spec);
        Ok(process.clone())
    }

    async fn get_process(&self, id: ProcessId) -> StoreResult<Process> {
        self.state
            .read()
            .processes
            .get(&id.as_i64())
            .cloned()
            .ok_or_else(|| StoreError::not_found(format!("process {}", id)))
    }

    async fn list_processes(&self) -> StoreResult<Vec<Process>> {
        let state = self.state.read();
        let mut processes: Vec<Process> = state.processes.values().cloned().collect();
        processes.sort_by_key(|p| p.id);
        Ok(processes)
    }

    async fn delete_process(&self, id: ProcessId) -> StoreResult<()> {
        let mut state = self.state.write();
        state
            .processes
            .remove(&id.as_i64())
            .ok_or_else(|| StoreError::not_found(format!("process {}", id)))?;
        // cascade
        state.events.retain(|e| e.process_id != id);
        state.samples.retain(|s| s.process_id != id);
        state.log_files.retain(|l| l.process_id != id);
        Ok(())
    }

    async fn set_process_status(&self, id: ProcessId, status: Status) -> StoreResult<()> {
        let mut state = self.state.write();
        let process = state
            .processes
            .get_mut(&id.as_i64())
            .ok_or_else(|| StoreError::not_found(format!("process {}", id)))?;
        process.status = status;
        Ok(())
    }

    async fn create_group(
        &self,
        name: String,
        color: Option<String>,
    ) -> StoreResult<ProcessGroup> {
        let mut state = self.state.write();
        if state.groups.values().any(|g| g.name == name) {
            return Err(StoreError::conflict(format!("group {:?}", name)));
        }
        let id = state.next_group_id;
        state.next_group_id += 1;
        let group = ProcessGroup {
            id: GroupId::new(id),
            name,
            color,
            created_at: Utc::now(),
        };
        state.groups.insert(id, group.clone());
        Ok(group)
    }

    async fn get_group(&self, id: GroupId) -> StoreResult<ProcessGroup> {
        self.state
            .read()
            .groups
            .get(&id.as_i64())
            .cloned()
            .ok_or_else(|| StoreError::not_found(format!("group {}", id)))
    }

    async fn list_groups(&self) -> StoreResult<Vec<ProcessGroup>> {
        let state = self.state.read();
        let mut groups: Vec<ProcessGroup> = state.groups.values().cloned().collect();
        groups.sort_by_key(|g| g.id.as_i64());
        Ok(groups)
    }

    async fn delete_group(&self, id: GroupId) -> StoreResult<()> {
        let mut state = self.state.write();
        state
            .groups
            .remove(&id.as_i64())
            .ok_or_else(|| StoreError::not_found(format!("group {}", id)))?;
        for process in state.processes.values_mut() {
            if process.group == Some(id) {
                process.group = None;
            }
        }
        Ok(())
    }

    async fn insert_event(
        &self,
        process_id: ProcessId,
        kind: EventKind,
        extra: Option<serde_json::Value>,
    ) -> StoreResult<Event> {
        let mut state = self.state.write();
        if !state.processes.contains_key(&process_id.as_i64()) {
            return Err(StoreError::not_found(format!("process {}", process_id)));
        }
        let id = state.next_event_id;
        state.next_event_id += 1;
        let event = Event {
            id,
            process_id,
            kind,
            created_at: Utc::now(),
            extra,
        };
        state.events.push(event.clone());
        Ok(event)
    }

    async fn events_since(
        &self,
        process_id: ProcessId,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<Event>> {
        Ok(self
            .state
            .read()
            .events
            .iter()
            .filter(|e| e.process_id == process_id && e.created_at >= since)
            .cloned()
            .collect())
    }

    async fn events_range(
        &self,
        process_id: ProcessId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<Event>> {
        Ok(self
            .state
            .read()
            .events
            .iter()
            .filter(|e| e.process_id == process_id && e.created_at >= from && e.created_at <= to)
            .cloned()
            .collect())
    }

    async fn insert_usage_sample(&self, sample: NewUsageSample) -> StoreResult<UsageSample> {
        let mut state = self.state.write();
        if !state.processes.contains_key(&sample.process_id.as_i64()) {
            return Err(StoreError::not_found(format!("process {}", sample.process_id)));
        }
        let id = state.next_sample_id;
        state.next_sample_id += 1;
        let row = UsageSample {
            id,
            process_id: sample.process_id,
            created_at: sample.created_at,
            cpu_nanos: sample.cpu_nanos,
            cpu_percent: sample.cpu_percent,
            memory_bytes: sample.memory_bytes,
        };
        state.samples.push(row.clone());
        Ok(row)
    }

    async fn samples_range(
        &self,
        process_id: ProcessId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<UsageSample>> {
        Ok(self
            .state
            .read()
            .samples
            .iter()
            .filter(|s| s.process_id == process_id && s.created_at >= from && s.created_at <= to)
            .cloned()
            .collect())
    }

    async fn insert_log_file(
        &self,
        process_id: ProcessId,
        path: PathBuf,
        start_time: DateTime<Utc>,
    ) -> StoreResult<LogFileRecord> {
        let mut state = self.state.write();
        if !state.processes.contains_key(&process_id.as_i64()) {
            return Err(StoreError::not_found(format!("process {}", process_id)));
        }
        let id = state.next_log_id;
        state.next_log_id += 1;
        let record = LogFileRecord {
            id,
            process_id,
            path,
            start_time,
            end_time: None,
        };
        state.log_files.push(record.clone());
        Ok(record)
    }

    async fn latest_log_file(&self, process_id: ProcessId) -> StoreResult<Option<LogFileRecord>> {
        Ok(self
            .state
            .read()
            .log_files
            .iter()
            .filter(|l| l.process_id == process_id)
            .max_by_key(|l| (l.start_time, l.id))
            .cloned())
    }

    async fn close_log_file(&self, id: i64, end_time: DateTime<Utc>) -> StoreResult<()> {
        let mut state = self.state.write();
        let record = state
            .log_files
            .iter_mut()
            .find(|l| l.id == id)
            .ok_or_else(|| StoreError::not_found(format!("log file {}", id)))?;
        record.end_time = Some(end_time);
        Ok(())
    }

    async fn rotate_log_file(
        &self,
        close: Option<i64>,
        process_id: ProcessId,
        new_path: PathBuf,
        start_time: DateTime<Utc>,
    ) -> StoreResult<LogFileRecord> {
        let mut state = self.state.write();
        if !state.processes.contains_key(&process_id.as_i64()) {
            return Err(StoreError::not_found(format!("process {}", process_id)));
        }
        if let Some(close_id) = close {
            let record = state
                .log_files
                .iter_mut()
                .find(|l| l.id == close_id)
                .ok_or_else(|| StoreError::not_found(format!("log file {}", close_id)))?;
            if record.end_time.is_none() {
                record.end_time = Some(start_time);
            }
        }
        let id = state.next_log_id;
        state.next_log_id += 1;
        let record = LogFileRecord {
            id,
            process_id,
            path: new_path,
            start_time,
            end_time: None,
        };
        state.log_files.push(record.clone());
        Ok(record)
    }

    async fn log_files_range(
        &self,
        process_id: ProcessId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<LogFileRecord>> {
        // A file overlaps the range when it started before `to` and either
        // is still open or ended after `from`.
        Ok(self
            .state
            .read()
            .log_files
            .iter()
            .filter(|l| {
                l.process_id == process_id
                    && l.start_time <= to
                    && l.end_time.map_or(true, |end| end >= from)
            })
            .cloned()
            .collect())
    }
}
