//! Admin operations: the semantic surface the HTTP layer is built on.
//!
//! Each request type validates itself and recurses into its nested
//! request types explicitly; every failure maps to a stable machine code
//! plus an HTTP-style status via [`AdminError`].

use crate::runner::Signal;
use crate::supervisor::Supervisor;
use chrono::{DateTime, Duration, Utc};
use procsman_common::{
    AdminError, AdminResult, Configuration, Event, GroupId, Process, ProcessError, ProcessGroup,
    ProcessId, ProcessSpec, Status, UsageSample,
};
use procsman_logs::collapse_repeated_lines;
use procsman_store::needs_refresh;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

/// Payload for creating a process. `group` and `new_group` are mutually
/// layered: an explicit group id wins; otherwise `create_new_group`
/// creates one inline.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateProcessRequest {
    pub name: String,
    #[serde(default)]
    pub group: Option<GroupId>,
    #[serde(default)]
    pub create_new_group: bool,
    #[serde(default)]
    pub new_group: Option<CreateGroupRequest>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub executable_path: String,
    #[serde(default)]
    pub arguments: String,
    #[serde(default)]
    pub working_dir: String,
    #[serde(default)]
    pub environment: HashMap<String, String>,
    #[serde(default, rename = "config")]
    pub configuration: Configuration,
}

/// Payload for updating a process; identical shape to creation.
pub type UpdateProcessRequest = CreateProcessRequest;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateGroupRequest {
    pub name: String,
    #[serde(default)]
    pub color: Option<String>,
}

/// One log file's collapsed contents within a query range.
#[derive(Debug, Clone, Serialize)]
pub struct LogPiece {
    pub from: i64,
    pub to: i64,
    pub text: String,
    pub missing: bool,
}

impl CreateGroupRequest {
    async fn validate(&self, admin: &AdminService) -> AdminResult<()> {
        if self.name.is_empty() {
            return Err(AdminError::NameRequired);
        }
        let groups = admin
            .supervisor
            .store()
            .list_groups()
            .await
            .map_err(AdminError::internal)?;
        if groups.iter().any(|g| g.name == self.name) {
            return Err(AdminError::GroupAlreadyExists);
        }
        Ok(())
    }
}

impl CreateProcessRequest {
    /// Validate the request, resolving the effective working directory.
    /// Recurses into the nested group request explicitly.
    async fn validate(&mut self, admin: &AdminService) -> AdminResult<()> {
        if self.name.is_empty() {
            return Err(AdminError::NameRequired);
        }
        if self.executable_path.is_empty() {
            return Err(AdminError::ExecutableRequired);
        }
        let resolved = check_executable(&self.executable_path)?;

        if !self.working_dir.is_empty() {
            let meta = std::fs::metadata(&self.working_dir)
                .map_err(|_| AdminError::WorkingDirNotFound)?;
            if !meta.is_dir() {
                return Err(AdminError::WorkingDirNotDir);
            }
        } else {
            self.working_dir = resolved
                .parent()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default();
        }

        if let Some(group) = self.group {
            admin
                .supervisor
                .store()
                .get_group(group)
                .await
                .map_err(|_| AdminError::InvalidGroup)?;
        } else if self.create_new_group {
            match &self.new_group {
                Some(new_group) => new_group.validate(admin).await?,
                None => return Err(AdminError::NameRequired),
            }
        }
        Ok(())
    }

    fn into_spec(self, group: Option<GroupId>) -> ProcessSpec {
        ProcessSpec {
            name: self.name,
            group,
            color: self.color,
            enabled: self.enabled,
            executable_path: self.executable_path,
            arguments: self.arguments,
            working_dir: self.working_dir,
            environment: self.environment,
            configuration: self.configuration,
        }
    }
}

/// Map the path-resolution errors onto the admin taxonomy.
fn check_executable(path: &str) -> AdminResult<std::path::PathBuf> {
    procsman_process::resolve_executable(path).map_err(|e| match e {
        ProcessError::ExecutableNotFound { .. } => AdminError::ExecutableNotFound,
        ProcessError::ExecutableNotFile { .. } => AdminError::ExecutableNotFile,
        ProcessError::ExecutableNotExecutable { .. } => AdminError::ExecutableNotExecutable,
        other => AdminError::internal(other),
    })
}

/// The semantic admin operations, free of any transport concerns.
#[derive(Clone)]
pub struct AdminService {
    supervisor: Supervisor,
}

impl AdminService {
    pub fn new(supervisor: Supervisor) -> Self {
        Self { supervisor }
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    pub async fn list_processes(&self) -> AdminResult<Vec<Process>> {
        self.supervisor
            .store()
            .list_processes()
            .await
            .map_err(AdminError::internal)
    }

    pub async fn get_process(&self, id: ProcessId) -> AdminResult<Process> {
        self.supervisor
            .store()
            .get_process(id)
            .await
            .map_err(AdminError::from)
    }

    pub async fn create_process(&self, mut req: CreateProcessRequest) -> AdminResult<Process> {
        req.validate(self).await?;

        let group = match (req.group, req.create_new_group) {
            (Some(group), _) => Some(group),
            (None, true) => {
                let new_group = req.new_group.clone().unwrap_or_default();
                let created = self
                    .supervisor
                    .store()
                    .create_group(new_group.name, new_group.color)
                    .await
                    .map_err(AdminError::internal)?;
                Some(created.id)
            }
            (None, false) => None,
        };

        let process = self
            .supervisor
            .store()
            .create_process(req.into_spec(group))
            .await
            .map_err(AdminError::internal)?;
        self.supervisor.add_runner(process.clone());
        Ok(process)
    }

    /// Update a process; when any of the supervision-relevant fields
    /// changed, the Runner is told to `Refresh`.
    pub async fn update_process(
        &self,
        id: ProcessId,
        mut req: UpdateProcessRequest,
    ) -> AdminResult<Process> {
        let existing = self.get_process(id).await?;
        req.validate(self).await?;

        let group = match (req.group, req.create_new_group) {
            (Some(group), _) => Some(group),
            (None, true) => {
                let new_group = req.new_group.clone().unwrap_or_default();
                let created = self
                    .supervisor
                    .store()
                    .create_group(new_group.name, new_group.color)
                    .await
                    .map_err(AdminError::internal)?;
                Some(created.id)
            }
            (None, false) => None,
        };

        let spec = req.into_spec(group);
        let refresh = needs_refresh(&existing, &spec, self.supervisor.defaults());

        let updated = self
            .supervisor
            .store()
            .update_process(id, spec)
            .await
            .map_err(AdminError::from)?;

        if refresh && !self.supervisor.signal(id, Signal::Refresh).await {
            warn!(process_id = %id, "no runner to refresh");
        }
        Ok(updated)
    }

    /// Delete a process: the Runner purges its on-disk logs; the row
    /// deletion cascades to events, samples, and the log-file index.
    pub async fn delete_process(&self, id: ProcessId) -> AdminResult<()> {
        self.get_process(id).await?;
        self.supervisor.remove_runner(id);
        self.supervisor
            .store()
            .delete_process(id)
            .await
            .map_err(AdminError::from)
    }

    /// Route `Start` / `Stop` / `Restart` into the Runner.
    pub async fn signal(&self, id: ProcessId, signal: Signal) -> AdminResult<()> {
        debug_assert!(matches!(
            signal,
            Signal::Start | Signal::Stop | Signal::Restart
        ));
        self.get_process(id).await?;
        if !self.supervisor.signal(id, signal).await {
            return Err(AdminError::internal(format!("no runner for process {}", id)));
        }
        Ok(())
    }

    pub async fn write_stdin(&self, id: ProcessId, text: String) -> AdminResult<()> {
        if text.is_empty() {
            return Err(AdminError::TextRequired);
        }
        let process = self.get_process(id).await?;
        if !process.enabled || process.status != Status::Running {
            return Err(AdminError::ProcessNotRunning);
        }
        if !self.supervisor.write_stdin(id, text).await {
            return Err(AdminError::internal(format!("no runner for process {}", id)));
        }
        Ok(())
    }

    /// Events within `[from, to]`; defaults to the full journal up to now.
    pub async fn events(
        &self,
        id: ProcessId,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
        limit: Option<usize>,
    ) -> AdminResult<Vec<Event>> {
        self.get_process(id).await?;
        let from = from.unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        let to = to.unwrap_or_else(Utc::now);
        let mut events = self
            .supervisor
            .store()
            .events_range(id, from, to)
            .await
            .map_err(AdminError::internal)?;
        if let Some(limit) = limit {
            events.truncate(limit);
        }
        Ok(events)
    }

    /// Usage samples within `[from, to]`; defaults to the trailing day.
    pub async fn stats(
        &self,
        id: ProcessId,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> AdminResult<Vec<UsageSample>> {
        self.get_process(id).await?;
        let to = to.unwrap_or_else(Utc::now);
        let from = from.unwrap_or_else(|| to - Duration::hours(24));
        self.supervisor
            .store()
            .samples_range(id, from, to)
            .await
            .map_err(AdminError::internal)
    }

    /// Collapsed log contents within `[from, to]`; defaults to the
    /// trailing day. Files missing on disk yield a `missing` piece.
    pub async fn logs(
        &self,
        id: ProcessId,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> AdminResult<Vec<LogPiece>> {
        self.get_process(id).await?;
        let to = to.unwrap_or_else(Utc::now);
        let from = from.unwrap_or_else(|| to - Duration::hours(24));
        let records = self
            .supervisor
            .store()
            .log_files_range(id, from, to)
            .await
            .map_err(AdminError::internal)?;

        let mut pieces = Vec::with_capacity(records.len());
        for record in records {
            let mut piece = LogPiece {
                from: record.start_time.timestamp(),
                to: record.end_time.map(|t| t.timestamp()).unwrap_or(0),
                text: String::new(),
                missing: false,
            };
            match std::fs::read_to_string(&record.path) {
                Ok(raw) => piece.text = collapse_repeated_lines(&raw),
                Err(_) => piece.missing = true,
            }
            pieces.push(piece);
        }
        Ok(pieces)
    }

    pub async fn create_group(&self, req: CreateGroupRequest) -> AdminResult<ProcessGroup> {
        req.validate(self).await?;
        self.supervisor
            .store()
            .create_group(req.name, req.color)
            .await
            .map_err(AdminError::internal)
    }

    pub async fn list_groups(&self) -> AdminResult<Vec<ProcessGroup>> {
        self.supervisor
            .store()
            .list_groups()
            .await
            .map_err(AdminError::internal)
    }

    pub async fn get_group(&self, id: GroupId) -> AdminResult<ProcessGroup> {
        self.supervisor
            .store()
            .get_group(id)
            .await
            .map_err(|e| match e {
                procsman_common::StoreError::NotFound { .. } => AdminError::GroupNotFound,
                other => AdminError::internal(other),
            })
    }

    pub async fn delete_group(&self, id: GroupId) -> AdminResult<()> {
        self.get_group(id).await?;
        self.supervisor
            .store()
            .delete_group(id)
            .await
            .map_err(AdminError::internal)
    }

    /// The loaded per-process configuration defaults.
    pub fn default_configuration(&self) -> Configuration {
        self.supervisor.defaults().clone()
    }
}
