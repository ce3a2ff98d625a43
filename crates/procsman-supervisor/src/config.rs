//! Static configuration (`config.json`) and the user-editable mirror of
//! the per-process defaults (`default_process_config.json`).

use anyhow::{bail, Context, Result};
use procsman_common::Configuration;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Contents of `config.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcsmanConfig {
    /// Store backend connection string.
    pub db: String,
    pub logs_folder: PathBuf,
    /// Seconds; at least 60.
    pub log_file_timespan: u64,
    /// Milliseconds; at least 100.
    pub flush_interval: u64,
    /// Seconds; at least 1.
    pub process_stats_interval: u64,
}

impl ProcsmanConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let mut config: ProcsmanConfig =
            serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check bounds and resolve `logs_folder` to an absolute path.
    pub fn validate(&mut self) -> Result<()> {
        if self.db.is_empty() {
            bail!("empty db");
        }
        if self.logs_folder.as_os_str().is_empty() {
            bail!("empty logs_folder");
        }

        let meta = std::fs::metadata(&self.logs_folder)
            .with_context(|| format!("stat {}", self.logs_folder.display()))?;
        if !meta.is_dir() {
            bail!("logs_folder is not a folder");
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = meta.permissions().mode();
            if mode & 0o200 == 0 {
                bail!("logs_folder is not writable");
            }
            if mode & 0o100 == 0 {
                bail!("logs_folder is not executable");
            }
        }
        self.logs_folder = self
            .logs_folder
            .canonicalize()
            .with_context(|| format!("resolving {}", self.logs_folder.display()))?;

        if self.log_file_timespan < 60 {
            bail!("log_file_timespan must be at least 1 minute");
        }
        if self.flush_interval < 100 {
            bail!("flush_interval must be at least 100 milliseconds");
        }
        if self.process_stats_interval < 1 {
            bail!("process_stats_interval must be at least 1 second");
        }
        Ok(())
    }

    pub fn log_file_timespan(&self) -> Duration {
        Duration::from_secs(self.log_file_timespan)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval)
    }

    pub fn process_stats_interval(&self) -> Duration {
        Duration::from_secs(self.process_stats_interval)
    }
}

/// Load the per-process configuration defaults, bootstrapping the file
/// with the built-in values when it is missing or empty.
pub fn load_or_create_defaults(path: &Path) -> Result<Configuration> {
    let write_builtin = || -> Result<Configuration> {
        let defaults = Configuration::builtin_defaults();
        let raw = serde_json::to_string_pretty(&defaults)?;
        std::fs::write(path, raw).with_context(|| format!("writing {}", path.display()))?;
        Ok(defaults)
    };

    match std::fs::metadata(path) {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => write_builtin(),
        Err(e) => Err(e).with_context(|| format!("stat {}", path.display())),
        Ok(meta) if meta.is_dir() => bail!("{} is a directory", path.display()),
        Ok(meta) if meta.len() == 0 => write_builtin(),
        Ok(_) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
        }
    }
}
