//! Append-only JSON-lines record of backup activity.

use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use wareflow_common::{Error, Result};

use crate::manager::BackupKind;

pub const JOURNAL_FILE: &str = "backup_events.jsonl";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupEventKind {
    Start,
    Success,
    Failure,
    Verify,
    Restore,
    Cleanup,
    SchedulerStart,
    SchedulerStop,
    /// A scheduled run that did not attempt a backup.
    Skipped,
}

impl BackupEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupEventKind::Start => "start",
            BackupEventKind::Success => "success",
            BackupEventKind::Failure => "failure",
            BackupEventKind::Verify => "verify",
            BackupEventKind::Restore => "restore",
            BackupEventKind::Cleanup => "cleanup",
            BackupEventKind::SchedulerStart => "scheduler_start",
            BackupEventKind::SchedulerStop => "scheduler_stop",
            BackupEventKind::Skipped => "skipped",
        }
    }
}

impl fmt::Display for BackupEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupEvent {
    pub timestamp: DateTime<Utc>,
    pub event: BackupEventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<BackupKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl BackupEvent {
    pub fn new(event: BackupEventKind) -> Self {
        Self {
            timestamp: Utc::now(),
            event,
            kind: None,
            path: None,
            size_bytes: None,
            duration_secs: None,
            error: None,
            details: None,
        }
    }

    pub fn kind(mut self, kind: BackupKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn path(mut self, path: &Path) -> Self {
        self.path = Some(path.to_path_buf());
        self
    }

    pub fn size(mut self, bytes: u64) -> Self {
        self.size_bytes = Some(bytes);
        self
    }

    pub fn duration(mut self, elapsed: Duration) -> Self {
        self.duration_secs = Some(elapsed.as_secs_f64());
        self
    }

    pub fn error(mut self, message: impl Into<String>) -> Self {
        self.error = Some(message.into());
        self
    }

    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Backup outcomes summarised from the journal. Only `success` and `failure`
/// events count as backups.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BackupStatistics {
    pub total_backups: usize,
    pub successful_backups: usize,
    pub failed_backups: usize,
    pub skipped_runs: usize,
    pub last_backup: Option<DateTime<Utc>>,
    pub last_successful_backup: Option<DateTime<Utc>>,
    /// Mean over successes that recorded a duration.
    pub average_duration_secs: Option<f64>,
    /// Bytes written by successful backups, including ones since rotated away.
    pub total_size_bytes: u64,
}

impl BackupStatistics {
    pub fn from_events(events: &[BackupEvent]) -> Self {
        let mut stats = Self::default();
        let mut durations = Vec::new();

        for event in events {
            match event.event {
                BackupEventKind::Success => {
                    stats.successful_backups += 1;
                    stats.last_successful_backup =
                        stats.last_successful_backup.max(Some(event.timestamp));
                    durations.extend(event.duration_secs);
                    stats.total_size_bytes += event.size_bytes.unwrap_or(0);
                }
                BackupEventKind::Failure => stats.failed_backups += 1,
                BackupEventKind::Skipped => {
                    stats.skipped_runs += 1;
                    continue;
                }
                _ => continue,
            }
            stats.total_backups += 1;
            stats.last_backup = stats.last_backup.max(Some(event.timestamp));
        }

        if !durations.is_empty() {
            stats.average_duration_secs =
                Some(durations.iter().sum::<f64>() / durations.len() as f64);
        }
        stats
    }

    /// Share of attempted backups that succeeded, in percent.
    pub fn success_rate(&self) -> Option<f64> {
        (self.total_backups > 0)
            .then(|| self.successful_backups as f64 * 100.0 / self.total_backups as f64)
    }
}

pub struct BackupJournal {
    path: PathBuf,
    // Serializes appends from the scheduler and foreground commands.
    write_lock: Mutex<()>,
}

impl BackupJournal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// The journal kept alongside backups in `backup_dir`.
    pub fn in_dir(backup_dir: &Path) -> Self {
        Self::new(backup_dir.join(JOURNAL_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&self, event: &BackupEvent) -> Result<()> {
        let line = serde_json::to_string(event)?;
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| Error::Backup("backup journal lock poisoned".into()))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    /// The `limit` most recent events, newest first. Unreadable lines are skipped.
    pub fn history(&self, limit: usize) -> Result<Vec<BackupEvent>> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut events: Vec<BackupEvent> = contents
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str(line) {
                Ok(event) => Some(event),
                Err(e) => {
                    warn!("skipping malformed backup journal line: {e}");
                    None
                }
            })
            .collect();

        events.reverse();
        events.truncate(limit);
        Ok(events)
    }

    pub fn statistics(&self) -> Result<BackupStatistics> {
        Ok(BackupStatistics::from_events(&self.history(usize::MAX)?))
    }
}
