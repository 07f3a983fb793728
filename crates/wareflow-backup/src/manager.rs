use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{Local, NaiveDateTime, TimeDelta};
use rusqlite::{Connection, OpenFlags, params};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use wareflow_common::{Error, Result};
use wareflow_db::Snapshotter;

use crate::journal::{BackupEvent, BackupEventKind, BackupJournal};

const FILE_PREFIX: &str = "wareflow_";
const FILE_EXTENSION: &str = "db";
const STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupKind {
    Manual,
    Scheduled,
    PreMigration,
    PreRestore,
}

impl BackupKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupKind::Manual => "manual",
            BackupKind::Scheduled => "scheduled",
            BackupKind::PreMigration => "pre_migration",
            BackupKind::PreRestore => "pre_restore",
        }
    }
}

impl fmt::Display for BackupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupInfo {
    pub path: PathBuf,
    pub file_name: String,
    pub size_bytes: u64,
    /// Local time the snapshot was taken.
    pub created: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupVerification {
    pub path: PathBuf,
    pub valid: bool,
    /// `ok`, or what SQLite reported instead.
    pub integrity: String,
    pub employee_count: Option<i64>,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackupStats {
    pub total_count: usize,
    pub total_size_bytes: u64,
    pub oldest: Option<NaiveDateTime>,
    pub newest: Option<NaiveDateTime>,
}

/// Creates, rotates, verifies and restores snapshots of one database file.
pub struct BackupManager {
    db_path: PathBuf,
    backup_dir: PathBuf,
    max_backups: usize,
    journal: Option<BackupJournal>,
}

impl BackupManager {
    /// `max_backups == 0` keeps every backup.
    pub fn new(db_path: impl Into<PathBuf>, backup_dir: impl Into<PathBuf>, max_backups: usize) -> Self {
        Self {
            db_path: db_path.into(),
            backup_dir: backup_dir.into(),
            max_backups,
            journal: None,
        }
    }

    pub fn with_journal(mut self, journal: BackupJournal) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    pub fn max_backups(&self) -> usize {
        self.max_backups
    }

    pub fn journal(&self) -> Option<&BackupJournal> {
        self.journal.as_ref()
    }

    pub(crate) fn log(&self, event: BackupEvent) {
        if let Some(journal) = &self.journal {
            if let Err(e) = journal.record(&event) {
                warn!("failed to write backup journal: {e}");
            }
        }
    }

    /// Snapshot the database and rotate old backups.
    pub fn create_backup(&self, kind: BackupKind, description: Option<&str>) -> Result<PathBuf> {
        info!("backup started ({kind})");
        self.log(BackupEvent::new(BackupEventKind::Start).kind(kind));
        let start = Instant::now();

        match self.write_snapshot(kind, description) {
            Ok(path) => {
                let size = file_size(&path);
                let elapsed = start.elapsed();
                info!(
                    "backup succeeded ({kind}): {} ({} bytes, {:.2}s)",
                    path.display(),
                    size,
                    elapsed.as_secs_f64()
                );
                self.log(
                    BackupEvent::new(BackupEventKind::Success)
                        .kind(kind)
                        .path(&path)
                        .size(size)
                        .duration(elapsed),
                );
                self.rotate()?;
                Ok(path)
            }
            Err(e) => {
                warn!("backup failed ({kind}): {e}");
                self.log(
                    BackupEvent::new(BackupEventKind::Failure)
                        .kind(kind)
                        .error(e.to_string()),
                );
                Err(e)
            }
        }
    }

    fn write_snapshot(&self, kind: BackupKind, description: Option<&str>) -> Result<PathBuf> {
        if !self.db_path.exists() {
            return Err(Error::NotFound(format!(
                "database file {}",
                self.db_path.display()
            )));
        }
        std::fs::create_dir_all(&self.backup_dir)?;

        let label = match (description, kind) {
            (Some(d), _) => Some(d.to_string()),
            (None, BackupKind::Manual) => None,
            (None, other) => Some(other.as_str().to_string()),
        };
        let target = self.unique_target(&backup_file_name(
            Local::now().naive_local(),
            label.as_deref(),
        ));

        let conn = Connection::open(&self.db_path)
            .map_err(|e| Error::Backup(format!("failed to open database for backup: {e}")))?;
        conn.execute(
            "VACUUM INTO ?1",
            params![target.to_string_lossy().into_owned()],
        )
        .map_err(|e| Error::Backup(format!("snapshot to {} failed: {e}", target.display())))?;

        Ok(target)
    }

    fn unique_target(&self, file_name: &str) -> PathBuf {
        let candidate = self.backup_dir.join(file_name);
        if !candidate.exists() {
            return candidate;
        }
        let stem = file_name.trim_end_matches(".db");
        (2..)
            .map(|n| self.backup_dir.join(format!("{stem}-{n}.{FILE_EXTENSION}")))
            .find(|p| !p.exists())
            .unwrap_or(candidate)
    }

    /// Delete the oldest backups beyond `max_backups`. Returns what was removed.
    pub fn rotate(&self) -> Result<Vec<PathBuf>> {
        if self.max_backups == 0 {
            return Ok(Vec::new());
        }

        let backups = self.list_backups()?;
        let mut removed = Vec::new();
        for old in backups.iter().skip(self.max_backups) {
            match std::fs::remove_file(&old.path) {
                Ok(()) => {
                    debug!("removed old backup {}", old.file_name);
                    removed.push(old.path.clone());
                }
                Err(e) => warn!("failed to remove old backup {}: {e}", old.path.display()),
            }
        }

        if !removed.is_empty() {
            info!("rotated {} old backup(s)", removed.len());
            self.log(
                BackupEvent::new(BackupEventKind::Cleanup)
                    .details(serde_json::json!({ "removed": removed.len() })),
            );
        }
        Ok(removed)
    }

    /// Backups in the backup directory, newest first.
    pub fn list_backups(&self) -> Result<Vec<BackupInfo>> {
        if !self.backup_dir.exists() {
            return Ok(Vec::new());
        }

        let mut backups = Vec::new();
        for entry in std::fs::read_dir(&self.backup_dir)? {
            let entry = entry?;
            let path = entry.path();
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string)
            else {
                continue;
            };
            if !is_backup_file(&file_name) || !path.is_file() {
                continue;
            }

            let metadata = entry.metadata()?;
            let created = parse_backup_time(&file_name).unwrap_or_else(|| {
                metadata
                    .modified()
                    .map(|t| chrono::DateTime::<Local>::from(t).naive_local())
                    .unwrap_or_default()
            });
            backups.push(BackupInfo {
                path,
                file_name,
                size_bytes: metadata.len(),
                created,
            });
        }

        backups.sort_by(|a, b| {
            b.created
                .cmp(&a.created)
                .then_with(|| b.file_name.cmp(&a.file_name))
        });
        Ok(backups)
    }

    /// Open a backup read-only and check it is a sound database.
    pub fn verify_backup(&self, path: &Path) -> Result<BackupVerification> {
        if !path.is_file() {
            return Err(Error::NotFound(format!("backup file {}", path.display())));
        }

        let mut verification = BackupVerification {
            path: path.to_path_buf(),
            valid: false,
            integrity: String::new(),
            employee_count: None,
            size_bytes: file_size(path),
        };

        match inspect(path) {
            Ok((integrity, employee_count)) => {
                verification.valid = integrity == "ok";
                verification.integrity = integrity;
                verification.employee_count = employee_count;
            }
            Err(e) => verification.integrity = e.to_string(),
        }

        info!(
            "verified backup {}: {}",
            path.display(),
            if verification.valid { "valid" } else { "invalid" }
        );
        let mut event = BackupEvent::new(BackupEventKind::Verify)
            .path(path)
            .details(serde_json::json!({
                "valid": verification.valid,
                "employee_count": verification.employee_count,
            }));
        if !verification.valid {
            event = event.error(verification.integrity.clone());
        }
        self.log(event);

        Ok(verification)
    }

    /// Replace the database with `backup`.
    ///
    /// The backup is verified first and the current database is snapshotted
    /// as `pre_restore`. No connection to the database may be open. Returns
    /// the safety snapshot, if one was taken.
    pub fn restore_backup(&self, backup: &Path) -> Result<Option<PathBuf>> {
        let verification = self.verify_backup(backup)?;
        if !verification.valid {
            return Err(Error::Backup(format!(
                "refusing to restore {}: {}",
                backup.display(),
                verification.integrity
            )));
        }

        // Stage the copy first: rotation below may delete `backup` itself.
        let staged = sidecar(&self.db_path, ".restore-tmp");
        if let Some(parent) = self.db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(backup, &staged)?;

        let safety = if self.db_path.exists() {
            match self.create_backup(BackupKind::PreRestore, None) {
                Ok(path) => Some(path),
                Err(e) => {
                    let _ = std::fs::remove_file(&staged);
                    return Err(e);
                }
            }
        } else {
            None
        };

        swap_in(&staged, &self.db_path)?;
        for suffix in ["-wal", "-shm"] {
            let path = sidecar(&self.db_path, suffix);
            if path.exists() {
                std::fs::remove_file(&path)?;
            }
        }

        info!(
            "database restored from {} to {}",
            backup.display(),
            self.db_path.display()
        );
        self.log(BackupEvent::new(BackupEventKind::Restore).path(backup));
        Ok(safety)
    }

    pub fn stats(&self) -> Result<BackupStats> {
        let backups = self.list_backups()?;
        Ok(BackupStats {
            total_count: backups.len(),
            total_size_bytes: backups.iter().map(|b| b.size_bytes).sum(),
            oldest: backups.last().map(|b| b.created),
            newest: backups.first().map(|b| b.created),
        })
    }
}

impl Snapshotter for BackupManager {
    fn snapshot(&self, label: &str) -> Result<PathBuf> {
        self.create_backup(BackupKind::PreMigration, Some(label))
    }
}

/// `wareflow_<YYYYMMDD_HHMMSS_mmm>[_<slug>].db`
pub fn backup_file_name(at: NaiveDateTime, description: Option<&str>) -> String {
    let stamp = at.format("%Y%m%d_%H%M%S_%3f");
    match description.map(slugify).filter(|s| !s.is_empty()) {
        Some(slug) => format!("{FILE_PREFIX}{stamp}_{slug}.{FILE_EXTENSION}"),
        None => format!("{FILE_PREFIX}{stamp}.{FILE_EXTENSION}"),
    }
}

fn slugify(description: &str) -> String {
    let mut slug = String::with_capacity(description.len());
    for c in description.trim().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('_') {
            slug.push('_');
        }
    }
    slug.trim_matches('_').chars().take(40).collect()
}

fn is_backup_file(file_name: &str) -> bool {
    file_name.starts_with(FILE_PREFIX) && file_name.ends_with(".db")
}

/// Timestamp embedded in a backup file name.
fn parse_backup_time(file_name: &str) -> Option<NaiveDateTime> {
    let rest = file_name.strip_prefix(FILE_PREFIX)?;
    let seconds = NaiveDateTime::parse_from_str(rest.get(..15)?, STAMP_FORMAT).ok()?;
    let millis: i64 = rest.get(16..19)?.parse().ok()?;
    seconds.checked_add_signed(TimeDelta::milliseconds(millis))
}

fn inspect(path: &Path) -> Result<(String, Option<i64>)> {
    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
    let integrity: String = conn.query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
    let has_employees: bool = conn.query_row(
        "SELECT count(*) > 0 FROM sqlite_master WHERE type = 'table' AND name = 'employees'",
        [],
        |row| row.get(0),
    )?;
    let employee_count = if has_employees {
        Some(conn.query_row("SELECT COUNT(*) FROM employees", [], |row| row.get(0))?)
    } else {
        None
    };
    Ok((integrity, employee_count))
}

fn sidecar(db_path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(db_path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// Move a staged copy over `target`. The staged file does not outlive a
/// failed move.
fn swap_in(staged: &Path, target: &Path) -> std::io::Result<()> {
    std::fs::rename(staged, target).inspect_err(|_| {
        let _ = std::fs::remove_file(staged);
    })
}

fn file_size(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use wareflow_db::Database;

    use super::*;

    fn database(dir: &Path) -> PathBuf {
        let path = dir.join("ems.db");
        let db = Database::open(&path).unwrap();
        let conn = db.connection().unwrap();
        conn.execute(
            "INSERT INTO employees (id, first_name, last_name, current_status, workspace, role,
                                    contract_type, entry_date, created_at, updated_at)
             VALUES ('e1', 'Alice', 'Martin', 'active', 'Quai', 'Cariste', 'CDI', '2024-01-01',
                     '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z')",
            [],
        )
        .unwrap();
        path
    }

    fn stamp(h: u32, m: u32, s: u32, ms: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 2, 3)
            .unwrap()
            .and_hms_milli_opt(h, m, s, ms)
            .unwrap()
    }

    #[test]
    fn file_names_embed_timestamp_and_slug() {
        assert_eq!(
            backup_file_name(stamp(14, 5, 9, 42), None),
            "wareflow_20260203_140509_042.db"
        );
        assert_eq!(
            backup_file_name(stamp(14, 5, 9, 42), Some("Avant import Excel!")),
            "wareflow_20260203_140509_042_avant_import_excel.db"
        );
        assert_eq!(
            parse_backup_time("wareflow_20260203_140509_042_avant_import_excel.db"),
            Some(stamp(14, 5, 9, 42))
        );
        assert_eq!(parse_backup_time("wareflow_notes.db"), None);
    }

    #[test]
    fn creates_readable_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = database(dir.path());
        let manager = BackupManager::new(&db_path, dir.path().join("backups"), 0);

        let path = manager.create_backup(BackupKind::Manual, Some("before audit")).unwrap();
        assert!(path.file_name().unwrap().to_str().unwrap().ends_with("_before_audit.db"));

        let verification = manager.verify_backup(&path).unwrap();
        assert!(verification.valid);
        assert_eq!(verification.integrity, "ok");
        assert_eq!(verification.employee_count, Some(1));
    }

    #[test]
    fn non_manual_backups_are_labelled_by_kind() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = database(dir.path());
        let manager = BackupManager::new(&db_path, dir.path().join("backups"), 0);

        let path = manager.snapshot("pre_migration").unwrap();
        assert!(path.to_string_lossy().ends_with("_pre_migration.db"));
        let path = manager.create_backup(BackupKind::Scheduled, None).unwrap();
        assert!(path.to_string_lossy().ends_with("_scheduled.db"));
    }

    #[test]
    fn rotation_keeps_newest() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = database(dir.path());
        let backups = dir.path().join("backups");
        std::fs::create_dir_all(&backups).unwrap();
        for name in [
            "wareflow_20250101_020000_000.db",
            "wareflow_20250102_020000_000.db",
            "wareflow_20250103_020000_000.db",
        ] {
            std::fs::write(backups.join(name), b"old").unwrap();
        }
        std::fs::write(backups.join("notes.txt"), b"keep me").unwrap();

        let manager = BackupManager::new(&db_path, &backups, 2);
        let newest = manager.create_backup(BackupKind::Manual, None).unwrap();

        let names: Vec<String> = manager
            .list_backups()
            .unwrap()
            .into_iter()
            .map(|b| b.file_name)
            .collect();
        assert_eq!(names.len(), 2);
        assert_eq!(names[0], newest.file_name().unwrap().to_str().unwrap());
        assert_eq!(names[1], "wareflow_20250103_020000_000.db");
        assert!(backups.join("notes.txt").exists());
    }

    #[test]
    fn zero_max_backups_keeps_everything() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = database(dir.path());
        let manager = BackupManager::new(&db_path, dir.path().join("backups"), 0);
        for _ in 0..3 {
            manager.create_backup(BackupKind::Manual, None).unwrap();
        }
        assert_eq!(manager.list_backups().unwrap().len(), 3);
        assert!(manager.rotate().unwrap().is_empty());
    }

    #[test]
    fn missing_database_fails_and_is_journaled() {
        let dir = tempfile::tempdir().unwrap();
        let journal = BackupJournal::new(dir.path().join("events.jsonl"));
        let manager = BackupManager::new(dir.path().join("absent.db"), dir.path().join("backups"), 5)
            .with_journal(journal);

        let err = manager.create_backup(BackupKind::Scheduled, None).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));

        let events = manager.journal().unwrap().history(10).unwrap();
        assert_eq!(events[0].event, BackupEventKind::Failure);
        assert_eq!(events[1].event, BackupEventKind::Start);
    }

    #[test]
    fn verify_flags_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let bogus = dir.path().join("wareflow_20250101_000000_000.db");
        std::fs::write(&bogus, b"definitely not sqlite").unwrap();
        let manager = BackupManager::new(dir.path().join("ems.db"), dir.path(), 0);

        let verification = manager.verify_backup(&bogus).unwrap();
        assert!(!verification.valid);
        assert!(verification.employee_count.is_none());
        assert!(matches!(
            manager.verify_backup(&dir.path().join("gone.db")),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn restore_replaces_database_and_keeps_safety_copy() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = database(dir.path());
        let manager = BackupManager::new(&db_path, dir.path().join("backups"), 0);
        let backup = manager.create_backup(BackupKind::Manual, None).unwrap();

        {
            let conn = Connection::open(&db_path).unwrap();
            conn.execute("DELETE FROM employees", []).unwrap();
        }

        let safety = manager.restore_backup(&backup).unwrap().unwrap();
        assert!(safety.to_string_lossy().ends_with("_pre_restore.db"));
        assert_eq!(manager.verify_backup(&safety).unwrap().employee_count, Some(0));

        let conn = Connection::open(&db_path).unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM employees", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
        assert!(!sidecar(&db_path, "-wal").exists());
        assert!(!sidecar(&db_path, ".restore-tmp").exists());
    }

    #[test]
    fn restore_refuses_invalid_backup() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = database(dir.path());
        let bogus = dir.path().join("bogus.db");
        std::fs::write(&bogus, b"garbage").unwrap();
        let manager = BackupManager::new(&db_path, dir.path().join("backups"), 0);

        assert!(matches!(manager.restore_backup(&bogus), Err(Error::Backup(_))));
        assert!(manager.list_backups().unwrap().is_empty());
    }

    #[test]
    fn failed_swap_removes_the_staged_copy() {
        let dir = tempfile::tempdir().unwrap();
        let staged = dir.path().join("ems.db.restore-tmp");
        std::fs::write(&staged, b"staged").unwrap();

        // A non-empty directory in the way makes the rename fail.
        let target = dir.path().join("ems.db");
        std::fs::create_dir(&target).unwrap();
        std::fs::write(target.join("keep"), b"x").unwrap();

        assert!(swap_in(&staged, &target).is_err());
        assert!(!staged.exists());
        assert!(target.join("keep").exists());
    }

    #[test]
    fn stats_summarise_backups() {
        let dir = tempfile::tempdir().unwrap();
        let manager = BackupManager::new(dir.path().join("ems.db"), dir.path(), 0);
        assert_eq!(manager.stats().unwrap(), BackupStats::default());

        std::fs::write(dir.path().join("wareflow_20250101_020000_000.db"), vec![0u8; 10]).unwrap();
        std::fs::write(dir.path().join("wareflow_20250301_020000_500_manual.db"), vec![0u8; 5]).unwrap();

        let stats = manager.stats().unwrap();
        assert_eq!(stats.total_count, 2);
        assert_eq!(stats.total_size_bytes, 15);
        assert_eq!(
            stats.oldest.map(|t| t.to_string()).as_deref(),
            Some("2025-01-01 02:00:00")
        );
        assert_eq!(
            stats.newest.map(|t| t.to_string()).as_deref(),
            Some("2025-03-01 02:00:00.500")
        );
    }
}
