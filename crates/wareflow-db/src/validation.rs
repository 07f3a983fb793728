//! Database checks run around a migration.
//!
//! Every check runs even when an earlier one fails, so the operator sees the
//! full list of problems at once.

use std::path::{Path, PathBuf};

use rusqlite::Connection;
use serde::Serialize;
use sysinfo::Disks;
use tracing::{debug, info, warn};
use wareflow_common::{Error, Result};

use crate::version;

pub const DEFAULT_MIN_FREE_SPACE_MB: u64 = 50;

type CheckFn = Box<dyn Fn(&Connection) -> std::result::Result<(), String> + Send + Sync>;

struct Check {
    name: String,
    run: CheckFn,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckResult {
    pub name: String,
    pub passed: bool,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub checks: Vec<CheckResult>,
}

impl ValidationReport {
    pub fn passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }

    /// `"<check>: <message>"` for every failed check.
    pub fn errors(&self) -> Vec<String> {
        self.checks
            .iter()
            .filter(|c| !c.passed)
            .map(|c| format!("{}: {}", c.name, c.message))
            .collect()
    }

    pub fn into_result(self) -> Result<Self> {
        if self.passed() {
            Ok(self)
        } else {
            Err(Error::Validation(self.errors()))
        }
    }
}

#[derive(Default)]
pub struct MigrationValidator {
    pre: Vec<Check>,
    post: Vec<Check>,
}

impl MigrationValidator {
    /// A validator with no checks.
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard checks. `db_path` is `None` for in-memory databases, which
    /// skips the disk space check.
    pub fn with_defaults(db_path: Option<&Path>, min_free_mb: u64) -> Self {
        let db_path = db_path.map(Path::to_path_buf);
        Self::new()
            .pre_check("database_writable", check_writable)
            .pre_check("disk_space", move |_conn| {
                check_disk_space(db_path.as_deref(), min_free_mb)
            })
            .pre_check("tables_integrity", check_integrity)
            .pre_check("version_table_exists", check_version_table)
            .post_check("tables_integrity", check_integrity)
            .post_check("foreign_keys_consistent", check_foreign_keys)
    }

    pub fn pre_check<F>(mut self, name: impl Into<String>, check: F) -> Self
    where
        F: Fn(&Connection) -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        self.pre.push(Check {
            name: name.into(),
            run: Box::new(check),
        });
        self
    }

    pub fn post_check<F>(mut self, name: impl Into<String>, check: F) -> Self
    where
        F: Fn(&Connection) -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        self.post.push(Check {
            name: name.into(),
            run: Box::new(check),
        });
        self
    }

    pub fn validate_pre(&self, conn: &Connection) -> ValidationReport {
        info!("running pre-migration validation");
        run_checks(&self.pre, conn)
    }

    pub fn validate_post(&self, conn: &Connection) -> ValidationReport {
        info!("running post-migration validation");
        run_checks(&self.post, conn)
    }
}

fn run_checks(checks: &[Check], conn: &Connection) -> ValidationReport {
    let checks = checks
        .iter()
        .map(|check| match (check.run)(conn) {
            Ok(()) => {
                debug!("check passed: {}", check.name);
                CheckResult {
                    name: check.name.clone(),
                    passed: true,
                    message: "ok".into(),
                }
            }
            Err(message) => {
                warn!("check failed: {}: {message}", check.name);
                CheckResult {
                    name: check.name.clone(),
                    passed: false,
                    message,
                }
            }
        })
        .collect();
    ValidationReport { checks }
}

fn check_writable(conn: &Connection) -> std::result::Result<(), String> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _wareflow_write_test (id INTEGER);
         DROP TABLE _wareflow_write_test;",
    )
    .map_err(|e| format!("database is not writable: {e}"))
}

fn check_disk_space(db_path: Option<&Path>, min_free_mb: u64) -> std::result::Result<(), String> {
    let Some(path) = db_path else {
        debug!("in-memory database, skipping disk space check");
        return Ok(());
    };
    match available_space(path) {
        Some(free) => ensure_free_space(free, min_free_mb),
        None => {
            warn!("could not determine free space for {}", path.display());
            Ok(())
        }
    }
}

/// Fails when `free_bytes` is below `min_free_mb` megabytes.
pub fn ensure_free_space(free_bytes: u64, min_free_mb: u64) -> std::result::Result<(), String> {
    let free_mb = free_bytes / (1024 * 1024);
    if free_mb < min_free_mb {
        return Err(format!(
            "insufficient disk space: {free_mb} MB free, {min_free_mb} MB required"
        ));
    }
    Ok(())
}

/// Free bytes on the volume holding `path`, matched by the longest mount point.
fn available_space(path: &Path) -> Option<u64> {
    let dir: PathBuf = match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => parent.to_path_buf(),
        None => PathBuf::from("."),
    };
    let dir = std::fs::canonicalize(dir).ok()?;

    let disks = Disks::new_with_refreshed_list();
    disks
        .list()
        .iter()
        .filter(|disk| dir.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().as_os_str().len())
        .map(|disk| disk.available_space())
}

fn check_integrity(conn: &Connection) -> std::result::Result<(), String> {
    match conn.query_row("PRAGMA integrity_check", [], |row| row.get::<_, String>(0)) {
        Ok(result) if result == "ok" => Ok(()),
        Ok(result) => Err(format!("integrity check reported: {result}")),
        Err(e) => {
            warn!("integrity check could not run, continuing: {e}");
            Ok(())
        }
    }
}

fn check_version_table(conn: &Connection) -> std::result::Result<(), String> {
    version::ensure_table(conn).map_err(|e| e.to_string())
}

fn check_foreign_keys(conn: &Connection) -> std::result::Result<(), String> {
    let mut stmt = conn
        .prepare("PRAGMA foreign_key_check")
        .map_err(|e| format!("foreign key check could not run: {e}"))?;
    let mut rows = stmt
        .query([])
        .map_err(|e| format!("foreign key check could not run: {e}"))?;

    let mut violations = 0usize;
    while rows
        .next()
        .map_err(|e| format!("foreign key check could not run: {e}"))?
        .is_some()
    {
        violations += 1;
    }

    if violations > 0 {
        return Err(format!("{violations} foreign key violation(s)"));
    }
    Ok(())
}
