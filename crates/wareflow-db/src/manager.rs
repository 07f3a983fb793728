//! Startup orchestration: decide whether the schema needs upgrading, apply
//! pending migrations behind validation and a snapshot, and keep the
//! `app_version` table current.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info};
use wareflow_common::{Error, Result};

use crate::runner::{MigrationRunner, MigrationStatus, RollbackResult};
use crate::validation::{DEFAULT_MIN_FREE_SPACE_MB, MigrationValidator};
use crate::version::{self, APP_VERSION, SCHEMA_VERSION, VersionRecord};
use crate::Database;

/// Takes a copy of the database before it is migrated.
pub trait Snapshotter: Send + Sync {
    /// Write a snapshot labelled `label` and return its path.
    fn snapshot(&self, label: &str) -> Result<PathBuf>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MigrationOutcome {
    UpToDate,
    /// No schema change, only the recorded app version moved.
    VersionRecorded { from: Option<String>, to: String },
    /// Migrations are waiting and automatic migration is off.
    Pending { migrations: Vec<String> },
    Applied {
        batch: i64,
        migrations: Vec<String>,
        backup: Option<PathBuf>,
    },
}

impl MigrationOutcome {
    pub fn message(&self) -> String {
        match self {
            MigrationOutcome::UpToDate => "Database is up to date".to_string(),
            MigrationOutcome::VersionRecorded { .. } => {
                "Version updated (no schema changes)".to_string()
            }
            MigrationOutcome::Pending { migrations } => format!(
                "Migration required: {} migration(s) pending",
                migrations.len()
            ),
            MigrationOutcome::Applied { migrations, .. } => format!(
                "Successfully applied {} migration(s)",
                migrations.len()
            ),
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, MigrationOutcome::Pending { .. })
    }
}

impl fmt::Display for MigrationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}

/// What a migration run would do, without doing it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationPlan {
    pub current_version: Option<String>,
    pub target_version: String,
    pub schema_version: i64,
    pub pending: Vec<String>,
}

pub struct MigrationManager {
    db: Arc<Database>,
    runner: MigrationRunner,
    validator: MigrationValidator,
    snapshotter: Option<Arc<dyn Snapshotter>>,
}

impl MigrationManager {
    pub fn new(db: Arc<Database>, runner: MigrationRunner) -> Self {
        let validator = MigrationValidator::with_defaults(db.path(), DEFAULT_MIN_FREE_SPACE_MB);
        Self {
            db,
            runner,
            validator,
            snapshotter: None,
        }
    }

    pub fn with_validator(mut self, validator: MigrationValidator) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_snapshotter(mut self, snapshotter: Arc<dyn Snapshotter>) -> Self {
        self.snapshotter = Some(snapshotter);
        self
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn runner(&self) -> &MigrationRunner {
        &self.runner
    }

    /// Bring the database up to date with this build.
    ///
    /// With `auto_migrate` off, pending migrations are reported and nothing
    /// is changed. The version row is written only once every pending
    /// migration has been applied and validated.
    pub fn check_and_migrate(&self, auto_migrate: bool) -> Result<MigrationOutcome> {
        let mut conn = self.db.connection()?;
        version::ensure_table(&conn)?;
        let pending = self.runner.pending_names(&conn)?;

        if pending.is_empty() {
            let current = version::current_app_version(&conn)?;
            if current.as_deref() == Some(APP_VERSION) {
                info!("database is up to date");
                return Ok(MigrationOutcome::UpToDate);
            }

            let note = match &current {
                Some(_) => format!("Upgrade to {APP_VERSION}"),
                None => format!("Initial version {APP_VERSION}"),
            };
            version::record(&conn, APP_VERSION, SCHEMA_VERSION, &note)?;
            info!(
                "version updated: {} -> {APP_VERSION}",
                current.as_deref().unwrap_or("none")
            );
            return Ok(MigrationOutcome::VersionRecorded {
                from: current,
                to: APP_VERSION.to_string(),
            });
        }

        info!("migration needed: {} migration(s) pending", pending.len());
        if !auto_migrate {
            return Ok(MigrationOutcome::Pending {
                migrations: pending,
            });
        }

        self.validator.validate_pre(&conn).into_result()?;

        let backup = match &self.snapshotter {
            Some(snapshotter) => {
                info!("creating pre-migration backup");
                let path = snapshotter.snapshot("pre_migration").map_err(|e| {
                    error!("pre-migration backup failed: {e}");
                    Error::Backup(format!("pre-migration backup failed: {e}"))
                })?;
                info!("backup created: {}", path.display());
                Some(path)
            }
            None => None,
        };

        let result = self.runner.run(&mut conn)?;

        let post = self.validator.validate_post(&conn);
        if !post.passed() {
            error!("post-migration validation failed");
            return Err(Error::Validation(post.errors()));
        }

        version::record(
            &conn,
            APP_VERSION,
            SCHEMA_VERSION,
            &format!("Upgrade to {APP_VERSION}"),
        )?;

        let outcome = MigrationOutcome::Applied {
            batch: result.batch.unwrap_or_default(),
            migrations: result.applied,
            backup,
        };
        info!(
            "{} in {:.2}s",
            outcome.message(),
            result.elapsed.as_secs_f64()
        );
        Ok(outcome)
    }

    pub fn plan(&self) -> Result<MigrationPlan> {
        let conn = self.db.connection()?;
        version::ensure_table(&conn)?;
        Ok(MigrationPlan {
            current_version: version::current_app_version(&conn)?,
            target_version: APP_VERSION.to_string(),
            schema_version: SCHEMA_VERSION,
            pending: self.runner.pending_names(&conn)?,
        })
    }

    pub fn status(&self) -> Result<Vec<MigrationStatus>> {
        let conn = self.db.connection()?;
        self.runner.status(&conn)
    }

    pub fn rollback_last_batch(&self) -> Result<RollbackResult> {
        let mut conn = self.db.connection()?;
        self.runner.rollback_last_batch(&mut conn)
    }

    pub fn rollback(&self, name: &str) -> Result<()> {
        let mut conn = self.db.connection()?;
        self.runner.rollback(&mut conn, name)
    }

    pub fn version_history(&self) -> Result<Vec<VersionRecord>> {
        let conn = self.db.connection()?;
        version::ensure_table(&conn)?;
        version::history(&conn)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::ledger;
    use crate::migration::{Migration, SqlMigration};

    struct Recording {
        labels: Mutex<Vec<String>>,
        fail: bool,
    }

    impl Recording {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                labels: Mutex::new(Vec::new()),
                fail,
            })
        }
    }

    impl Snapshotter for Recording {
        fn snapshot(&self, label: &str) -> Result<PathBuf> {
            if self.fail {
                return Err(Error::Io(std::io::Error::other("disk full")));
            }
            self.labels.lock().unwrap().push(label.to_string());
            Ok(PathBuf::from(format!("/backups/{label}.db")))
        }
    }

    fn manager() -> MigrationManager {
        let db = Arc::new(Database::in_memory().unwrap());
        MigrationManager::new(db, MigrationRunner::builtin().unwrap())
    }

    #[test]
    fn fresh_database_is_migrated_and_versioned() {
        let snapshots = Recording::new(false);
        let manager = manager().with_snapshotter(snapshots.clone());

        let outcome = manager.check_and_migrate(true).unwrap();
        match &outcome {
            MigrationOutcome::Applied {
                batch,
                migrations,
                backup,
            } => {
                assert_eq!(*batch, 1);
                assert_eq!(migrations.len(), 4);
                assert_eq!(backup.as_deref(), Some(std::path::Path::new("/backups/pre_migration.db")));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(outcome.message(), "Successfully applied 4 migration(s)");
        assert_eq!(*snapshots.labels.lock().unwrap(), ["pre_migration"]);

        let history = manager.version_history().unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].app_version, APP_VERSION);
        assert_eq!(history[0].schema_version, SCHEMA_VERSION);
        assert_eq!(history[0].note, format!("Upgrade to {APP_VERSION}"));

        assert_eq!(manager.check_and_migrate(true).unwrap(), MigrationOutcome::UpToDate);
        assert_eq!(snapshots.labels.lock().unwrap().len(), 1);
    }

    #[test]
    fn reports_pending_without_auto_migrate() {
        let manager = manager();
        let outcome = manager.check_and_migrate(false).unwrap();

        assert!(outcome.is_pending());
        assert_eq!(outcome.to_string(), "Migration required: 4 migration(s) pending");
        assert!(manager.version_history().unwrap().is_empty());
        let conn = manager.database().connection().unwrap();
        assert!(ledger::applied(&conn).unwrap().is_empty());
    }

    #[test]
    fn records_version_when_nothing_is_pending() {
        let db = Arc::new(Database::in_memory().unwrap());
        let manager = MigrationManager::new(db, MigrationRunner::new(Vec::new()).unwrap());

        let outcome = manager.check_and_migrate(false).unwrap();
        assert_eq!(
            outcome,
            MigrationOutcome::VersionRecorded {
                from: None,
                to: APP_VERSION.to_string()
            }
        );
        assert_eq!(outcome.message(), "Version updated (no schema changes)");
        assert_eq!(manager.check_and_migrate(false).unwrap(), MigrationOutcome::UpToDate);
    }

    #[test]
    fn older_recorded_version_is_upgraded() {
        let db = Arc::new(Database::in_memory().unwrap());
        {
            let conn = db.connection().unwrap();
            version::ensure_table(&conn).unwrap();
            version::record(&conn, "0.0.1", 1, "Initial version 0.0.1").unwrap();
        }
        let manager = MigrationManager::new(db, MigrationRunner::new(Vec::new()).unwrap());

        let outcome = manager.check_and_migrate(true).unwrap();
        assert!(matches!(
            outcome,
            MigrationOutcome::VersionRecorded { from: Some(ref v), .. } if v == "0.0.1"
        ));
        assert_eq!(manager.version_history().unwrap().len(), 2);
    }

    #[test]
    fn failed_validation_blocks_the_run() {
        let snapshots = Recording::new(false);
        let manager = manager()
            .with_validator(MigrationValidator::new().pre_check("always_fails", |_| Err("no".into())))
            .with_snapshotter(snapshots.clone());

        let err = manager.check_and_migrate(true).unwrap_err();
        assert!(matches!(err, Error::Validation(ref errors) if errors == &["always_fails: no"]));
        assert!(snapshots.labels.lock().unwrap().is_empty());
        assert_eq!(manager.plan().unwrap().pending.len(), 4);
    }

    #[test]
    fn failed_backup_blocks_the_run() {
        let manager = manager().with_snapshotter(Recording::new(true));

        let err = manager.check_and_migrate(true).unwrap_err();
        assert!(matches!(err, Error::Backup(_)));
        assert_eq!(manager.plan().unwrap().pending.len(), 4);
    }

    #[test]
    fn failed_migration_keeps_version_unchanged() {
        let db = Arc::new(Database::in_memory().unwrap());
        let broken: Vec<Box<dyn Migration>> = vec![Box::new(
            SqlMigration::parse("20990101_000000_broken", "INSERT INTO missing VALUES (1);").unwrap(),
        )];
        let manager = MigrationManager::new(db, MigrationRunner::new(broken).unwrap());

        assert!(matches!(
            manager.check_and_migrate(true).unwrap_err(),
            Error::MigrationFailed { .. }
        ));
        assert!(manager.version_history().unwrap().is_empty());
    }

    #[test]
    fn plan_lists_pending_migrations() {
        let manager = manager();
        let plan = manager.plan().unwrap();
        assert_eq!(plan.current_version, None);
        assert_eq!(plan.target_version, APP_VERSION);
        assert_eq!(plan.schema_version, SCHEMA_VERSION);
        assert_eq!(plan.pending, manager.runner().names());

        manager.check_and_migrate(true).unwrap();
        let plan = manager.plan().unwrap();
        assert_eq!(plan.current_version.as_deref(), Some(APP_VERSION));
        assert!(plan.pending.is_empty());
    }

    #[test]
    fn rollback_reverts_reversible_tail_of_batch() {
        let manager = manager();
        manager.check_and_migrate(true).unwrap();

        // The soft-delete migration at the head of the batch is irreversible.
        let err = manager.rollback_last_batch().unwrap_err();
        assert!(matches!(err, Error::Irreversible(ref name) if name == "20260115_090000_add_soft_delete"));

        let status = manager.status().unwrap();
        let applied: Vec<&str> = status
            .iter()
            .filter(|s| !matches!(s.state, crate::runner::MigrationState::Pending))
            .map(|s| s.name.as_str())
            .collect();
        assert_eq!(applied, ["20260115_090000_add_soft_delete"]);
    }
}
