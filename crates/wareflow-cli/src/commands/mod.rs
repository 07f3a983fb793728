pub mod backup;
pub mod migrate;
pub mod start;
pub mod trash;
pub mod update;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use wareflow_backup::BackupService;
use wareflow_config::AppConfig;
use wareflow_db::{Database, MigrationManager, MigrationRunner, MigrationValidator};

/// Resolved configuration shared by every command.
pub struct AppContext {
    pub config_dir: PathBuf,
    pub config: AppConfig,
    pub json: bool,
}

impl AppContext {
    pub fn new(config_dir: PathBuf, config: AppConfig, json: bool) -> Self {
        Self {
            config_dir,
            config,
            json,
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.config.resolve_database_path(&self.config_dir)
    }

    pub fn open_database(&self) -> Result<Arc<Database>> {
        let path = self.database_path();
        let db = Database::open(&path)
            .with_context(|| format!("failed to open database {}", path.display()))?;
        Ok(Arc::new(db))
    }

    pub fn backup_service(&self) -> BackupService {
        BackupService::from_app_config(&self.config, &self.config_dir)
    }

    fn migrations_dir(&self) -> Option<PathBuf> {
        self.config
            .database
            .migrations_dir
            .as_deref()
            .map(|dir| resolve(&self.config_dir, dir))
    }

    /// A manager over the built-in and configured migrations. Snapshots go
    /// through `backups` when pre-migration backups are enabled.
    pub fn migration_manager(
        &self,
        db: Arc<Database>,
        backups: Option<&BackupService>,
    ) -> Result<MigrationManager> {
        let runner = MigrationRunner::with_dir(self.migrations_dir().as_deref())
            .context("failed to load migrations")?;
        let validator =
            MigrationValidator::with_defaults(db.path(), self.config.database.min_free_space_mb);

        let mut manager = MigrationManager::new(db, runner).with_validator(validator);
        if let Some(backups) = backups.filter(|_| self.config.backup.backup_before_migration) {
            manager = manager.with_snapshotter(backups.manager());
        }
        Ok(manager)
    }

    pub fn print_json<T: Serialize + ?Sized>(&self, value: &T) -> Result<()> {
        let out = serde_json::to_string_pretty(value).context("failed to serialize output")?;
        println!("{out}");
        Ok(())
    }
}

/// Relative paths in the config are relative to the config directory.
fn resolve(config_dir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        config_dir.join(path)
    }
}

pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{size:.1} {}", UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use wareflow_config::BackupConfig;
    use wareflow_db::MigrationOutcome;

    use super::*;

    fn context(dir: &Path, backup: BackupConfig) -> AppContext {
        let config = AppConfig {
            data_dir: Some(dir.join("data")),
            backup,
            ..Default::default()
        };
        AppContext::new(dir.to_path_buf(), config, false)
    }

    #[test]
    fn sizes_are_human_readable() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(5 * 1024 * 1024 + 512 * 1024), "5.5 MB");
    }

    #[test]
    fn relative_migrations_dir_is_under_config_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(dir.path(), BackupConfig::default());
        ctx.config.database.migrations_dir = Some(PathBuf::from("migrations"));
        assert_eq!(ctx.migrations_dir(), Some(dir.path().join("migrations")));
    }

    #[test]
    fn migrating_snapshots_only_when_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(
            dir.path(),
            BackupConfig {
                backup_before_migration: false,
                ..Default::default()
            },
        );
        let backups = ctx.backup_service();
        let manager = ctx
            .migration_manager(ctx.open_database().unwrap(), Some(&backups))
            .unwrap()
            .with_validator(MigrationValidator::new());

        match manager.check_and_migrate(true).unwrap() {
            MigrationOutcome::Applied { backup, .. } => assert!(backup.is_none()),
            other => panic!("expected migrations to run, got {other:?}"),
        }
        assert!(backups.list_backups().unwrap().is_empty());
    }

    #[test]
    fn migrating_with_backups_enabled_writes_a_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), BackupConfig::default());
        let backups = ctx.backup_service();
        let manager = ctx
            .migration_manager(ctx.open_database().unwrap(), Some(&backups))
            .unwrap()
            .with_validator(MigrationValidator::new());

        manager.check_and_migrate(true).unwrap();
        let listed = backups.list_backups().unwrap();
        assert_eq!(listed.len(), 1);
        assert!(listed[0].path.starts_with(dir.path().join("data").join("backups")));
    }
}
