use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;
use wareflow_common::{Error, Result};
use wareflow_config::{AppConfig, BackupConfig};

use crate::journal::{BackupEvent, BackupJournal, BackupStatistics};
use crate::manager::{BackupInfo, BackupKind, BackupManager, BackupStats, BackupVerification};
use crate::scheduler::BackupScheduler;

/// Ties backup settings, the manager and the scheduler together.
pub struct BackupService {
    db_path: PathBuf,
    backup_dir: PathBuf,
    config: BackupConfig,
    manager: Arc<BackupManager>,
    scheduler: Option<BackupScheduler>,
}

fn resolved_backup_config(config: &AppConfig, config_dir: &Path) -> BackupConfig {
    let mut backup = config.backup.clone();
    backup.backup_dir = Some(config.resolve_backup_dir(config_dir));
    backup
}

fn build_manager(db_path: &Path, backup_dir: &Path, config: &BackupConfig) -> Arc<BackupManager> {
    Arc::new(
        BackupManager::new(db_path, backup_dir, config.max_backups)
            .with_journal(BackupJournal::in_dir(backup_dir)),
    )
}

impl BackupService {
    pub fn new(db_path: impl Into<PathBuf>, backup_dir: impl Into<PathBuf>, config: BackupConfig) -> Self {
        let db_path = db_path.into();
        let backup_dir = backup_dir.into();
        let manager = build_manager(&db_path, &backup_dir, &config);
        Self {
            db_path,
            backup_dir,
            config,
            manager,
            scheduler: None,
        }
    }

    /// Resolve paths from the application config.
    pub fn from_app_config(config: &AppConfig, config_dir: &Path) -> Self {
        Self::new(
            config.resolve_database_path(config_dir),
            config.resolve_backup_dir(config_dir),
            resolved_backup_config(config, config_dir),
        )
    }

    pub fn config(&self) -> &BackupConfig {
        &self.config
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    pub fn manager(&self) -> Arc<BackupManager> {
        Arc::clone(&self.manager)
    }

    pub fn is_scheduler_running(&self) -> bool {
        self.scheduler.as_ref().is_some_and(|s| s.is_running())
    }

    /// Start daily backups. Returns `false` when backups are disabled.
    pub fn start_scheduler(&mut self) -> Result<bool> {
        if self.is_scheduler_running() {
            return Err(Error::Backup("backup scheduler is already running".into()));
        }
        if !self.config.enabled {
            info!("backups disabled, scheduler not started");
            return Ok(false);
        }

        let at = self.config.schedule_time().map_err(Error::Config)?;
        self.scheduler = Some(BackupScheduler::start(Arc::clone(&self.manager), at));
        info!("backup scheduler started");
        Ok(true)
    }

    pub fn stop_scheduler(&mut self) {
        if let Some(scheduler) = self.scheduler.take() {
            scheduler.stop();
            info!("backup scheduler stopped");
        }
    }

    /// Stop the scheduler and wait for a backup in progress to finish.
    pub async fn shutdown(&mut self) {
        if let Some(scheduler) = self.scheduler.take() {
            scheduler.shutdown().await;
            info!("backup scheduler stopped");
        }
    }

    /// [`apply_config`](Self::apply_config) with paths resolved against `config_dir`.
    pub fn apply_app_config(&mut self, config: &AppConfig, config_dir: &Path) -> Result<()> {
        self.apply_config(resolved_backup_config(config, config_dir))
    }

    /// Swap in new settings, restarting the scheduler if it was running.
    pub fn apply_config(&mut self, config: BackupConfig) -> Result<()> {
        if config == self.config {
            return Ok(());
        }
        config.schedule_time().map_err(Error::Config)?;

        let was_running = self.is_scheduler_running();
        self.stop_scheduler();

        if let Some(dir) = &config.backup_dir {
            self.backup_dir = dir.clone();
        }
        self.manager = build_manager(&self.db_path, &self.backup_dir, &config);
        self.config = config;
        info!(
            "backup settings updated (enabled: {}, time: {}, keep: {})",
            self.config.enabled, self.config.backup_time, self.config.max_backups
        );

        if was_running {
            self.start_scheduler()?;
        }
        Ok(())
    }

    pub fn create_backup(&self, description: Option<&str>) -> Result<PathBuf> {
        self.manager.create_backup(BackupKind::Manual, description)
    }

    pub fn restore_backup(&self, backup: &Path) -> Result<Option<PathBuf>> {
        self.manager.restore_backup(backup)
    }

    pub fn verify_backup(&self, backup: &Path) -> Result<BackupVerification> {
        self.manager.verify_backup(backup)
    }

    pub fn list_backups(&self) -> Result<Vec<BackupInfo>> {
        self.manager.list_backups()
    }

    pub fn stats(&self) -> Result<BackupStats> {
        self.manager.stats()
    }

    pub fn history(&self, limit: usize) -> Result<Vec<BackupEvent>> {
        match self.manager.journal() {
            Some(journal) => journal.history(limit),
            None => Ok(Vec::new()),
        }
    }

    /// Outcomes recorded in the journal, as opposed to `stats` which looks
    /// at the files currently on disk.
    pub fn statistics(&self) -> Result<BackupStatistics> {
        match self.manager.journal() {
            Some(journal) => journal.statistics(),
            None => Ok(BackupStatistics::default()),
        }
    }
}
