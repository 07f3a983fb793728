use std::path::{Path, PathBuf};

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

/// Default database file name inside the data directory.
pub const DEFAULT_DATABASE_FILE: &str = "employee_manager.db";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Root for the database and backups when their paths are not set.
    pub data_dir: Option<PathBuf>,
    pub log_level: Option<String>,
    pub database: DatabaseConfig,
    pub backup: BackupConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: Option<PathBuf>,
    /// Extra `.sql` migrations applied after the built-in ones.
    pub migrations_dir: Option<PathBuf>,
    /// Apply pending migrations when the application starts.
    pub auto_migrate: bool,
    /// Free space required on the database volume before migrating.
    pub min_free_space_mb: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: None,
            migrations_dir: None,
            auto_migrate: true,
            min_free_space_mb: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    pub enabled: bool,
    /// Local time of day for the scheduled backup, `HH:MM`.
    pub backup_time: String,
    /// Number of backup files kept after rotation. 0 keeps everything.
    #[serde(alias = "retention_days")]
    pub max_backups: usize,
    pub backup_dir: Option<PathBuf>,
    /// Snapshot the database before applying migrations.
    pub backup_before_migration: bool,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backup_time: "02:00".to_string(),
            max_backups: 30,
            backup_dir: None,
            backup_before_migration: true,
        }
    }
}

impl BackupConfig {
    /// Parse `backup_time` into a time of day.
    pub fn schedule_time(&self) -> Result<NaiveTime, String> {
        parse_backup_time(&self.backup_time)
    }
}

/// Parse an `HH:MM` time of day.
pub fn parse_backup_time(value: &str) -> Result<NaiveTime, String> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M")
        .map_err(|e| format!("invalid backup_time '{value}' (expected HH:MM): {e}"))
}

impl AppConfig {
    /// Directory holding the database and backups when not configured explicitly.
    pub fn resolve_data_dir(&self, config_dir: &Path) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(|| config_dir.join("data"))
    }

    pub fn resolve_database_path(&self, config_dir: &Path) -> PathBuf {
        self.database
            .path
            .clone()
            .unwrap_or_else(|| self.resolve_data_dir(config_dir).join(DEFAULT_DATABASE_FILE))
    }

    pub fn resolve_backup_dir(&self, config_dir: &Path) -> PathBuf {
        self.backup
            .backup_dir
            .clone()
            .unwrap_or_else(|| self.resolve_data_dir(config_dir).join("backups"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_shipped_settings() {
        let config = AppConfig::default();
        assert!(config.database.auto_migrate);
        assert_eq!(config.database.min_free_space_mb, 50);
        assert!(config.backup.enabled);
        assert_eq!(config.backup.backup_time, "02:00");
        assert_eq!(config.backup.max_backups, 30);
    }

    #[test]
    fn parses_backup_time() {
        let t = parse_backup_time("02:30").unwrap();
        assert_eq!(t, NaiveTime::from_hms_opt(2, 30, 0).unwrap());
        assert!(parse_backup_time(" 23:59 ").is_ok());
        assert!(parse_backup_time("25:00").is_err());
        assert!(parse_backup_time("2am").is_err());
    }

    #[test]
    fn retention_days_is_accepted_as_alias() {
        let config: BackupConfig = serde_yaml::from_str("retention_days: 45").unwrap();
        assert_eq!(config.max_backups, 45);
        assert_eq!(config.backup_time, "02:00");
    }

    #[test]
    fn paths_resolve_under_data_dir() {
        let config = AppConfig::default();
        let dir = Path::new("/etc/wareflow");
        assert_eq!(
            config.resolve_database_path(dir),
            PathBuf::from("/etc/wareflow/data/employee_manager.db")
        );
        assert_eq!(
            config.resolve_backup_dir(dir),
            PathBuf::from("/etc/wareflow/data/backups")
        );

        let mut config = AppConfig::default();
        config.data_dir = Some(PathBuf::from("/srv/ems"));
        config.database.path = Some(PathBuf::from("/srv/other.db"));
        assert_eq!(config.resolve_database_path(dir), PathBuf::from("/srv/other.db"));
        assert_eq!(config.resolve_backup_dir(dir), PathBuf::from("/srv/ems/backups"));
    }
}
