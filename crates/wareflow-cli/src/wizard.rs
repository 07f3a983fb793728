use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::{Context, Result};
use dialoguer::{Confirm, Input};
use wareflow_config::{AppConfig, BackupConfig, ConfigLoader, DatabaseConfig, parse_backup_time};

const EXAMPLE_CONFIG: &str = "\
data_dir: /var/lib/wareflow
database:
  auto_migrate: true
  min_free_space_mb: 50
backup:
  enabled: true
  backup_time: \"02:00\"
  max_backups: 30
  backup_before_migration: true";

/// Run the interactive setup wizard and write config.yml.
pub fn run_wizard(loader: &ConfigLoader) -> Result<()> {
    let config_dir = loader.config_dir();
    if !std::io::stdin().is_terminal() {
        println!("Non-interactive environment detected.");
        println!(
            "To configure Wareflow EMS, edit: {}/config.yml",
            config_dir.display()
        );
        println!();
        println!("Example config.yml:");
        println!("---");
        println!("{EXAMPLE_CONFIG}");
        return Ok(());
    }

    println!();
    println!("  Wareflow EMS Setup");
    println!("  ------------------");
    println!();

    if let Some(existing) = loader.config_path() {
        let overwrite = Confirm::new()
            .with_prompt(format!("{} exists. Overwrite it?", existing.display()))
            .default(false)
            .interact()
            .context("overwrite confirmation cancelled")?;
        if !overwrite {
            println!("  Keeping the existing configuration.");
            return Ok(());
        }
    }

    let defaults = AppConfig::default();

    // --- Storage ---
    let data_dir: String = Input::new()
        .with_prompt("Data directory (database and backups)")
        .default(
            defaults
                .resolve_data_dir(config_dir)
                .to_string_lossy()
                .to_string(),
        )
        .interact_text()
        .context("data directory input cancelled")?;

    let auto_migrate = Confirm::new()
        .with_prompt("Apply database migrations automatically at startup?")
        .default(true)
        .interact()
        .context("auto-migrate choice cancelled")?;

    // --- Backups ---
    let enabled = Confirm::new()
        .with_prompt("Enable daily backups?")
        .default(true)
        .interact()
        .context("backup choice cancelled")?;

    let mut backup = BackupConfig {
        enabled,
        ..Default::default()
    };
    if enabled {
        backup.backup_time = Input::new()
            .with_prompt("Backup time (HH:MM, local)")
            .default(backup.backup_time.clone())
            .validate_with(|value: &String| parse_backup_time(value).map(|_| ()))
            .interact_text()
            .context("backup time input cancelled")?;

        backup.max_backups = Input::new()
            .with_prompt("Number of backups to keep (0 keeps all)")
            .default(backup.max_backups)
            .interact_text()
            .context("backup count input cancelled")?;

        backup.backup_before_migration = Confirm::new()
            .with_prompt("Back up before applying migrations?")
            .default(true)
            .interact()
            .context("pre-migration backup choice cancelled")?;
    }

    // --- Build config ---
    let config = AppConfig {
        data_dir: Some(PathBuf::from(data_dir.trim())),
        database: DatabaseConfig {
            auto_migrate,
            ..Default::default()
        },
        backup,
        ..defaults
    };

    let path = loader.save(&config).context("failed to write config")?;

    println!();
    println!("  Config written to {}", path.display());
    println!("  Run `wems migrate` to prepare the database, then `wems start`.");
    println!();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn example_config_loads() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.yml"), EXAMPLE_CONFIG).unwrap();

        let config = ConfigLoader::new(dir.path()).load().unwrap();
        assert_eq!(config.data_dir, Some(PathBuf::from("/var/lib/wareflow")));
        assert_eq!(config.backup.schedule_time().unwrap().to_string(), "02:00:00");
        assert!(config.database.auto_migrate);
    }
}
