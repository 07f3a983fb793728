mod banner;
mod commands;
mod wizard;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use wareflow_config::ConfigLoader;
use wareflow_db::TrackedTable;

use crate::commands::AppContext;

#[derive(Parser)]
#[command(name = "wems", version)]
#[command(about = "Wareflow EMS - database migrations, backups and maintenance")]
struct Cli {
    /// Configuration directory (defaults to ~/.config/wareflow)
    #[arg(long, global = true, env = "WAREFLOW_CONFIG_DIR")]
    config_dir: Option<PathBuf>,

    /// Log filter, e.g. `debug` or `wareflow_db=trace` (overrides RUST_LOG)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    /// Print command output as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive setup: writes config.yml
    Init,

    /// Apply pending migrations
    Migrate {
        /// Show what would be applied without touching the database
        #[arg(long)]
        dry_run: bool,
    },

    /// Show the schema version and every migration's state
    Status,

    /// Roll back the last migration batch
    Rollback {
        /// Roll back only this migration (must be the most recent one)
        #[arg(long)]
        name: Option<String>,
    },

    /// Show the application version and the database's version history
    Version,

    /// Manage database backups
    Backup {
        #[command(subcommand)]
        command: BackupCommands,
    },

    /// List and restore soft-deleted records
    Trash {
        #[command(subcommand)]
        command: TrashCommands,
    },

    /// Migrate if configured, then run scheduled backups until Ctrl+C
    Start,

    /// Look for newer Wareflow EMS releases
    Update {
        #[command(subcommand)]
        command: UpdateCommands,
    },
}

#[derive(Subcommand)]
enum UpdateCommands {
    /// Compare this build with the latest stable release
    Check {
        /// Release endpoint (GitHub "latest release" API)
        #[arg(
            long,
            env = "WAREFLOW_UPDATE_URL",
            default_value = commands::update::LATEST_RELEASE_URL
        )]
        url: String,
    },
}

#[derive(Subcommand)]
enum BackupCommands {
    /// Snapshot the database now
    Create {
        /// Short label appended to the file name
        #[arg(long, short)]
        description: Option<String>,
    },
    /// List backups, newest first
    List,
    /// Check a backup file is a sound database
    Verify { path: PathBuf },
    /// Replace the database with a backup
    Restore {
        path: PathBuf,
        /// Skip the confirmation prompt
        #[arg(long, short)]
        yes: bool,
    },
    /// Backup count, total size and age range
    Stats,
    /// Recent backup events
    History {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[derive(Subcommand)]
enum TrashCommands {
    /// Soft-deleted rows, optionally for one table
    List {
        #[arg(long)]
        table: Option<TrackedTable>,
    },
    /// Move a row to the trash
    Delete {
        table: TrackedTable,
        id: String,
        #[arg(long)]
        by: Option<String>,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Bring a row back from the trash
    Restore { table: TrackedTable, id: String },
}

fn init_tracing(level: Option<&str>, json: bool) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_dir = cli
        .config_dir
        .clone()
        .unwrap_or_else(ConfigLoader::default_config_dir);
    let loader = ConfigLoader::new(&config_dir);
    let loaded = loader.load();

    let config_level = loaded.as_ref().ok().and_then(|c| c.log_level.clone());
    init_tracing(cli.log_level.as_deref().or(config_level.as_deref()), cli.json_logs);

    match &cli.command {
        Commands::Init => return wizard::run_wizard(&loader),
        Commands::Update {
            command: UpdateCommands::Check { url },
        } => return commands::update::check(url, cli.json).await,
        _ => {}
    }

    let config = loaded.with_context(|| {
        format!("failed to load configuration from {}", config_dir.display())
    })?;
    let ctx = AppContext::new(config_dir, config, cli.json);

    match cli.command {
        Commands::Init | Commands::Update { .. } => Ok(()),
        Commands::Migrate { dry_run } => commands::migrate::migrate(&ctx, dry_run),
        Commands::Status => commands::migrate::status(&ctx),
        Commands::Rollback { name } => commands::migrate::rollback(&ctx, name.as_deref()),
        Commands::Version => commands::migrate::version(&ctx),
        Commands::Backup { command } => match command {
            BackupCommands::Create { description } => {
                commands::backup::create(&ctx, description.as_deref())
            }
            BackupCommands::List => commands::backup::list(&ctx),
            BackupCommands::Verify { path } => commands::backup::verify(&ctx, &path),
            BackupCommands::Restore { path, yes } => commands::backup::restore(&ctx, &path, yes),
            BackupCommands::Stats => commands::backup::stats(&ctx),
            BackupCommands::History { limit } => commands::backup::history(&ctx, limit),
        },
        Commands::Trash { command } => match command {
            TrashCommands::List { table } => commands::trash::list(&ctx, table),
            TrashCommands::Delete {
                table,
                id,
                by,
                reason,
            } => commands::trash::delete(&ctx, table, &id, by.as_deref(), reason.as_deref()),
            TrashCommands::Restore { table, id } => commands::trash::restore(&ctx, table, &id),
        },
        Commands::Start => commands::start::run(&ctx).await,
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "wems",
            "migrate",
            "--dry-run",
            "--config-dir",
            "/tmp/wf",
            "--json",
        ])
        .unwrap();
        assert_eq!(cli.config_dir, Some(PathBuf::from("/tmp/wf")));
        assert!(cli.json);
        assert!(matches!(cli.command, Commands::Migrate { dry_run: true }));
    }

    #[test]
    fn parses_trash_tables() {
        let cli = Cli::try_parse_from(["wems", "trash", "restore", "medical_visits", "mv-7"]).unwrap();
        match cli.command {
            Commands::Trash {
                command: TrashCommands::Restore { table, id },
            } => {
                assert_eq!(table, TrackedTable::MedicalVisits);
                assert_eq!(id, "mv-7");
            }
            _ => panic!("expected trash restore"),
        }

        assert!(Cli::try_parse_from(["wems", "trash", "list", "--table", "payroll"]).is_err());
    }

    #[test]
    fn backup_history_limit_defaults_to_twenty() {
        let cli = Cli::try_parse_from(["wems", "backup", "history"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Backup {
                command: BackupCommands::History { limit: 20 }
            }
        ));
    }

    #[test]
    fn update_check_defaults_to_the_release_api() {
        let cli = Cli::try_parse_from(["wems", "update", "check", "--json"]).unwrap();
        assert!(cli.json);
        match cli.command {
            Commands::Update {
                command: UpdateCommands::Check { url },
            } => assert_eq!(url, commands::update::LATEST_RELEASE_URL),
            _ => panic!("expected update check"),
        }

        let cli = Cli::try_parse_from([
            "wems",
            "update",
            "check",
            "--url",
            "http://mirror.local/latest",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Update {
                command: UpdateCommands::Check { url }
            } if url == "http://mirror.local/latest"
        ));
    }
}
