use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{info, warn};
use wareflow_config::{AppConfig, ConfigLoader, ConfigWatcher};
use wareflow_db::version;

use super::AppContext;
use crate::banner;

/// Next config pushed by the watcher. `None` once the watcher is gone.
async fn next_config(rx: &mut Option<watch::Receiver<AppConfig>>) -> Option<AppConfig> {
    match rx {
        Some(rx) => {
            rx.changed().await.ok()?;
            Some(rx.borrow_and_update().clone())
        }
        None => std::future::pending().await,
    }
}

pub async fn run(ctx: &AppContext) -> Result<()> {
    let db = ctx.open_database()?;
    let mut backups = ctx.backup_service();

    let manager = ctx.migration_manager(Arc::clone(&db), Some(&backups))?;
    let outcome = manager
        .check_and_migrate(ctx.config.database.auto_migrate)
        .context("startup migration failed")?;
    if outcome.is_pending() {
        warn!("{outcome}; run `wems migrate` to apply");
    } else {
        info!("{outcome}");
    }
    drop(manager);

    let schema_version = {
        let conn = db.connection()?;
        version::current(&conn)?.map(|record| record.schema_version)
    };
    banner::print_banner(&ctx.config, &ctx.config_dir, schema_version);

    backups
        .start_scheduler()
        .context("failed to start the backup scheduler")?;

    let loader = ConfigLoader::new(&ctx.config_dir);
    let (_watcher, mut config_rx) = match loader.config_path() {
        Some(path) => match ConfigWatcher::start(path, ctx.config.clone()) {
            Ok((watcher, rx)) => (Some(watcher), Some(rx)),
            Err(e) => {
                warn!("config hot-reload disabled: {e}");
                (None, None)
            }
        },
        None => (None, None),
    };

    let db_path = ctx.database_path();
    loop {
        let mut watcher_closed = false;
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for Ctrl+C")?;
                info!("shutting down");
                break;
            }
            update = next_config(&mut config_rx) => {
                match update {
                    Some(config) => {
                        if config.resolve_database_path(&ctx.config_dir) != db_path {
                            warn!("database path changed in config; restart to use it");
                        }
                        if let Err(e) = backups.apply_app_config(&config, &ctx.config_dir) {
                            warn!("ignoring backup settings from reloaded config: {e}");
                        }
                    }
                    None => watcher_closed = true,
                }
            }
        }
        if watcher_closed {
            config_rx = None;
        }
    }

    backups.shutdown().await;
    Ok(())
}
