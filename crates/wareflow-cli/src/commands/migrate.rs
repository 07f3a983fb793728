use anyhow::{Context, Result};
use tracing::info;
use wareflow_db::version::display_version;
use wareflow_db::{MigrationOutcome, MigrationState, SCHEMA_VERSION};

use super::AppContext;

pub fn migrate(ctx: &AppContext, dry_run: bool) -> Result<()> {
    let db = ctx.open_database()?;
    let backups = ctx.backup_service();
    let manager = ctx.migration_manager(db, Some(&backups))?;

    if dry_run {
        let plan = manager.plan()?;
        if ctx.json {
            return ctx.print_json(&plan);
        }
        println!(
            "Database version: {} -> {}",
            plan.current_version.as_deref().unwrap_or("none"),
            plan.target_version
        );
        if plan.pending.is_empty() {
            println!("No pending migrations.");
        } else {
            println!("Would apply {} migration(s):", plan.pending.len());
            for name in &plan.pending {
                println!("  + {name}");
            }
        }
        return Ok(());
    }

    let outcome = manager
        .check_and_migrate(true)
        .context("migration failed")?;
    if ctx.json {
        return ctx.print_json(&outcome);
    }

    println!("{outcome}");
    if let MigrationOutcome::Applied {
        batch,
        migrations,
        backup,
    } = &outcome
    {
        for name in migrations {
            println!("  + {name} (batch {batch})");
        }
        if let Some(path) = backup {
            println!("Pre-migration backup: {}", path.display());
        }
    }
    Ok(())
}

pub fn status(ctx: &AppContext) -> Result<()> {
    let db = ctx.open_database()?;
    let manager = ctx.migration_manager(db, None)?;
    let plan = manager.plan()?;
    let statuses = manager.status()?;

    if ctx.json {
        return ctx.print_json(&serde_json::json!({
            "plan": plan,
            "migrations": statuses,
        }));
    }

    println!("Database: {}", ctx.database_path().display());
    println!(
        "Recorded version: {} (this build: {}, schema {})",
        plan.current_version.as_deref().unwrap_or("none"),
        plan.target_version,
        plan.schema_version
    );
    println!();
    for status in &statuses {
        match &status.state {
            MigrationState::Pending => println!("  [ ] {}  pending", status.name),
            MigrationState::Applied { batch, applied_at } => println!(
                "  [x] {}  batch {batch}, {}",
                status.name,
                applied_at.format("%Y-%m-%d %H:%M:%S")
            ),
            MigrationState::Orphaned { batch, applied_at } => println!(
                "  [?] {}  batch {batch}, {} (no longer defined)",
                status.name,
                applied_at.format("%Y-%m-%d %H:%M:%S")
            ),
        }
    }
    println!();
    if plan.pending.is_empty() {
        println!("Up to date.");
    } else {
        println!(
            "{} pending migration(s). Run `wems migrate` to apply.",
            plan.pending.len()
        );
    }
    Ok(())
}

pub fn rollback(ctx: &AppContext, name: Option<&str>) -> Result<()> {
    let db = ctx.open_database()?;
    let backups = ctx.backup_service();
    let manager = ctx.migration_manager(db, None)?;

    if ctx.config.backup.backup_before_migration {
        let path = backups
            .create_backup(Some("pre_rollback"))
            .context("pre-rollback backup failed")?;
        info!("pre-rollback backup: {}", path.display());
    }

    let rolled_back = match name {
        Some(name) => {
            manager
                .rollback(name)
                .with_context(|| format!("failed to roll back {name}"))?;
            vec![name.to_string()]
        }
        None => {
            manager
                .rollback_last_batch()
                .context("failed to roll back the last batch")?
                .rolled_back
        }
    };

    if ctx.json {
        return ctx.print_json(&serde_json::json!({ "rolled_back": rolled_back }));
    }
    if rolled_back.is_empty() {
        println!("Nothing to roll back.");
    } else {
        println!("Rolled back {} migration(s):", rolled_back.len());
        for name in &rolled_back {
            println!("  - {name}");
        }
    }
    Ok(())
}

pub fn version(ctx: &AppContext) -> Result<()> {
    let db_path = ctx.database_path();
    let history = if db_path.exists() {
        let db = ctx.open_database()?;
        ctx.migration_manager(db, None)?.version_history()?
    } else {
        Vec::new()
    };

    if ctx.json {
        return ctx.print_json(&serde_json::json!({
            "app_version": wareflow_db::APP_VERSION,
            "schema_version": SCHEMA_VERSION,
            "history": history,
        }));
    }

    println!("wems {} (schema {SCHEMA_VERSION})", display_version());
    if history.is_empty() {
        println!("No version recorded in {}", db_path.display());
        return Ok(());
    }
    println!();
    for record in &history {
        println!(
            "  {}  v{} (schema {})  {}",
            record.recorded_at.format("%Y-%m-%d %H:%M:%S"),
            record.app_version,
            record.schema_version,
            record.note
        );
    }
    Ok(())
}
