use std::io::IsTerminal;
use std::path::Path;

use anyhow::{Context, Result, bail};
use dialoguer::Confirm;
use wareflow_backup::{BackupEvent, BackupStatistics};

use super::{AppContext, format_size};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn create(ctx: &AppContext, description: Option<&str>) -> Result<()> {
    let service = ctx.backup_service();
    let path = service
        .create_backup(description)
        .context("backup failed")?;

    if ctx.json {
        return ctx.print_json(&serde_json::json!({ "path": path }));
    }
    println!("Backup written to {}", path.display());
    Ok(())
}

pub fn list(ctx: &AppContext) -> Result<()> {
    let service = ctx.backup_service();
    let backups = service.list_backups()?;

    if ctx.json {
        return ctx.print_json(&backups);
    }
    if backups.is_empty() {
        println!("No backups in {}", service.backup_dir().display());
        return Ok(());
    }
    for backup in &backups {
        println!(
            "  {}  {:>10}  {}",
            backup.created.format(TIME_FORMAT),
            format_size(backup.size_bytes),
            backup.file_name
        );
    }
    println!();
    println!("{} backup(s) in {}", backups.len(), service.backup_dir().display());
    Ok(())
}

pub fn verify(ctx: &AppContext, path: &Path) -> Result<()> {
    let verification = ctx.backup_service().verify_backup(path)?;

    if ctx.json {
        ctx.print_json(&verification)?;
    } else if verification.valid {
        println!("{}: OK", path.display());
        if let Some(count) = verification.employee_count {
            println!("  {count} employee(s), {}", format_size(verification.size_bytes));
        }
    } else {
        println!("{}: INVALID ({})", path.display(), verification.integrity);
    }

    if !verification.valid {
        bail!("backup {} failed verification", path.display());
    }
    Ok(())
}

pub fn restore(ctx: &AppContext, path: &Path, yes: bool) -> Result<()> {
    let db_path = ctx.database_path();
    if !yes {
        if !std::io::stdin().is_terminal() {
            bail!("refusing to restore without confirmation; pass --yes");
        }
        let confirmed = Confirm::new()
            .with_prompt(format!(
                "Replace {} with {}?",
                db_path.display(),
                path.display()
            ))
            .default(false)
            .interact()
            .context("confirmation cancelled")?;
        if !confirmed {
            println!("Restore cancelled.");
            return Ok(());
        }
    }

    let safety = ctx
        .backup_service()
        .restore_backup(path)
        .with_context(|| format!("failed to restore {}", path.display()))?;

    if ctx.json {
        return ctx.print_json(&serde_json::json!({
            "restored_from": path,
            "database": db_path,
            "safety_backup": safety,
        }));
    }
    println!("Database restored from {}", path.display());
    if let Some(safety) = safety {
        println!("Previous database saved as {}", safety.display());
    }
    Ok(())
}

pub fn stats(ctx: &AppContext) -> Result<()> {
    let service = ctx.backup_service();
    let stats = service.stats()?;
    let statistics = service.statistics()?;

    if ctx.json {
        return ctx.print_json(&serde_json::json!({
            "files": stats,
            "journal": statistics,
        }));
    }
    println!("Backups:    {}", stats.total_count);
    println!("Total size: {}", format_size(stats.total_size_bytes));
    if let (Some(oldest), Some(newest)) = (stats.oldest, stats.newest) {
        println!("Oldest:     {}", oldest.format(TIME_FORMAT));
        println!("Newest:     {}", newest.format(TIME_FORMAT));
    }
    println!();
    for line in journal_lines(&statistics) {
        println!("{line}");
    }
    Ok(())
}

fn journal_lines(statistics: &BackupStatistics) -> Vec<String> {
    if statistics.total_backups == 0 && statistics.skipped_runs == 0 {
        return vec!["No backup runs recorded.".to_string()];
    }
    let mut lines = vec![format!(
        "Runs:       {} ({} ok, {} failed, {} skipped)",
        statistics.total_backups,
        statistics.successful_backups,
        statistics.failed_backups,
        statistics.skipped_runs
    )];
    if let Some(rate) = statistics.success_rate() {
        lines.push(format!("Success:    {rate:.1}%"));
    }
    if let Some(last) = statistics.last_backup {
        lines.push(format!("Last run:   {}", last.format(TIME_FORMAT)));
    }
    if let Some(last) = statistics.last_successful_backup {
        lines.push(format!("Last ok:    {}", last.format(TIME_FORMAT)));
    }
    if let Some(average) = statistics.average_duration_secs {
        lines.push(format!("Avg time:   {average:.2}s"));
    }
    lines.push(format!("Written:    {}", format_size(statistics.total_size_bytes)));
    lines
}

pub fn history(ctx: &AppContext, limit: usize) -> Result<()> {
    let events = ctx.backup_service().history(limit)?;

    if ctx.json {
        return ctx.print_json(&events);
    }
    if events.is_empty() {
        println!("No backup activity recorded.");
        return Ok(());
    }
    for event in &events {
        println!("  {}", describe(event));
    }
    Ok(())
}

fn describe(event: &BackupEvent) -> String {
    let mut line = format!(
        "{}  {:<15}",
        event.timestamp.format(TIME_FORMAT),
        event.event
    );
    if let Some(kind) = event.kind {
        line.push_str(&format!(" {kind}"));
    }
    if let Some(path) = &event.path {
        let name = path.file_name().unwrap_or(path.as_os_str());
        line.push_str(&format!(" {}", name.to_string_lossy()));
    }
    if let Some(size) = event.size_bytes {
        line.push_str(&format!(" ({})", format_size(size)));
    }
    if let Some(error) = &event.error {
        line.push_str(&format!(" error: {error}"));
    }
    let reason = event
        .details
        .as_ref()
        .and_then(|d| d.get("reason"))
        .and_then(|r| r.as_str());
    if let Some(reason) = reason {
        line.push_str(&format!(" ({reason})"));
    }
    line
}
