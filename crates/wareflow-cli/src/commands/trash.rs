use anyhow::{Context, Result, bail};
use wareflow_db::TrackedTable;
use wareflow_db::soft_delete;

use super::AppContext;

pub fn list(ctx: &AppContext, table: Option<TrackedTable>) -> Result<()> {
    let db = ctx.open_database()?;
    let conn = db.connection()?;

    let tables = match table {
        Some(table) => vec![table],
        None => TrackedTable::ALL.to_vec(),
    };
    let mut rows = Vec::new();
    for table in tables {
        rows.extend(
            soft_delete::deleted(&conn, table)
                .with_context(|| format!("failed to read {table} trash"))?,
        );
    }

    if ctx.json {
        return ctx.print_json(&rows);
    }
    if rows.is_empty() {
        println!("Trash is empty.");
        return Ok(());
    }
    for row in &rows {
        print!(
            "  {:<16} {:<12} {}",
            row.table,
            row.id,
            row.deleted_at.format("%Y-%m-%d %H:%M")
        );
        if let Some(by) = &row.deleted_by {
            print!("  by {by}");
        }
        if let Some(reason) = &row.reason {
            print!("  ({reason})");
        }
        println!();
    }
    Ok(())
}

pub fn delete(
    ctx: &AppContext,
    table: TrackedTable,
    id: &str,
    deleted_by: Option<&str>,
    reason: Option<&str>,
) -> Result<()> {
    let db = ctx.open_database()?;
    let conn = db.connection()?;
    if !soft_delete::soft_delete(&conn, table, id, deleted_by, reason)? {
        bail!("{table}/{id} does not exist or is already in the trash");
    }
    println!("Moved {table}/{id} to the trash.");
    Ok(())
}

pub fn restore(ctx: &AppContext, table: TrackedTable, id: &str) -> Result<()> {
    let db = ctx.open_database()?;
    let conn = db.connection()?;
    if !soft_delete::restore(&conn, table, id)? {
        bail!("{table}/{id} is not in the trash");
    }
    println!("Restored {table}/{id}.");
    Ok(())
}
