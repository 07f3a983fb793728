//! The `migrations` table: which migrations ran, in which batch, and when.

use std::collections::HashSet;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};
use wareflow_common::{Error, Result};

use crate::datetime_column;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationRecord {
    pub name: String,
    pub batch: i64,
    pub applied_at: DateTime<Utc>,
}

pub fn ensure_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS migrations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            batch INTEGER NOT NULL,
            applied_at TEXT NOT NULL
        );",
    )
    .map_err(|e| Error::Database(format!("failed to create migrations table: {e}")))
}

/// Applied migrations in the order they were applied.
pub fn applied(conn: &Connection) -> Result<Vec<MigrationRecord>> {
    query_records(
        conn,
        "SELECT name, batch, applied_at FROM migrations ORDER BY id ASC",
        [],
    )
}

pub fn applied_names(conn: &Connection) -> Result<HashSet<String>> {
    Ok(applied(conn)?.into_iter().map(|r| r.name).collect())
}

/// Records of one batch, most recently applied first.
pub fn in_batch(conn: &Connection, batch: i64) -> Result<Vec<MigrationRecord>> {
    query_records(
        conn,
        "SELECT name, batch, applied_at FROM migrations WHERE batch = ?1 ORDER BY id DESC",
        params![batch],
    )
}

/// Highest batch number, 0 for an empty ledger.
pub fn last_batch(conn: &Connection) -> Result<i64> {
    conn.query_row("SELECT COALESCE(MAX(batch), 0) FROM migrations", [], |row| {
        row.get(0)
    })
    .map_err(|e| Error::Database(format!("failed to read latest batch: {e}")))
}

/// The most recently applied migration, if any.
pub fn latest(conn: &Connection) -> Result<Option<MigrationRecord>> {
    let mut records = query_records(
        conn,
        "SELECT name, batch, applied_at FROM migrations ORDER BY id DESC LIMIT 1",
        [],
    )?;
    Ok(records.pop())
}

pub fn record(conn: &Connection, name: &str, batch: i64) -> Result<()> {
    let applied_at = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
    conn.execute(
        "INSERT INTO migrations (name, batch, applied_at) VALUES (?1, ?2, ?3)",
        params![name, batch, applied_at],
    )
    .map_err(|e| Error::Database(format!("failed to record migration {name}: {e}")))?;
    Ok(())
}

pub fn remove(conn: &Connection, name: &str) -> Result<bool> {
    let removed = conn
        .execute("DELETE FROM migrations WHERE name = ?1", params![name])
        .map_err(|e| Error::Database(format!("failed to remove migration {name}: {e}")))?;
    Ok(removed > 0)
}

fn query_records<P: rusqlite::Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> Result<Vec<MigrationRecord>> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| Error::Database(format!("failed to prepare ledger query: {e}")))?;

    let rows = stmt
        .query_map(params, |row| {
            Ok(MigrationRecord {
                name: row.get(0)?,
                batch: row.get(1)?,
                applied_at: datetime_column(row, 2)?,
            })
        })
        .map_err(|e| Error::Database(format!("failed to query ledger: {e}")))?;

    rows.collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Database(format!("failed to read ledger row: {e}")))
}
