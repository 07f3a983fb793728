//! Application/schema version tracking in the `app_version` table.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};
use wareflow_common::{Error, Result};

use crate::datetime_column;

/// Version of the application this crate belongs to.
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Schema revision produced by the built-in migrations.
pub const SCHEMA_VERSION: i64 = 4;

pub fn display_version() -> String {
    format!("v{APP_VERSION}")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRecord {
    pub app_version: String,
    pub schema_version: i64,
    pub note: String,
    pub recorded_at: DateTime<Utc>,
}

pub fn ensure_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS app_version (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            app_version TEXT NOT NULL,
            schema_version INTEGER NOT NULL,
            note TEXT NOT NULL DEFAULT '',
            recorded_at TEXT NOT NULL
        );",
    )
    .map_err(|e| Error::Database(format!("failed to create app_version table: {e}")))
}

/// The latest version row.
pub fn current(conn: &Connection) -> Result<Option<VersionRecord>> {
    let mut rows = query_versions(
        conn,
        "SELECT app_version, schema_version, note, recorded_at
         FROM app_version ORDER BY recorded_at DESC, id DESC LIMIT 1",
    )?;
    Ok(rows.pop())
}

pub fn current_app_version(conn: &Connection) -> Result<Option<String>> {
    Ok(current(conn)?.map(|v| v.app_version))
}

pub fn record(
    conn: &Connection,
    app_version: &str,
    schema_version: i64,
    note: &str,
) -> Result<VersionRecord> {
    let recorded_at = Utc::now();
    let stamp = recorded_at.to_rfc3339_opts(SecondsFormat::Micros, true);
    conn.execute(
        "INSERT INTO app_version (app_version, schema_version, note, recorded_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![app_version, schema_version, note, stamp],
    )
    .map_err(|e| Error::Database(format!("failed to record version {app_version}: {e}")))?;

    Ok(VersionRecord {
        app_version: app_version.to_string(),
        schema_version,
        note: note.to_string(),
        recorded_at,
    })
}

/// Every version row, newest first.
pub fn history(conn: &Connection) -> Result<Vec<VersionRecord>> {
    query_versions(
        conn,
        "SELECT app_version, schema_version, note, recorded_at
         FROM app_version ORDER BY recorded_at DESC, id DESC",
    )
}

fn query_versions(conn: &Connection, sql: &str) -> Result<Vec<VersionRecord>> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| Error::Database(format!("failed to prepare version query: {e}")))?;

    let rows = stmt
        .query_map([], |row| {
            Ok(VersionRecord {
                app_version: row.get(0)?,
                schema_version: row.get(1)?,
                note: row.get(2)?,
                recorded_at: datetime_column(row, 3)?,
            })
        })
        .map_err(|e| Error::Database(format!("failed to query versions: {e}")))?;

    rows.collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Database(format!("failed to read version row: {e}")))
}
