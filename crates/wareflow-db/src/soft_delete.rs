//! Trash support for the tracked tables.
//!
//! A soft-deleted row keeps all its data; only `deleted_at`, `deleted_by`
//! and `deletion_reason` change. Related rows are not cascaded.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};
use wareflow_common::{Error, Result};

use crate::{datetime_column, schema};

/// Columns added by the soft-delete migration, with their SQL types.
pub const SOFT_DELETE_COLUMNS: [(&str, &str); 3] = [
    ("deleted_at", "TIMESTAMP"),
    ("deleted_by", "TEXT"),
    ("deletion_reason", "TEXT"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackedTable {
    Employees,
    Caces,
    MedicalVisits,
    OnlineTrainings,
}

impl TrackedTable {
    pub const ALL: [TrackedTable; 4] = [
        TrackedTable::Employees,
        TrackedTable::Caces,
        TrackedTable::MedicalVisits,
        TrackedTable::OnlineTrainings,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TrackedTable::Employees => "employees",
            TrackedTable::Caces => "caces",
            TrackedTable::MedicalVisits => "medical_visits",
            TrackedTable::OnlineTrainings => "online_trainings",
        }
    }
}

impl fmt::Display for TrackedTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrackedTable {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        TrackedTable::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| {
                format!(
                    "unknown table '{s}' (expected one of: employees, caces, medical_visits, online_trainings)"
                )
            })
    }
}

/// A row in the trash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeletedRow {
    pub table: TrackedTable,
    pub id: String,
    pub deleted_at: DateTime<Utc>,
    pub deleted_by: Option<String>,
    pub reason: Option<String>,
}

fn require_columns(conn: &Connection, table: TrackedTable) -> Result<()> {
    if schema::column_exists(conn, table.as_str(), "deleted_at")? {
        Ok(())
    } else {
        Err(Error::Other(format!(
            "{table} has no soft-delete columns; apply pending migrations first"
        )))
    }
}

/// Mark a row deleted. Returns `false` if it is missing or already deleted.
pub fn soft_delete(
    conn: &Connection,
    table: TrackedTable,
    id: &str,
    deleted_by: Option<&str>,
    reason: Option<&str>,
) -> Result<bool> {
    require_columns(conn, table)?;
    let now = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
    let changed = conn
        .execute(
            &format!(
                "UPDATE {table} SET deleted_at = ?1, deleted_by = ?2, deletion_reason = ?3
                 WHERE id = ?4 AND deleted_at IS NULL"
            ),
            params![now, deleted_by, reason, id],
        )
        .map_err(|e| Error::Database(format!("failed to soft delete {table}/{id}: {e}")))?;
    Ok(changed > 0)
}

/// Clear the deletion metadata. Returns `false` if the row is not in the trash.
pub fn restore(conn: &Connection, table: TrackedTable, id: &str) -> Result<bool> {
    require_columns(conn, table)?;
    let changed = conn
        .execute(
            &format!(
                "UPDATE {table} SET deleted_at = NULL, deleted_by = NULL, deletion_reason = NULL
                 WHERE id = ?1 AND deleted_at IS NOT NULL"
            ),
            params![id],
        )
        .map_err(|e| Error::Database(format!("failed to restore {table}/{id}: {e}")))?;
    Ok(changed > 0)
}

pub fn active_ids(conn: &Connection, table: TrackedTable) -> Result<Vec<String>> {
    require_columns(conn, table)?;
    let mut stmt = conn
        .prepare(&format!(
            "SELECT id FROM {table} WHERE deleted_at IS NULL ORDER BY id"
        ))
        .map_err(|e| Error::Database(format!("failed to prepare query: {e}")))?;

    let rows = stmt
        .query_map([], |row| row.get(0))
        .map_err(|e| Error::Database(format!("failed to query {table}: {e}")))?;

    rows.collect::<std::result::Result<Vec<String>, _>>()
        .map_err(|e| Error::Database(format!("failed to read {table} row: {e}")))
}

/// Trash contents, most recently deleted first.
pub fn deleted(conn: &Connection, table: TrackedTable) -> Result<Vec<DeletedRow>> {
    require_columns(conn, table)?;
    let mut stmt = conn
        .prepare(&format!(
            "SELECT id, deleted_at, deleted_by, deletion_reason FROM {table}
             WHERE deleted_at IS NOT NULL ORDER BY deleted_at DESC, id"
        ))
        .map_err(|e| Error::Database(format!("failed to prepare query: {e}")))?;

    let rows = stmt
        .query_map([], |row| {
            Ok(DeletedRow {
                table,
                id: row.get(0)?,
                deleted_at: datetime_column(row, 1)?,
                deleted_by: row.get(2)?,
                reason: row.get(3)?,
            })
        })
        .map_err(|e| Error::Database(format!("failed to query {table} trash: {e}")))?;

    rows.collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Database(format!("failed to read {table} row: {e}")))
}

pub fn count_active(conn: &Connection, table: TrackedTable) -> Result<usize> {
    count_where(conn, table, "deleted_at IS NULL")
}

pub fn count_deleted(conn: &Connection, table: TrackedTable) -> Result<usize> {
    count_where(conn, table, "deleted_at IS NOT NULL")
}

fn count_where(conn: &Connection, table: TrackedTable, filter: &str) -> Result<usize> {
    require_columns(conn, table)?;
    let count: i64 = conn
        .query_row(
            &format!("SELECT COUNT(*) FROM {table} WHERE {filter}"),
            [],
            |row| row.get(0),
        )
        .map_err(|e| Error::Database(format!("failed to count {table}: {e}")))?;
    Ok(count as usize)
}
