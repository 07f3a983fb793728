//! Base tables and small schema introspection helpers shared by migrations.

use rusqlite::{Connection, params};
use wareflow_common::{Error, Result};

/// Tables as they existed before any tracked migration.
pub(crate) fn ensure_base_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS employees (
            id TEXT PRIMARY KEY,
            external_id TEXT UNIQUE,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            current_status TEXT NOT NULL,
            workspace TEXT NOT NULL,
            role TEXT NOT NULL,
            contract_type TEXT NOT NULL,
            entry_date DATE NOT NULL,
            avatar_path TEXT,
            phone TEXT,
            email TEXT,
            created_at TIMESTAMP NOT NULL,
            updated_at TIMESTAMP NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_employees_external_id ON employees (external_id);
        CREATE INDEX IF NOT EXISTS idx_employees_current_status ON employees (current_status);
        CREATE INDEX IF NOT EXISTS idx_employees_workspace ON employees (workspace);
        CREATE INDEX IF NOT EXISTS idx_employees_role ON employees (role);
        CREATE INDEX IF NOT EXISTS idx_employees_contract_type ON employees (contract_type);

        CREATE TABLE IF NOT EXISTS caces (
            id TEXT PRIMARY KEY,
            employee_id TEXT NOT NULL REFERENCES employees(id) ON DELETE CASCADE,
            kind TEXT NOT NULL,
            completion_date DATE NOT NULL,
            expiration_date DATE NOT NULL,
            document_path TEXT,
            created_at TIMESTAMP NOT NULL,
            updated_at TIMESTAMP NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_caces_employee ON caces (employee_id);
        CREATE INDEX IF NOT EXISTS idx_caces_expiration ON caces (expiration_date);

        CREATE TABLE IF NOT EXISTS medical_visits (
            id TEXT PRIMARY KEY,
            employee_id TEXT NOT NULL REFERENCES employees(id) ON DELETE CASCADE,
            visit_type TEXT NOT NULL,
            visit_date DATE NOT NULL,
            expiration_date DATE NOT NULL,
            result TEXT NOT NULL,
            document_path TEXT,
            created_at TIMESTAMP NOT NULL,
            updated_at TIMESTAMP NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_medical_visits_employee ON medical_visits (employee_id);

        CREATE TABLE IF NOT EXISTS online_trainings (
            id TEXT PRIMARY KEY,
            employee_id TEXT NOT NULL REFERENCES employees(id) ON DELETE CASCADE,
            title TEXT NOT NULL,
            completion_date DATE NOT NULL,
            validity_months INTEGER,
            expiration_date DATE,
            certificate_path TEXT,
            created_at TIMESTAMP NOT NULL,
            updated_at TIMESTAMP NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_online_trainings_employee ON online_trainings (employee_id);",
    )
    .map_err(|e| Error::Database(format!("failed to create base schema: {e}")))?;

    Ok(())
}

/// Column as reported by `PRAGMA table_info`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub not_null: bool,
}

pub fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    conn.query_row(
        "SELECT count(*) > 0 FROM sqlite_master WHERE type='table' AND name=?1",
        params![table],
        |row| row.get(0),
    )
    .map_err(|e| Error::Database(format!("failed to check table {table}: {e}")))
}

pub fn columns(conn: &Connection, table: &str) -> Result<Vec<ColumnInfo>> {
    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info([{table}])"))
        .map_err(|e| Error::Database(format!("failed to inspect {table}: {e}")))?;

    let rows = stmt
        .query_map([], |row| {
            Ok(ColumnInfo {
                name: row.get(1)?,
                not_null: row.get::<_, i64>(3)? != 0,
            })
        })
        .map_err(|e| Error::Database(format!("failed to inspect {table}: {e}")))?;

    rows.collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Database(format!("failed to read columns of {table}: {e}")))
}

pub fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    Ok(columns(conn, table)?.iter().any(|c| c.name == column))
}

pub(crate) fn foreign_keys_enabled(conn: &Connection) -> Result<bool> {
    let enabled: i64 = conn
        .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
        .map_err(|e| Error::Database(format!("failed to read foreign_keys pragma: {e}")))?;
    Ok(enabled != 0)
}

pub(crate) fn set_foreign_keys(conn: &Connection, enabled: bool) -> Result<()> {
    let value = if enabled { "ON" } else { "OFF" };
    conn.execute_batch(&format!("PRAGMA foreign_keys={value};"))
        .map_err(|e| Error::Database(format!("failed to set foreign_keys={value}: {e}")))
}
