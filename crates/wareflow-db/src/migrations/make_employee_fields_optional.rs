use rusqlite::Connection;
use tracing::{error, info};
use wareflow_common::{Error, Result};

use crate::migration::Migration;
use crate::schema;

/// Makes `employees.contract_type` and `employees.entry_date` nullable so
/// an employee can be created before the contract details are known.
///
/// SQLite cannot alter a column constraint, so the table is rebuilt.
pub struct MakeEmployeeFieldsOptional;

const INDEXES: &str = "
    CREATE INDEX IF NOT EXISTS idx_employees_external_id ON employees (external_id);
    CREATE INDEX IF NOT EXISTS idx_employees_current_status ON employees (current_status);
    CREATE INDEX IF NOT EXISTS idx_employees_workspace ON employees (workspace);
    CREATE INDEX IF NOT EXISTS idx_employees_role ON employees (role);
    CREATE INDEX IF NOT EXISTS idx_employees_contract_type ON employees (contract_type);
    CREATE INDEX IF NOT EXISTS idx_employees_deleted_at ON employees (deleted_at);
";

fn create_table_sql(required: bool) -> String {
    let constraint = if required { " NOT NULL" } else { "" };
    format!(
        "CREATE TABLE employees_new (
            id TEXT PRIMARY KEY,
            external_id TEXT UNIQUE,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            current_status TEXT NOT NULL,
            workspace TEXT NOT NULL,
            role TEXT NOT NULL,
            contract_type TEXT{constraint},
            entry_date DATE{constraint},
            avatar_path TEXT,
            phone TEXT,
            email TEXT,
            created_at TIMESTAMP NOT NULL,
            updated_at TIMESTAMP NOT NULL,
            deleted_at TIMESTAMP,
            deleted_by TEXT,
            deletion_reason TEXT
        )"
    )
}

/// Rebuild `employees`, copying every column the old and new tables share.
fn rebuild(conn: &Connection, required: bool) -> Result<()> {
    conn.execute_batch(&create_table_sql(required))?;

    let new_columns = schema::columns(conn, "employees_new")?;
    let shared: Vec<String> = schema::columns(conn, "employees")?
        .into_iter()
        .filter(|c| new_columns.iter().any(|n| n.name == c.name))
        .map(|c| c.name)
        .collect();
    let list = shared.join(", ");

    let copied = conn.execute(
        &format!("INSERT INTO employees_new ({list}) SELECT {list} FROM employees"),
        [],
    )?;
    info!("copied {copied} employee record(s)");

    conn.execute_batch("DROP TABLE employees; ALTER TABLE employees_new RENAME TO employees;")?;
    conn.execute_batch(INDEXES)?;
    Ok(())
}

fn fields_nullable(conn: &Connection) -> Result<(bool, bool)> {
    let columns = schema::columns(conn, "employees")?;
    let nullable = |name: &str| columns.iter().any(|c| c.name == name && !c.not_null);
    Ok((nullable("contract_type"), nullable("entry_date")))
}

impl Migration for MakeEmployeeFieldsOptional {
    fn name(&self) -> &str {
        "20260203_120000_make_employee_fields_optional"
    }

    fn up(&self, conn: &Connection) -> Result<()> {
        if fields_nullable(conn)? == (true, true) {
            info!("contract_type and entry_date already nullable");
            return Ok(());
        }
        info!("rebuilding employees with optional contract_type and entry_date");
        rebuild(conn, false)
    }

    fn down(&self, conn: &Connection) -> Result<()> {
        let nulls: i64 = conn.query_row(
            "SELECT COUNT(*) FROM employees WHERE contract_type IS NULL OR entry_date IS NULL",
            [],
            |row| row.get(0),
        )?;
        if nulls > 0 {
            error!("{nulls} employee(s) have no contract_type or entry_date");
            return Err(Error::Other(format!(
                "cannot make fields required: {nulls} employee(s) have NULL contract_type or entry_date"
            )));
        }
        info!("rebuilding employees with required contract_type and entry_date");
        rebuild(conn, true)
    }

    fn post_check(&self, conn: &Connection) -> Result<bool> {
        Ok(fields_nullable(conn)? == (true, true))
    }
}
