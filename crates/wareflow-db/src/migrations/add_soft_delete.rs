use rusqlite::Connection;
use tracing::{debug, info};
use wareflow_common::Result;

use crate::migration::Migration;
use crate::schema;
use crate::soft_delete::{SOFT_DELETE_COLUMNS, TrackedTable};

/// Adds the soft-delete columns to every tracked table.
///
/// Columns that already exist are left alone. There is no `down`: dropping
/// the columns would lose the trash.
pub struct AddSoftDelete;

impl Migration for AddSoftDelete {
    fn name(&self) -> &str {
        "20260115_090000_add_soft_delete"
    }

    fn up(&self, conn: &Connection) -> Result<()> {
        for table in TrackedTable::ALL {
            for (column, sql_type) in SOFT_DELETE_COLUMNS {
                if schema::column_exists(conn, table.as_str(), column)? {
                    debug!("column already exists: {table}.{column}");
                    continue;
                }
                conn.execute_batch(&format!(
                    "ALTER TABLE {table} ADD COLUMN {column} {sql_type} NULL"
                ))?;
                info!("added column {table}.{column}");
            }
        }
        conn.execute_batch(
            "CREATE INDEX IF NOT EXISTS idx_employees_deleted_at ON employees (deleted_at)",
        )?;
        Ok(())
    }
}
