use rusqlite::Connection;
use tracing::{error, info, warn};
use wareflow_common::Result;

use crate::migration::Migration;
use crate::schema;

/// Creates `contracts` and `contract_amendments` and opens one active
/// contract for every employee still on the books.
pub struct AddContractHistory;

const CREATE_TABLES: &str = "
    CREATE TABLE IF NOT EXISTS contracts (
        id TEXT PRIMARY KEY,
        employee_id TEXT NOT NULL REFERENCES employees(id) ON DELETE CASCADE,
        contract_type TEXT NOT NULL,
        start_date DATE NOT NULL,
        end_date DATE,
        trial_period_end DATE,
        gross_salary DECIMAL(10,2),
        weekly_hours DECIMAL(4,2) DEFAULT 35.0,
        position TEXT NOT NULL,
        department TEXT NOT NULL,
        manager TEXT,
        status TEXT DEFAULT 'active',
        end_reason TEXT,
        contract_document_path TEXT,
        created_at TIMESTAMP NOT NULL,
        updated_at TIMESTAMP NOT NULL,
        created_by TEXT,
        notes TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_contracts_employee_start ON contracts (employee_id, start_date);
    CREATE INDEX IF NOT EXISTS idx_contracts_end_date ON contracts (end_date);
    CREATE INDEX IF NOT EXISTS idx_contracts_status ON contracts (status);
    CREATE INDEX IF NOT EXISTS idx_contracts_position ON contracts (position);
    CREATE INDEX IF NOT EXISTS idx_contracts_department ON contracts (department);

    CREATE TABLE IF NOT EXISTS contract_amendments (
        id TEXT PRIMARY KEY,
        contract_id TEXT NOT NULL REFERENCES contracts(id) ON DELETE CASCADE,
        amendment_date DATE NOT NULL,
        amendment_type TEXT NOT NULL,
        description TEXT NOT NULL,
        old_field_name TEXT NOT NULL,
        old_value TEXT,
        new_value TEXT,
        document_path TEXT,
        created_at TIMESTAMP NOT NULL,
        created_by TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_contract_amendments_contract_date
        ON contract_amendments (contract_id, amendment_date);
    CREATE INDEX IF NOT EXISTS idx_contract_amendments_type ON contract_amendments (amendment_type);
";

/// Condition selecting employees that are not in the trash.
fn active_condition(conn: &Connection, alias: &str) -> Result<String> {
    if schema::column_exists(conn, "employees", "deleted_at")? {
        Ok(format!("{alias}deleted_at IS NULL"))
    } else {
        Ok("1 = 1".to_string())
    }
}

impl Migration for AddContractHistory {
    fn name(&self) -> &str {
        "20260128_120000_add_contract_history"
    }

    fn up(&self, conn: &Connection) -> Result<()> {
        info!("creating contracts and contract_amendments tables");
        conn.execute_batch(CREATE_TABLES)?;

        let active = active_condition(conn, "")?;
        let seeded = conn.execute(
            &format!(
                "INSERT INTO contracts (
                    id, employee_id, contract_type, start_date, end_date,
                    position, department, status, created_at, updated_at
                 )
                 SELECT
                    lower(hex(randomblob(16))), id,
                    COALESCE(contract_type, 'CDI'),
                    COALESCE(entry_date, date(created_at)),
                    NULL, role, 'Logistics', 'active', created_at, created_at
                 FROM employees WHERE {active}"
            ),
            [],
        )?;
        info!("opened {seeded} initial contract(s)");
        Ok(())
    }

    fn down(&self, conn: &Connection) -> Result<()> {
        info!("dropping contract history tables");
        conn.execute_batch(
            "DROP TABLE IF EXISTS contract_amendments;
             DROP TABLE IF EXISTS contracts;",
        )?;
        Ok(())
    }

    fn pre_check(&self, conn: &Connection) -> Result<bool> {
        if schema::table_exists(conn, "contracts")? {
            warn!("contracts table already exists");
            return Ok(false);
        }
        Ok(true)
    }

    fn post_check(&self, conn: &Connection) -> Result<bool> {
        for table in ["contracts", "contract_amendments"] {
            if !schema::table_exists(conn, table)? {
                error!("{table} table was not created");
                return Ok(false);
            }
        }

        let active = active_condition(conn, "e.")?;
        let missing: i64 = conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM employees e
                 LEFT JOIN contracts c ON e.id = c.employee_id
                 WHERE {active} AND c.id IS NULL"
            ),
            [],
            |row| row.get(0),
        )?;
        if missing > 0 {
            error!("{missing} employee(s) without a contract after migration");
            return Ok(false);
        }
        Ok(true)
    }
}
