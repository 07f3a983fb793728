//! Fixtures shared by unit tests.

use rusqlite::{Connection, params};

pub(crate) const STAMP: &str = "2024-01-01T00:00:00Z";

pub(crate) fn insert_employee(conn: &Connection, id: &str, first: &str, last: &str) {
    conn.execute(
        "INSERT INTO employees (id, first_name, last_name, current_status, workspace, role,
                                contract_type, entry_date, created_at, updated_at)
         VALUES (?1, ?2, ?3, 'active', 'Quai', 'Cariste', 'CDI', '2024-01-01', ?4, ?4)",
        params![id, first, last, STAMP],
    )
    .unwrap();
}

pub(crate) fn insert_caces(conn: &Connection, id: &str, employee_id: &str) {
    conn.execute(
        "INSERT INTO caces (id, employee_id, kind, completion_date, expiration_date, created_at, updated_at)
         VALUES (?1, ?2, 'R489-1A', '2024-01-01', '2029-01-01', ?3, ?3)",
        params![id, employee_id, STAMP],
    )
    .unwrap();
}
