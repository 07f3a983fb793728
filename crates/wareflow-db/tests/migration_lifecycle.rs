use std::path::Path;
use std::sync::Arc;

use rusqlite::params;
use wareflow_db::soft_delete::{self, TrackedTable};
use wareflow_db::{
    APP_VERSION, Database, MigrationManager, MigrationOutcome, MigrationRunner, MigrationState,
    MigrationValidator, schema,
};

fn seed_employee(db: &Database, id: &str) {
    let conn = db.connection().unwrap();
    conn.execute(
        "INSERT INTO employees (id, first_name, last_name, current_status, workspace, role,
                                contract_type, entry_date, created_at, updated_at)
         VALUES (?1, 'Test', 'Employee', 'active', 'Quai', 'Cariste', 'CDD', '2025-03-01',
                 '2025-03-01T08:00:00Z', '2025-03-01T08:00:00Z')",
        params![id],
    )
    .unwrap();
}

fn manager_for(path: &Path, migrations_dir: Option<&Path>) -> MigrationManager {
    let db = Arc::new(Database::open(path).unwrap());
    MigrationManager::new(db, MigrationRunner::with_dir(migrations_dir).unwrap())
        .with_validator(MigrationValidator::with_defaults(Some(path), 0))
}

#[test]
fn upgrades_existing_database_and_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("employee_manager.db");

    {
        let db = Database::open(&path).unwrap();
        seed_employee(&db, "e1");
        seed_employee(&db, "e2");
    }

    let manager = manager_for(&path, None);
    let outcome = manager.check_and_migrate(true).unwrap();
    assert!(matches!(outcome, MigrationOutcome::Applied { batch: 1, .. }));

    {
        let conn = manager.database().connection().unwrap();
        let contracts: i64 = conn
            .query_row("SELECT COUNT(*) FROM contracts WHERE status = 'active'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(contracts, 2);

        let columns = schema::columns(&conn, "employees").unwrap();
        assert!(columns.iter().any(|c| c.name == "entry_date" && !c.not_null));

        assert!(soft_delete::soft_delete(&conn, TrackedTable::Employees, "e2", Some("rh"), None).unwrap());
        assert_eq!(soft_delete::active_ids(&conn, TrackedTable::Employees).unwrap(), ["e1"]);
    }
    drop(manager);

    let reopened = manager_for(&path, None);
    assert_eq!(reopened.check_and_migrate(true).unwrap(), MigrationOutcome::UpToDate);
    assert_eq!(
        reopened.plan().unwrap().current_version.as_deref(),
        Some(APP_VERSION)
    );
    let conn = reopened.database().connection().unwrap();
    assert_eq!(soft_delete::count_deleted(&conn, TrackedTable::Employees).unwrap(), 1);
}

#[test]
fn directory_migrations_form_their_own_batch() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ems.db");
    let migrations_dir = dir.path().join("migrations");

    manager_for(&path, Some(&migrations_dir))
        .check_and_migrate(true)
        .unwrap();

    std::fs::create_dir_all(&migrations_dir).unwrap();
    std::fs::write(
        migrations_dir.join("20260301_100000_add_badge_number.sql"),
        "-- up
ALTER TABLE employees ADD COLUMN badge_number TEXT;
-- down
ALTER TABLE employees DROP COLUMN badge_number;
-- post_check
SELECT count(*) FROM pragma_table_info('employees') WHERE name = 'badge_number';
",
    )
    .unwrap();

    let manager = manager_for(&path, Some(&migrations_dir));
    assert_eq!(manager.plan().unwrap().pending, ["20260301_100000_add_badge_number"]);

    let outcome = manager.check_and_migrate(true).unwrap();
    assert!(matches!(outcome, MigrationOutcome::Applied { batch: 2, ref migrations, .. } if migrations.len() == 1));

    let status = manager.status().unwrap();
    let badge = status
        .iter()
        .find(|s| s.name == "20260301_100000_add_badge_number")
        .unwrap();
    assert!(matches!(badge.state, MigrationState::Applied { batch: 2, .. }));

    let rolled = manager.rollback_last_batch().unwrap();
    assert_eq!(rolled.batch, Some(2));
    assert_eq!(rolled.rolled_back, ["20260301_100000_add_badge_number"]);

    let conn = manager.database().connection().unwrap();
    assert!(!schema::column_exists(&conn, "employees", "badge_number").unwrap());
    assert!(schema::table_exists(&conn, "contracts").unwrap());
}

#[test]
fn removed_definitions_show_as_orphaned() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ems.db");
    let migrations_dir = dir.path().join("migrations");
    std::fs::create_dir_all(&migrations_dir).unwrap();
    let file = migrations_dir.join("20260301_100000_temp.sql");
    std::fs::write(&file, "CREATE TABLE temp_table (id INTEGER);").unwrap();

    manager_for(&path, Some(&migrations_dir))
        .check_and_migrate(true)
        .unwrap();
    std::fs::remove_file(&file).unwrap();

    let status = manager_for(&path, Some(&migrations_dir)).status().unwrap();
    let last = status.last().unwrap();
    assert_eq!(last.name, "20260301_100000_temp");
    assert!(matches!(last.state, MigrationState::Orphaned { batch: 1, .. }));
}
