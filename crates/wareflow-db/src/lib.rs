pub mod database;
pub mod ledger;
pub mod manager;
pub mod migration;
pub mod migrations;
pub mod runner;
pub mod schema;
pub mod soft_delete;
pub mod validation;
pub mod version;

#[cfg(test)]
pub(crate) mod testing;

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::Row;
use rusqlite::types::Type;

pub use database::Database;
pub use ledger::MigrationRecord;
pub use manager::{MigrationManager, MigrationOutcome, MigrationPlan, Snapshotter};
pub use migration::{Migration, SqlMigration};
pub use runner::{
    MigrationRunResult, MigrationRunner, MigrationState, MigrationStatus, RollbackResult,
};
pub use soft_delete::{DeletedRow, TrackedTable};
pub use validation::{CheckResult, MigrationValidator, ValidationReport};
pub use version::{APP_VERSION, SCHEMA_VERSION, VersionRecord};

/// Naive layouts written by SQLite `CURRENT_TIMESTAMP` and by the Python
/// app (`str(datetime.now())`). Read as UTC.
const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

pub(crate) fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Read a timestamp column, failing the row on a value no format accepts.
pub(crate) fn datetime_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_datetime(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("unrecognised timestamp {raw:?}").into(),
        )
    })
}
