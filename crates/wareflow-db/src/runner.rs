//! Applies and rolls back migrations against the ledger.
//!
//! Each migration's `up` and its ledger row commit together in one
//! transaction, so the ledger always matches what actually ran. A failure
//! stops the run; migrations applied earlier in the same batch stay applied
//! and recorded.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::Serialize;
use tracing::{error, info, warn};
use wareflow_common::{Error, Result};

use crate::ledger::{self, MigrationRecord};
use crate::migration::{self, Migration};
use crate::{migrations, schema};

pub struct MigrationRunner {
    migrations: Vec<Box<dyn Migration>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum MigrationState {
    Pending,
    Applied {
        batch: i64,
        applied_at: DateTime<Utc>,
    },
    /// Recorded in the ledger but no longer defined.
    Orphaned {
        batch: i64,
        applied_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationStatus {
    pub name: String,
    #[serde(flatten)]
    pub state: MigrationState,
}

#[derive(Debug, Clone, Default)]
pub struct MigrationRunResult {
    /// Batch the migrations were recorded under; `None` when nothing ran.
    pub batch: Option<i64>,
    pub applied: Vec<String>,
    /// Migrations already in the ledger.
    pub skipped: usize,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct RollbackResult {
    pub batch: Option<i64>,
    pub rolled_back: Vec<String>,
    pub elapsed: Duration,
}

impl MigrationRunner {
    /// Build a runner over `migrations`, ordered by name. Names must be unique.
    pub fn new(mut migrations: Vec<Box<dyn Migration>>) -> Result<Self> {
        migrations.sort_by(|a, b| a.name().cmp(b.name()));
        if let Some(pair) = migrations.windows(2).find(|w| w[0].name() == w[1].name()) {
            return Err(Error::Other(format!(
                "duplicate migration name: {}",
                pair[0].name()
            )));
        }
        Ok(Self { migrations })
    }

    /// The migrations shipped with the application.
    pub fn builtin() -> Result<Self> {
        Self::new(migrations::builtin())
    }

    /// Built-in migrations plus the `.sql` files found in `dir`.
    pub fn with_dir(dir: Option<&Path>) -> Result<Self> {
        let mut all = migrations::builtin();
        if let Some(dir) = dir {
            let discovered = migration::load_dir(dir)?;
            info!(
                "discovered {} migration file(s) in {}",
                discovered.len(),
                dir.display()
            );
            all.extend(
                discovered
                    .into_iter()
                    .map(|m| Box::new(m) as Box<dyn Migration>),
            );
        }
        Self::new(all)
    }

    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.migrations.iter().map(|m| m.name()).collect()
    }

    fn find(&self, name: &str) -> Option<&dyn Migration> {
        self.migrations
            .iter()
            .find(|m| m.name() == name)
            .map(|m| m.as_ref())
    }

    /// Definitions not yet in the ledger, in apply order.
    pub fn pending(&self, conn: &Connection) -> Result<Vec<&dyn Migration>> {
        ledger::ensure_table(conn)?;
        let applied = ledger::applied_names(conn)?;
        Ok(self.unapplied(&applied))
    }

    pub fn pending_names(&self, conn: &Connection) -> Result<Vec<String>> {
        Ok(self
            .pending(conn)?
            .iter()
            .map(|m| m.name().to_string())
            .collect())
    }

    fn unapplied(&self, applied: &HashSet<String>) -> Vec<&dyn Migration> {
        self.migrations
            .iter()
            .filter(|m| !applied.contains(m.name()))
            .map(|m| m.as_ref())
            .collect()
    }

    pub fn status(&self, conn: &Connection) -> Result<Vec<MigrationStatus>> {
        ledger::ensure_table(conn)?;
        let records: HashMap<String, MigrationRecord> = ledger::applied(conn)?
            .into_iter()
            .map(|r| (r.name.clone(), r))
            .collect();

        let mut statuses: Vec<MigrationStatus> = self
            .migrations
            .iter()
            .map(|m| MigrationStatus {
                name: m.name().to_string(),
                state: match records.get(m.name()) {
                    Some(r) => MigrationState::Applied {
                        batch: r.batch,
                        applied_at: r.applied_at,
                    },
                    None => MigrationState::Pending,
                },
            })
            .collect();

        let defined: HashSet<&str> = self.migrations.iter().map(|m| m.name()).collect();
        let mut orphans: Vec<&MigrationRecord> = records
            .values()
            .filter(|r| !defined.contains(r.name.as_str()))
            .collect();
        orphans.sort_by(|a, b| a.name.cmp(&b.name));
        statuses.extend(orphans.into_iter().map(|r| MigrationStatus {
            name: r.name.clone(),
            state: MigrationState::Orphaned {
                batch: r.batch,
                applied_at: r.applied_at,
            },
        }));

        Ok(statuses)
    }

    /// Apply every pending migration as one new batch.
    pub fn run(&self, conn: &mut Connection) -> Result<MigrationRunResult> {
        let start = Instant::now();
        ledger::ensure_table(conn)?;
        let applied = ledger::applied_names(conn)?;
        let pending = self.unapplied(&applied);

        if pending.is_empty() {
            return Ok(MigrationRunResult {
                batch: None,
                applied: Vec::new(),
                skipped: applied.len(),
                elapsed: start.elapsed(),
            });
        }

        let batch = ledger::last_batch(conn)? + 1;
        info!(
            "applying {} migration(s) as batch {batch}",
            pending.len()
        );

        let names = with_foreign_keys_off(conn, |conn| apply_all(conn, &pending, batch))?;

        Ok(MigrationRunResult {
            batch: Some(batch),
            applied: names,
            skipped: applied.len(),
            elapsed: start.elapsed(),
        })
    }

    /// Revert the most recent batch, newest migration first.
    pub fn rollback_last_batch(&self, conn: &mut Connection) -> Result<RollbackResult> {
        let start = Instant::now();
        ledger::ensure_table(conn)?;
        let batch = ledger::last_batch(conn)?;
        if batch == 0 {
            return Ok(RollbackResult {
                elapsed: start.elapsed(),
                ..Default::default()
            });
        }

        let records = ledger::in_batch(conn, batch)?;
        info!(
            "rolling back batch {batch} ({} migration(s))",
            records.len()
        );

        let rolled_back = with_foreign_keys_off(conn, |conn| {
            let mut done = Vec::with_capacity(records.len());
            for record in &records {
                self.revert(conn, &record.name)?;
                done.push(record.name.clone());
            }
            Ok(done)
        })?;

        Ok(RollbackResult {
            batch: Some(batch),
            rolled_back,
            elapsed: start.elapsed(),
        })
    }

    /// Revert a single migration. Only the most recently applied one qualifies.
    pub fn rollback(&self, conn: &mut Connection, name: &str) -> Result<()> {
        ledger::ensure_table(conn)?;
        let latest = ledger::latest(conn)?
            .ok_or_else(|| Error::NotFound("no migrations have been applied".into()))?;

        if latest.name != name {
            if ledger::applied_names(conn)?.contains(name) {
                return Err(Error::Other(format!(
                    "can only roll back the most recent migration ({}); use a batch rollback instead",
                    latest.name
                )));
            }
            return Err(Error::NotFound(format!("migration {name} is not applied")));
        }

        with_foreign_keys_off(conn, |conn| self.revert(conn, name))
    }

    fn revert(&self, conn: &mut Connection, name: &str) -> Result<()> {
        let migration = self.find(name).ok_or_else(|| {
            Error::NotFound(format!("no definition for applied migration {name}"))
        })?;

        info!("rolling back migration: {name}");
        let tx = conn.transaction()?;
        migration.down(&tx).map_err(|e| match e {
            Error::Irreversible(_) => e,
            other => Error::MigrationFailed {
                name: name.to_string(),
                reason: format!("rollback failed: {other}"),
            },
        })?;
        ledger::remove(&tx, name)?;
        tx.commit()
            .map_err(|e| Error::Database(format!("failed to commit rollback of {name}: {e}")))?;
        Ok(())
    }
}

fn apply_all(conn: &mut Connection, pending: &[&dyn Migration], batch: i64) -> Result<Vec<String>> {
    let total = pending.len();
    let mut applied = Vec::with_capacity(total);

    for (i, migration) in pending.iter().enumerate() {
        let name = migration.name();
        let step = i + 1;
        info!("applying migration {step}/{total}: {name}");

        let ready = migration.pre_check(conn).map_err(|e| failed(name, e))?;
        if !ready {
            error!("migration pre-check failed: {name}");
            return Err(Error::PreCheckFailed(name.to_string()));
        }

        let tx = conn.transaction()?;
        migration.up(&tx).map_err(|e| {
            error!("migration {name} failed: {e}");
            failed(name, e)
        })?;
        ledger::record(&tx, name, batch)?;
        tx.commit()
            .map_err(|e| Error::Database(format!("failed to commit migration {name}: {e}")))?;
        applied.push(name.to_string());

        let reason = match migration.post_check(conn) {
            Ok(true) => None,
            Ok(false) => Some("check returned false".to_string()),
            Err(e) => Some(e.to_string()),
        };
        if let Some(reason) = reason {
            error!("migration post-check failed: {name}: {reason} (already recorded)");
            return Err(Error::PostCheckFailed {
                name: name.to_string(),
                reason,
            });
        }

        info!("migration {step}/{total} completed: {name}");
    }

    Ok(applied)
}

fn failed(name: &str, e: Error) -> Error {
    Error::MigrationFailed {
        name: name.to_string(),
        reason: e.to_string(),
    }
}

/// Table rebuilds need foreign keys off; the previous setting is restored
/// whether or not `f` succeeds.
fn with_foreign_keys_off<T>(
    conn: &mut Connection,
    f: impl FnOnce(&mut Connection) -> Result<T>,
) -> Result<T> {
    let was_enabled = schema::foreign_keys_enabled(conn)?;
    if was_enabled {
        schema::set_foreign_keys(conn, false)?;
    }

    let result = f(conn);

    if was_enabled {
        if let Err(e) = schema::set_foreign_keys(conn, true) {
            warn!("failed to re-enable foreign keys: {e}");
        }
    }
    result
}
