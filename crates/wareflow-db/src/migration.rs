//! Migration definitions.
//!
//! A migration has a unique name, an `up` step and optionally a `down` step
//! plus `pre_check`/`post_check` predicates. Names start with a
//! `YYYYMMDD_HHMMSS_` prefix so lexicographic order is chronological.
//!
//! Migrations come from two places: the ones compiled into this crate
//! (see [`crate::migrations::builtin`]) and `.sql` files discovered in a
//! directory (see [`load_dir`]).

use std::path::Path;

use rusqlite::Connection;
use tracing::debug;
use wareflow_common::{Error, Result};

pub trait Migration: Send + Sync {
    fn name(&self) -> &str;

    fn up(&self, conn: &Connection) -> Result<()>;

    /// Reverse `up`. Migrations that cannot be undone safely keep the default.
    fn down(&self, _conn: &Connection) -> Result<()> {
        Err(Error::Irreversible(self.name().to_string()))
    }

    /// Returning `false` aborts the run before `up` touches the schema.
    fn pre_check(&self, _conn: &Connection) -> Result<bool> {
        Ok(true)
    }

    /// Returning `false` flags the (already recorded) migration as failed.
    fn post_check(&self, _conn: &Connection) -> Result<bool> {
        Ok(true)
    }
}

/// A migration read from a `.sql` file.
///
/// ```sql
/// -- up
/// ALTER TABLE employees ADD COLUMN badge TEXT;
/// -- down
/// ALTER TABLE employees DROP COLUMN badge;
/// -- pre_check
/// SELECT count(*) = 0 FROM pragma_table_info('employees') WHERE name = 'badge';
/// ```
///
/// Lines before the first marker belong to `up`. A check section is a single
/// query whose first column is read as a boolean.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlMigration {
    name: String,
    up_sql: String,
    down_sql: Option<String>,
    pre_check_sql: Option<String>,
    post_check_sql: Option<String>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Section {
    Up,
    Down,
    PreCheck,
    PostCheck,
}

impl SqlMigration {
    pub fn parse(name: impl Into<String>, content: &str) -> Result<Self> {
        let name = name.into();
        let mut up = Vec::new();
        let mut down = Vec::new();
        let mut pre = Vec::new();
        let mut post = Vec::new();
        let mut section = Section::Up;

        for line in content.lines() {
            let marker = line.trim().to_lowercase();
            let next = match marker.as_str() {
                "-- up" => Some(Section::Up),
                "-- down" => Some(Section::Down),
                "-- pre_check" => Some(Section::PreCheck),
                "-- post_check" => Some(Section::PostCheck),
                _ => None,
            };
            if let Some(next) = next {
                section = next;
                continue;
            }

            match section {
                Section::Up => up.push(line),
                Section::Down => down.push(line),
                Section::PreCheck => pre.push(line),
                Section::PostCheck => post.push(line),
            }
        }

        let up_sql = join_section(&up)
            .ok_or_else(|| Error::Other(format!("migration {name} has an empty up section")))?;

        Ok(Self {
            name,
            up_sql,
            down_sql: join_section(&down),
            pre_check_sql: join_section(&pre),
            post_check_sql: join_section(&post),
        })
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| Error::Other(format!("invalid migration filename: {}", path.display())))?;

        let content = std::fs::read_to_string(path)?;
        Self::parse(name, &content)
    }

    pub fn is_reversible(&self) -> bool {
        self.down_sql.is_some()
    }
}

fn join_section(lines: &[&str]) -> Option<String> {
    let sql = lines.join("\n").trim().to_string();
    let has_statement = sql
        .lines()
        .any(|l| !l.trim().is_empty() && !l.trim_start().starts_with("--"));
    has_statement.then_some(sql)
}

fn run_check(conn: &Connection, name: &str, sql: &str) -> Result<bool> {
    let value: i64 = conn
        .query_row(sql, [], |row| row.get(0))
        .map_err(|e| Error::Database(format!("check for {name} failed: {e}")))?;
    Ok(value != 0)
}

impl Migration for SqlMigration {
    fn name(&self) -> &str {
        &self.name
    }

    fn up(&self, conn: &Connection) -> Result<()> {
        conn.execute_batch(&self.up_sql)?;
        Ok(())
    }

    fn down(&self, conn: &Connection) -> Result<()> {
        match &self.down_sql {
            Some(sql) => {
                conn.execute_batch(sql)?;
                Ok(())
            }
            None => Err(Error::Irreversible(self.name.clone())),
        }
    }

    fn pre_check(&self, conn: &Connection) -> Result<bool> {
        match &self.pre_check_sql {
            Some(sql) => run_check(conn, &self.name, sql),
            None => Ok(true),
        }
    }

    fn post_check(&self, conn: &Connection) -> Result<bool> {
        match &self.post_check_sql {
            Some(sql) => run_check(conn, &self.name, sql),
            None => Ok(true),
        }
    }
}

/// Load every `.sql` migration in `dir`, sorted by name. A missing directory
/// yields no migrations.
pub fn load_dir(dir: &Path) -> Result<Vec<SqlMigration>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut migrations = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "sql") {
            debug!("discovered migration file {}", path.display());
            migrations.push(SqlMigration::from_file(&path)?);
        }
    }

    migrations.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(migrations)
}
