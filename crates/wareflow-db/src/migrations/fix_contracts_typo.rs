use rusqlite::Connection;
use tracing::{info, warn};
use wareflow_common::Result;

use crate::migration::Migration;
use crate::schema;

/// Renames the misspelled `contarcts` table some early databases carry.
///
/// `down` does nothing: nothing can tell a renamed table from one created
/// correctly, and restoring the misspelling would break `contracts`.
pub struct FixContractsTypo;

impl Migration for FixContractsTypo {
    fn name(&self) -> &str {
        "20260128_140000_fix_contracts_typo"
    }

    fn up(&self, conn: &Connection) -> Result<()> {
        let typo = schema::table_exists(conn, "contarcts")?;
        let correct = schema::table_exists(conn, "contracts")?;

        match (typo, correct) {
            (true, false) => {
                conn.execute_batch("ALTER TABLE contarcts RENAME TO contracts")?;
                info!("renamed table contarcts to contracts");
            }
            (true, true) => {
                warn!("both contarcts and contracts exist, leaving contarcts in place");
            }
            (false, true) => info!("contracts table already correctly named"),
            (false, false) => warn!("neither contarcts nor contracts table found"),
        }
        Ok(())
    }

    fn down(&self, _conn: &Connection) -> Result<()> {
        info!("nothing to revert for {}", self.name());
        Ok(())
    }
}
