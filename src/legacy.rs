//! One-shot handover from the retired `migration_version` scheme.
//!
//! Databases tracked by the old single-row `migration_version` table can
//! only be adopted from the final version of that scheme. On a successful
//! handover the new bookkeeping is seeded at the catalog's bootstrap
//! version and the old table is dropped; any other legacy version is
//! refused and the table is left readable.

use rusqlite::Connection;
use tracing::info;

use crate::catalog::Catalog;
use crate::error::{MigrationError, Result};
use crate::history::{self, SchemaHistory, Status};
use crate::parser::Direction;

/// The only legacy version the engine will adopt.
pub const LEGACY_HANDOFF_VERSION: i64 = 189;

/// Runs before anything else on every coordinator operation. No-op unless
/// the database is legacy-only.
pub fn reconcile(conn: &Connection, catalog: &Catalog) -> Result<()> {
    let schema = SchemaHistory::new(conn);
    if schema.exists()? {
        return Ok(());
    }
    if !history::table_exists(conn, "migration_version")? {
        return Ok(());
    }

    let legacy_version: i64 =
        conn.query_row("SELECT version FROM migration_version", [], |row| row.get(0))?;
    if legacy_version != LEGACY_HANDOFF_VERSION {
        return Err(MigrationError::UnsupportedLegacyVersion(legacy_version));
    }

    let bootstrap = catalog
        .bootstrap_version()
        .ok_or(MigrationError::NoBootstrapVersion)?;

    schema.ensure()?;
    schema.record(bootstrap, Direction::Up, Status::Passed, false)?;
    conn.execute_batch("DROP TABLE migration_version")?;

    info!(
        legacy_version,
        seeded_version = bootstrap,
        "adopted legacy version table"
    );
    Ok(())
}
