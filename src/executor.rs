//! Applies one migration artifact to the database and appends the matching
//! bookkeeping row.
//!
//! SQL scripts run inside a single transaction by default; the bookkeeping
//! row commits with the script, so a rollback erases both. A script whose
//! first non-blank line carries `-- NO_TRANSACTION` runs with autocommit
//! instead; a failure there cannot be rolled back and marks the version
//! dirty. Imperative migrations are always transactional.

use rusqlite::{Connection, Transaction};
use tracing::info;

use crate::encryption::EncryptionStrategy;
use crate::error::{MigrationError, Result};
use crate::history::{SchemaHistory, Status};
use crate::migrations;
use crate::parser::{Direction, Kind, Migration};

const NO_TRANSACTION_SENTINEL: &str = "-- NO_TRANSACTION";

pub struct Executor<'a> {
    conn: &'a Connection,
    strategy: &'a dyn EncryptionStrategy,
}

impl<'a> Executor<'a> {
    pub fn new(conn: &'a Connection, strategy: &'a dyn EncryptionStrategy) -> Self {
        Self { conn, strategy }
    }

    pub fn run(&self, migration: &Migration, bytes: &[u8]) -> Result<()> {
        info!(
            version = migration.version,
            direction = %migration.direction,
            name = %migration.name,
            "applying migration"
        );
        match migration.kind {
            Kind::Sql => self.run_sql(migration, bytes),
            Kind::Code => self.run_code(migration),
        }
    }

    fn run_sql(&self, migration: &Migration, bytes: &[u8]) -> Result<()> {
        let script =
            std::str::from_utf8(bytes).map_err(|_| MigrationError::InvalidAsset {
                name: migration.name.clone(),
            })?;

        if wants_no_transaction(script) {
            self.run_unframed(migration, script)
        } else if carries_own_framing(script) {
            self.run_self_framed(migration, script)
        } else {
            self.run_transactional(migration, |tx| {
                tx.execute_batch(script).map_err(MigrationError::from)
            })
        }
    }

    fn run_code(&self, migration: &Migration) -> Result<()> {
        // Only forward routines are registered; a down code artifact has no
        // body to run.
        let routine = match migration.direction {
            Direction::Up => migrations::code_migration(migration.version),
            Direction::Down => None,
        };
        let routine = routine.ok_or(MigrationError::MissingMigration {
            version: migration.version,
            direction: migration.direction,
        })?;

        self.run_transactional(migration, |tx| routine(tx, self.strategy))
    }

    /// Open a transaction, run the body, append the `passed` row, commit.
    /// Any failure rolls the whole thing back and records `failed`.
    fn run_transactional<F>(&self, migration: &Migration, body: F) -> Result<()>
    where
        F: FnOnce(&Transaction<'_>) -> Result<()>,
    {
        let attempt = (|| -> Result<()> {
            let tx = self.conn.unchecked_transaction()?;
            body(&tx)?;
            SchemaHistory::new(&tx).record(
                migration.version,
                migration.direction,
                Status::Passed,
                false,
            )?;
            tx.commit()?;
            Ok(())
        })();

        attempt.map_err(|cause| self.rolled_back(migration, cause))
    }

    /// The script frames its own transaction; run it verbatim.
    fn run_self_framed(&self, migration: &Migration, script: &str) -> Result<()> {
        match self.conn.execute_batch(script) {
            Ok(()) => SchemaHistory::new(self.conn).record(
                migration.version,
                migration.direction,
                Status::Passed,
                false,
            ),
            Err(cause) => {
                // The failure may have left the script's transaction open.
                let _ = self.conn.execute_batch("ROLLBACK");
                Err(self.rolled_back(migration, cause.into()))
            }
        }
    }

    /// Statement-by-statement with autocommit; there is no undo.
    fn run_unframed(&self, migration: &Migration, script: &str) -> Result<()> {
        match self.conn.execute_batch(script) {
            Ok(()) => SchemaHistory::new(self.conn).record(
                migration.version,
                migration.direction,
                Status::Passed,
                false,
            ),
            Err(cause) => {
                let history = SchemaHistory::new(self.conn);
                if let Err(record_err) = history.record(
                    migration.version,
                    migration.direction,
                    Status::Failed,
                    true,
                ) {
                    return Err(record_err);
                }
                Err(MigrationError::NonTransactional {
                    version: migration.version,
                    cause: Box::new(cause.into()),
                })
            }
        }
    }

    fn rolled_back(&self, migration: &Migration, cause: MigrationError) -> MigrationError {
        let history = SchemaHistory::new(self.conn);
        if let Err(record_err) =
            history.record(migration.version, migration.direction, Status::Failed, false)
        {
            return record_err;
        }
        MigrationError::Transactional {
            version: migration.version,
            cause: Box::new(cause),
        }
    }
}

/// True when the first non-blank line opts the script out of transactions.
fn wants_no_transaction(script: &str) -> bool {
    script
        .lines()
        .find(|line| !line.trim().is_empty())
        .is_some_and(|line| line.contains(NO_TRANSACTION_SENTINEL))
}

/// True when the script opens its own transaction.
fn carries_own_framing(script: &str) -> bool {
    script
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty() && !line.starts_with("--"))
        .is_some_and(|line| {
            let head = line.get(..5).unwrap_or(line);
            head.eq_ignore_ascii_case("BEGIN")
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encryption::NoEncryption;
    use crate::parser::parse_name;

    fn conn_with_history() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        SchemaHistory::new(&conn).ensure().unwrap();
        conn
    }

    fn run(conn: &Connection, name: &str, script: &str) -> Result<()> {
        let migration = parse_name(name).unwrap();
        Executor::new(conn, &NoEncryption).run(&migration, script.as_bytes())
    }

    fn table_exists(conn: &Connection, name: &str) -> bool {
        crate::history::table_exists(conn, name).unwrap()
    }

    fn last_row(conn: &Connection, version: i64) -> (String, bool) {
        conn.query_row(
            "SELECT status, dirty FROM schema_migrations
             WHERE version = ?1 ORDER BY tstamp DESC, rowid DESC LIMIT 1",
            [version],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .unwrap()
    }

    #[test]
    fn sentinel_detection() {
        assert!(wants_no_transaction("-- NO_TRANSACTION\nDROP TABLE x;"));
        assert!(wants_no_transaction("\n\n   -- NO_TRANSACTION\nSELECT 1;"));
        assert!(!wants_no_transaction("SELECT 1;\n-- NO_TRANSACTION"));
        assert!(!wants_no_transaction("CREATE TABLE t (id integer);"));
    }

    #[test]
    fn framing_detection() {
        assert!(carries_own_framing("BEGIN;\nSELECT 1;\nCOMMIT;"));
        assert!(carries_own_framing("-- comment\nbegin;\nselect 1;\ncommit;"));
        assert!(!carries_own_framing("CREATE TABLE t (id integer);"));
    }

    #[test]
    fn plain_script_commits_with_its_bookkeeping_row() {
        let conn = conn_with_history();
        run(&conn, "1000_add.up.sql", "CREATE TABLE some_table (id integer);").unwrap();

        assert!(table_exists(&conn, "some_table"));
        assert_eq!(last_row(&conn, 1000), ("passed".to_string(), false));
    }

    #[test]
    fn self_framed_script_runs_verbatim() {
        let conn = conn_with_history();
        run(
            &conn,
            "1000_add.up.sql",
            "\nBEGIN;\nCREATE TABLE some_table (id integer);\nCOMMIT;\n",
        )
        .unwrap();

        assert!(table_exists(&conn, "some_table"));
        assert_eq!(last_row(&conn, 1000), ("passed".to_string(), false));
    }

    #[test]
    fn transactional_failure_rolls_everything_back() {
        let conn = conn_with_history();
        let err = run(
            &conn,
            "1001_bad.up.sql",
            "CREATE TABLE half_done (id integer);\nDROP TABLE nonexistent;",
        )
        .unwrap_err();

        assert!(err.to_string().contains("rolled back the migration"));
        assert!(err.to_string().contains("1001"));
        assert!(!table_exists(&conn, "half_done"));
        assert_eq!(last_row(&conn, 1001), ("failed".to_string(), false));
    }

    #[test]
    fn self_framed_failure_leaves_the_connection_usable() {
        let conn = conn_with_history();
        let err = run(
            &conn,
            "1001_bad.up.sql",
            "BEGIN;\nCREATE TABLE half_done (id integer);\nDROP TABLE nonexistent;\nCOMMIT;",
        )
        .unwrap_err();

        assert!(err.to_string().contains("rolled back the migration"));
        assert!(!table_exists(&conn, "half_done"));
        assert_eq!(last_row(&conn, 1001), ("failed".to_string(), false));

        // No transaction left dangling.
        run(&conn, "1002_ok.up.sql", "CREATE TABLE fine (id integer);").unwrap();
        assert!(table_exists(&conn, "fine"));
    }

    #[test]
    fn non_transactional_failure_marks_the_version_dirty() {
        let conn = conn_with_history();
        let err = run(
            &conn,
            "1510262031_dirty.up.sql",
            "-- NO_TRANSACTION\nCREATE TABLE kept (id integer);\nDROP TABLE nonexistent;",
        )
        .unwrap_err();

        let message = err.to_string();
        assert!(message.starts_with("Migration"));
        assert!(message.contains("failed"));
        assert!(message.contains("1510262031"));

        // The statement before the failure is already committed.
        assert!(table_exists(&conn, "kept"));
        assert_eq!(last_row(&conn, 1510262031), ("failed".to_string(), true));
    }

    #[test]
    fn non_transactional_success_records_a_clean_row() {
        let conn = conn_with_history();
        run(
            &conn,
            "1000_fast.up.sql",
            "-- NO_TRANSACTION\nCREATE TABLE some_table (id integer);",
        )
        .unwrap();

        assert_eq!(last_row(&conn, 1000), ("passed".to_string(), false));
    }

    #[test]
    fn unregistered_code_migration_is_missing() {
        let conn = conn_with_history();
        let err = run(&conn, "42_mystery.up.rs", "").unwrap_err();
        assert!(matches!(
            err,
            MigrationError::MissingMigration {
                version: 42,
                direction: Direction::Up
            }
        ));
    }

    #[test]
    fn down_code_migrations_have_no_body() {
        let conn = conn_with_history();
        let err = run(&conn, "1516643303_encrypt_team_auth.down.rs", "").unwrap_err();
        assert!(matches!(
            err,
            MigrationError::MissingMigration {
                direction: Direction::Down,
                ..
            }
        ));
    }

    #[test]
    fn registered_code_migration_runs_transactionally() {
        let conn = conn_with_history();
        conn.execute_batch(
            "CREATE TABLE teams (
                id integer PRIMARY KEY,
                name text NOT NULL,
                basic_auth text,
                auth text,
                nonce text
            );",
        )
        .unwrap();

        run(&conn, "1516643303_encrypt_team_auth.up.rs", "").unwrap();
        assert_eq!(last_row(&conn, 1516643303), ("passed".to_string(), false));
    }

    #[test]
    fn invalid_utf8_is_a_decode_error() {
        let conn = conn_with_history();
        let migration = parse_name("1000_bin.up.sql").unwrap();
        let err = Executor::new(&conn, &NoEncryption)
            .run(&migration, &[0xff, 0xfe])
            .unwrap_err();
        assert!(matches!(err, MigrationError::InvalidAsset { .. }));
    }
}
