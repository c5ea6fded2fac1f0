//! Cross-process serialisation of migration runs.
//!
//! The lock must be taken on a connection other than the one running the
//! migrations; taking it on the migration connection would deadlock against
//! the migration's own transactions. The lock is strictly mutual-exclusive
//! and not reentrant; waiters block until the holder releases.

use std::thread;
use std::time::Duration;

use rusqlite::{Connection, ErrorCode};
use tracing::debug;

use crate::error::{MigrationError, Result};

const RETRY_INTERVAL: Duration = Duration::from_millis(50);

pub trait LockFactory {
    /// Blocks until the lock is granted.
    fn acquire(&self) -> Result<Box<dyn LockHandle + '_>>;
}

/// A held lock. Dropping the handle releases it, so the lock cannot outlive
/// a panicking or erroring run.
pub trait LockHandle {
    fn release(&mut self) -> Result<()>;
}

/// Advisory lock backed by a single-row `migration_lock` table. Acquisition
/// is an `INSERT` that keeps retrying while the primary-key constraint
/// fires; release deletes the row.
///
/// A holder that exits without dropping its handle leaves the row behind;
/// clearing it is a manual operation, like clearing a dirty migration row.
pub struct SqliteLockFactory {
    conn: Connection,
}

impl SqliteLockFactory {
    /// `conn` must be a second connection to the database under migration.
    pub fn new(conn: Connection) -> Result<Self> {
        conn.busy_timeout(Duration::from_secs(30))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS migration_lock (
                id integer PRIMARY KEY CHECK (id = 1)
            )",
        )?;
        Ok(Self { conn })
    }
}

impl LockFactory for SqliteLockFactory {
    fn acquire(&self) -> Result<Box<dyn LockHandle + '_>> {
        loop {
            match self
                .conn
                .execute("INSERT INTO migration_lock (id) VALUES (1)", [])
            {
                Ok(_) => {
                    debug!("acquired migration lock");
                    return Ok(Box::new(SqliteLockHandle {
                        conn: &self.conn,
                        held: true,
                    }));
                }
                // Busy means another connection is mid-write; both cases are
                // contention, not failure.
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if matches!(
                        e.code,
                        ErrorCode::ConstraintViolation
                            | ErrorCode::DatabaseBusy
                            | ErrorCode::DatabaseLocked
                    ) =>
                {
                    thread::sleep(RETRY_INTERVAL);
                }
                Err(e) => return Err(MigrationError::LockUnavailable(e.to_string())),
            }
        }
    }
}

struct SqliteLockHandle<'a> {
    conn: &'a Connection,
    held: bool,
}

impl LockHandle for SqliteLockHandle<'_> {
    fn release(&mut self) -> Result<()> {
        if self.held {
            self.conn.execute("DELETE FROM migration_lock WHERE id = 1", [])?;
            self.held = false;
            debug!("released migration lock");
        }
        Ok(())
    }
}

impl Drop for SqliteLockHandle<'_> {
    fn drop(&mut self) {
        let _ = self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn factory_pair() -> (tempfile::TempDir, SqliteLockFactory, SqliteLockFactory) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lock.db");
        let a = SqliteLockFactory::new(Connection::open(&path).unwrap()).unwrap();
        let b = SqliteLockFactory::new(Connection::open(&path).unwrap()).unwrap();
        (dir, a, b)
    }

    #[test]
    fn acquire_and_release() {
        let (_dir, factory, _other) = factory_pair();
        let mut handle = factory.acquire().unwrap();
        handle.release().unwrap();
        // Releasing twice is harmless.
        handle.release().unwrap();
    }

    #[test]
    fn drop_releases_the_lock() {
        let (_dir, a, b) = factory_pair();
        {
            let _held = a.acquire().unwrap();
        }
        // Would spin forever if the drop above leaked the row.
        let _reacquired = b.acquire().unwrap();
    }

    #[test]
    fn contended_acquire_waits_for_the_holder() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lock.db");

        let a = SqliteLockFactory::new(Connection::open(&path).unwrap()).unwrap();
        let held = a.acquire().unwrap();

        let waiter = {
            let path = path.clone();
            thread::spawn(move || {
                let b = SqliteLockFactory::new(Connection::open(&path).unwrap()).unwrap();
                let _handle = b.acquire().unwrap();
            })
        };

        thread::sleep(Duration::from_millis(150));
        assert!(!waiter.is_finished());

        drop(held);
        waiter.join().unwrap();
    }
}
