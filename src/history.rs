//! Bookkeeping for applied migrations.
//!
//! Every attempt appends one row to `schema_migrations`; nothing ever
//! deletes them. Failed rows stay behind for forensics, and the `dirty`
//! flag marks a non-transactional failure whose partial effects are still
//! in the database.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Result;
use crate::parser::Direction;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Passed,
    Failed,
}

impl Status {
    fn as_str(self) -> &'static str {
        match self {
            Status::Passed => "passed",
            Status::Failed => "failed",
        }
    }
}

/// Accessor for the `schema_migrations` table on one connection. Also works
/// on an open transaction, so a transactional migration can commit its own
/// `passed` row atomically.
pub struct SchemaHistory<'a> {
    conn: &'a Connection,
}

impl<'a> SchemaHistory<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Idempotently create the bookkeeping table.
    pub fn ensure(&self) -> Result<()> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                version   bigint,
                tstamp    timestamp with time zone,
                direction varchar,
                status    varchar,
                dirty     boolean
            )",
        )?;
        Ok(())
    }

    pub fn exists(&self) -> Result<bool> {
        table_exists(self.conn, "schema_migrations")
    }

    /// Append one attempt row, stamped with the current UTC time.
    pub fn record(
        &self,
        version: i64,
        direction: Direction,
        status: Status,
        dirty: bool,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO schema_migrations (version, tstamp, direction, status, dirty)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                version,
                Utc::now().to_rfc3339(),
                direction.to_string(),
                status.as_str(),
                dirty,
            ],
        )?;
        Ok(())
    }

    /// The most recent `passed` row, if any. Rows written in the same
    /// timestamp tick are ordered by insertion.
    pub fn latest_passed(&self) -> Result<Option<(i64, Direction)>> {
        let row = self
            .conn
            .query_row(
                "SELECT version, direction FROM schema_migrations
                 WHERE status = 'passed'
                 ORDER BY tstamp DESC, rowid DESC
                 LIMIT 1",
                [],
                |row| {
                    let version: i64 = row.get(0)?;
                    let direction: String = row.get(1)?;
                    Ok((version, direction))
                },
            )
            .optional()?;

        Ok(row.map(|(version, direction)| {
            let direction = if direction == "down" {
                Direction::Down
            } else {
                Direction::Up
            };
            (version, direction)
        }))
    }

    /// Whether the most recent attempt at `version` left the database dirty.
    pub fn is_dirty(&self, version: i64) -> Result<bool> {
        let dirty = self
            .conn
            .query_row(
                "SELECT dirty FROM schema_migrations
                 WHERE version = ?1
                 ORDER BY tstamp DESC, rowid DESC
                 LIMIT 1",
                params![version],
                |row| row.get::<_, bool>(0),
            )
            .optional()?;
        Ok(dirty.unwrap_or(false))
    }
}

pub fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![name],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}
