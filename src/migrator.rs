//! The coordinator: composes the catalog, the legacy bridge, the
//! bookkeeping and the executor under one cross-process lock.
//!
//! The migrator owns its own connection; the lock factory must be bound to
//! a different connection to the same database (see [`crate::lock`]).
//! Multiple concurrent callers, whether threads or whole processes,
//! serialise on the lock: exactly one performs the work, the rest observe
//! the final state and do nothing.

use rusqlite::Connection;
use tracing::info;

use crate::assets::{AssetSource, EmbeddedAssets};
use crate::catalog::Catalog;
use crate::encryption::EncryptionStrategy;
use crate::error::{MigrationError, Result};
use crate::executor::Executor;
use crate::history::SchemaHistory;
use crate::legacy;
use crate::lock::LockFactory;
use crate::parser::{Direction, Kind, Migration};

pub struct Migrator<A: AssetSource = EmbeddedAssets> {
    conn: Connection,
    lock_factory: Box<dyn LockFactory>,
    strategy: Box<dyn EncryptionStrategy>,
    assets: A,
}

impl Migrator {
    /// Migrator over the crate's embedded catalog.
    pub fn new(
        conn: Connection,
        lock_factory: Box<dyn LockFactory>,
        strategy: Box<dyn EncryptionStrategy>,
    ) -> Self {
        Self::with_assets(conn, lock_factory, strategy, EmbeddedAssets)
    }
}

impl<A: AssetSource> Migrator<A> {
    /// Migrator over an explicit asset provider.
    pub fn with_assets(
        conn: Connection,
        lock_factory: Box<dyn LockFactory>,
        strategy: Box<dyn EncryptionStrategy>,
        assets: A,
    ) -> Self {
        Self {
            conn,
            lock_factory,
            strategy,
            assets,
        }
    }

    /// Bring the database up to the newest catalog version.
    pub fn up(&self) -> Result<()> {
        let _lock = self.lock_factory.acquire()?;
        self.apply(None)
    }

    /// Drive the database to `target`, in whichever direction that lies.
    pub fn migrate(&self, target: i64) -> Result<()> {
        let _lock = self.lock_factory.acquire()?;
        self.apply(Some(target))
    }

    /// Version of the most recent passed migration, 0 for a fresh database.
    /// An eligible legacy database is adopted first, so it reports the
    /// bootstrap version.
    pub fn current_version(&self) -> Result<i64> {
        let catalog = Catalog::build(self.assets.names())?;
        legacy::reconcile(&self.conn, &catalog)?;
        let history = SchemaHistory::new(&self.conn);
        history.ensure()?;
        resolve_current(&catalog, &history)
    }

    /// Highest version the compiled-in catalog can reach.
    pub fn supported_version(&self) -> Result<i64> {
        Ok(Catalog::build(self.assets.names())?.supported_version())
    }

    /// Every known migration, ordered by version.
    pub fn migrations(&self) -> Result<Vec<Migration>> {
        Ok(Catalog::build(self.assets.names())?
            .migrations()
            .cloned()
            .collect())
    }

    fn apply(&self, target: Option<i64>) -> Result<()> {
        let catalog = Catalog::build(self.assets.names())?;
        legacy::reconcile(&self.conn, &catalog)?;

        let history = SchemaHistory::new(&self.conn);
        history.ensure()?;

        let from = resolve_current(&catalog, &history)?;
        let to = match target {
            Some(target) => target,
            // up() only ever moves forward; a database ahead of the catalog
            // is left alone.
            None if catalog.is_empty() || catalog.supported_version() <= from => return Ok(()),
            None => catalog.supported_version(),
        };

        let plan = catalog.plan(from, to)?;
        if plan.is_empty() {
            return Ok(());
        }

        for step in &plan {
            if history.is_dirty(step.version)? {
                return Err(MigrationError::DirtyDatabase {
                    version: step.version,
                });
            }
        }

        info!(from, to, steps = plan.len(), "migrating database");

        let executor = Executor::new(&self.conn, self.strategy.as_ref());
        for step in plan {
            let bytes = match step.kind {
                Kind::Sql => self.assets.read(&step.name)?,
                Kind::Code => Vec::new(),
            };
            executor.run(step, &bytes)?;
        }

        Ok(())
    }
}

fn resolve_current(catalog: &Catalog, history: &SchemaHistory<'_>) -> Result<i64> {
    Ok(match history.latest_passed()? {
        None => 0,
        Some((version, Direction::Up)) => version,
        // A down row means that version was backed out; the database sits at
        // the catalog version below it.
        Some((version, Direction::Down)) => catalog.previous_version(version),
    })
}
