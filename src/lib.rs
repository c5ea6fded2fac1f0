//! Versioned schema migrations for the Gantry database.
//!
//! The engine drives the database through an ordered sequence of migration
//! artifacts (SQL scripts and imperative routines) while a cross-process
//! advisory lock guarantees that of all the service instances starting up
//! against the same database, exactly one does the work. Every attempt is
//! recorded in `schema_migrations`, and databases tracked by the retired
//! `migration_version` scheme are adopted on first contact.

pub mod assets;
pub mod catalog;
pub mod encryption;
pub mod executor;
pub mod history;
pub mod legacy;
pub mod lock;
pub mod migrations;
pub mod migrator;
pub mod parser;

mod error;

pub use assets::{AssetSource, EmbeddedAssets};
pub use encryption::{AeadEncryption, EncryptionStrategy, NoEncryption};
pub use error::{MigrationError, Result};
pub use lock::{LockFactory, LockHandle, SqliteLockFactory};
pub use migrator::Migrator;
pub use parser::{Direction, Kind, Migration};
