//! The embedded migration catalog.
//!
//! SQL artifacts are compiled in from `sql/`; imperative migrations live in
//! `m<version>_<slug>` modules and are registered in [`code_migration`].
//! The catalog is consumed through [`crate::assets::EmbeddedAssets`].

pub mod m1516643303_encrypt_team_auth;

use rusqlite::Transaction;

use crate::encryption::EncryptionStrategy;
use crate::error::Result;

/// Name and contents of every embedded artifact. Code-marker entries carry
/// no bytes; their bodies are the registered routines.
pub const EMBEDDED: &[(&str, &str)] = &[
    (
        "1510262030_initial_schema.up.sql",
        include_str!("sql/1510262030_initial_schema.up.sql"),
    ),
    (
        "1510670987_add_builds.up.sql",
        include_str!("sql/1510670987_add_builds.up.sql"),
    ),
    (
        "1510670987_add_builds.down.sql",
        include_str!("sql/1510670987_add_builds.down.sql"),
    ),
    ("1516643303_encrypt_team_auth.up.rs", ""),
];

/// An imperative migration body. Runs inside the transaction the executor
/// opened; the strategy decides how sensitive columns are written.
pub type CodeMigration = fn(&Transaction<'_>, &dyn EncryptionStrategy) -> Result<()>;

/// Build-time registry of imperative migrations, keyed by version.
pub fn code_migration(version: i64) -> Option<CodeMigration> {
    match version {
        1516643303 => Some(m1516643303_encrypt_team_auth::run),
        _ => None,
    }
}
