use thiserror::Error;

use crate::parser::Direction;

#[derive(Error, Debug)]
pub enum MigrationError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Must upgrade from db version 189 (concourse 3.6.0), current db version: {0}")]
    UnsupportedLegacyVersion(i64),

    #[error("Migration {version} failed in a previous run and left the database dirty; clear the failed row before retrying")]
    DirtyDatabase { version: i64 },

    #[error("could not find migration {version} ({direction})")]
    MissingMigration { version: i64, direction: Direction },

    #[error("duplicate migration {version} ({direction})")]
    DuplicateMigration { version: i64, direction: Direction },

    #[error("migration {version} failed, rolled back the migration: {cause}")]
    Transactional {
        version: i64,
        #[source]
        cause: Box<MigrationError>,
    },

    #[error("Migration {version} failed and cannot be rolled back: {cause}")]
    NonTransactional {
        version: i64,
        #[source]
        cause: Box<MigrationError>,
    },

    #[error("Lock unavailable: {0}")]
    LockUnavailable(String),

    #[error("no such migration asset: {0}")]
    AssetNotFound(String),

    #[error("migration asset {name} is not valid UTF-8")]
    InvalidAsset { name: String },

    #[error("legacy version table present but the catalog has no SQL up migration to seed from")]
    NoBootstrapVersion,

    #[error("Encryption error: {0}")]
    Encryption(#[from] crate::encryption::EncryptionError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, MigrationError>;
