//! Asset sources: where migration artifacts come from.
//!
//! The engine never assumes a particular provider; the embedded catalog is
//! one implementation and test doubles are another. Listing order is
//! unspecified; ordering is the catalog's job.

use crate::error::{MigrationError, Result};
use crate::migrations;

pub trait AssetSource {
    fn names(&self) -> Vec<String>;

    /// Bytes of one artifact. Unknown names are an error; callers only ask
    /// for names the source listed.
    fn read(&self, name: &str) -> Result<Vec<u8>>;
}

/// The compile-time catalog shipped with the crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbeddedAssets;

impl AssetSource for EmbeddedAssets {
    fn names(&self) -> Vec<String> {
        migrations::EMBEDDED
            .iter()
            .map(|(name, _)| name.to_string())
            .collect()
    }

    fn read(&self, name: &str) -> Result<Vec<u8>> {
        migrations::EMBEDDED
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, body)| body.as_bytes().to_vec())
            .ok_or_else(|| MigrationError::AssetNotFound(name.to_string()))
    }
}
