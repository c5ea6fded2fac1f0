//! The ordered migration catalog for one run.
//!
//! Built fresh from an asset listing on every coordinator operation. Exactly
//! one descriptor may exist per `(version, direction)`; versions are ordered
//! numerically.

use std::collections::BTreeMap;

use crate::error::{MigrationError, Result};
use crate::parser::{self, Direction, Kind, Migration};

#[derive(Debug)]
pub struct Catalog {
    by_key: BTreeMap<(i64, Direction), Migration>,
    /// Distinct versions, ascending.
    versions: Vec<i64>,
}

impl Catalog {
    /// Parse the asset names into a catalog, skipping anything that is not a
    /// migration. Two artifacts with the same version and direction are a
    /// packaging error.
    pub fn build<I>(names: I) -> Result<Self>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let mut by_key = BTreeMap::new();

        for name in names {
            let Some(migration) = parser::parse_name(name.as_ref()) else {
                continue;
            };
            let key = (migration.version, migration.direction);
            if let Some(previous) = by_key.insert(key, migration) {
                return Err(MigrationError::DuplicateMigration {
                    version: previous.version,
                    direction: previous.direction,
                });
            }
        }

        let mut versions: Vec<i64> = by_key.keys().map(|(v, _)| *v).collect();
        versions.dedup();

        Ok(Self { by_key, versions })
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    /// Highest version in the catalog, 0 when empty.
    pub fn supported_version(&self) -> i64 {
        self.versions.last().copied().unwrap_or(0)
    }

    /// Smallest SQL `up` version; the seed written when bridging a legacy
    /// database into `schema_migrations`.
    pub fn bootstrap_version(&self) -> Option<i64> {
        self.by_key
            .values()
            .filter(|m| m.direction == Direction::Up && m.kind == Kind::Sql)
            .map(|m| m.version)
            .min()
    }

    /// Greatest version strictly below `version`, 0 when there is none.
    /// Resolves the current version after a `down` row.
    pub fn previous_version(&self, version: i64) -> i64 {
        self.versions
            .iter()
            .rev()
            .find(|&&v| v < version)
            .copied()
            .unwrap_or(0)
    }

    /// The ordered slice of descriptors taking the database from `from` to
    /// `to`: ascending `up` steps over `(from, to]`, or descending `down`
    /// steps over `(to, from]`. A version in range without an artifact for
    /// the needed direction fails the plan.
    pub fn plan(&self, from: i64, to: i64) -> Result<Vec<&Migration>> {
        let (direction, in_range): (Direction, Box<dyn Fn(i64) -> bool>) = if to > from {
            (Direction::Up, Box::new(move |v| v > from && v <= to))
        } else if to < from {
            (Direction::Down, Box::new(move |v| v > to && v <= from))
        } else {
            return Ok(Vec::new());
        };

        let mut steps = Vec::new();
        for &version in self.versions.iter().filter(|&&v| in_range(v)) {
            let migration = self
                .by_key
                .get(&(version, direction))
                .ok_or(MigrationError::MissingMigration { version, direction })?;
            steps.push(migration);
        }

        if direction == Direction::Down {
            steps.reverse();
        }
        Ok(steps)
    }

    /// Every descriptor, ordered by version then direction.
    pub fn migrations(&self) -> impl Iterator<Item = &Migration> {
        self.by_key.values()
    }
}
