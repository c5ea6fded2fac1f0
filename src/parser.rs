//! Migration filename grammar.
//!
//! Artifacts are named `<version>_<slug>.<up|down>.<sql|rs>`, e.g.
//! `1510262030_initial_schema.up.sql`. The version is the sole identity of a
//! migration and is compared numerically, never lexicographically. Names that
//! do not match the grammar are not migrations; they are skipped so helper
//! files may share the asset namespace.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;

static MIGRATION_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+)_([^.]*)\.(up|down)\.(sql|rs)$").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Direction {
    Up,
    Down,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Up => f.write_str("up"),
            Direction::Down => f.write_str("down"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Sql,
    Code,
}

/// Parsed metadata of one migration artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    pub version: i64,
    /// Full asset name, used to read the artifact back.
    pub name: String,
    pub slug: String,
    pub direction: Direction,
    pub kind: Kind,
}

/// Decode one asset name. `None` means the name is not a migration.
pub fn parse_name(name: &str) -> Option<Migration> {
    let caps = MIGRATION_NAME.captures(name)?;

    // Versions must fit i64; a longer digit run is not a migration name.
    let version: i64 = caps[1].parse().ok()?;

    let direction = match &caps[3] {
        "up" => Direction::Up,
        _ => Direction::Down,
    };
    let kind = match &caps[4] {
        "sql" => Kind::Sql,
        _ => Kind::Code,
    };

    Some(Migration {
        version,
        name: name.to_string(),
        slug: caps[2].to_string(),
        direction,
        kind,
    })
}
