//! Migration source: versioned SQL files on disk.
//!
//! Files are named `<version>_<name>.up.sql`. Files that do not end in
//! `.up.sql` are ignored, so down scripts and notes can live alongside.

use crate::error::{MigrateError, MigrateResult};
use std::collections::BTreeMap;
use std::path::Path;

/// Suffix of migration files applied on `up`
pub const UP_SUFFIX: &str = ".up.sql";

/// A single versioned migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    /// Version number, strictly increasing across a source
    pub version: u64,

    /// Descriptive name taken from the file name
    pub name: String,

    /// SQL script
    pub sql: String,
}

impl Migration {
    /// Create a migration from its parts
    pub fn new(version: u64, name: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            version,
            name: name.into(),
            sql: sql.into(),
        }
    }
}

/// Split `<version>_<name>.up.sql` into version and name.
///
/// Returns `Ok(None)` for files that are not up migrations.
pub fn parse_file_name(file_name: &str) -> MigrateResult<Option<(u64, String)>> {
    let Some(stem) = file_name.strip_suffix(UP_SUFFIX) else {
        return Ok(None);
    };
    let invalid = |reason: &str| MigrateError::InvalidMigrationFile {
        path: file_name.to_string(),
        reason: reason.to_string(),
    };
    let (version, name) = stem
        .split_once('_')
        .ok_or_else(|| invalid("expected <version>_<name>.up.sql"))?;
    let version: u64 = version
        .parse()
        .map_err(|_| invalid("version prefix is not a number"))?;
    if name.is_empty() {
        return Err(invalid("migration name is empty"));
    }
    Ok(Some((version, name.to_string())))
}

/// Load every up migration in `dir`, sorted by version.
pub fn load_migrations(dir: &Path) -> MigrateResult<Vec<Migration>> {
    let io_err = |path: &Path, source: std::io::Error| MigrateError::Io {
        path: path.display().to_string(),
        source,
    };

    let mut found: BTreeMap<u64, (String, Migration)> = BTreeMap::new();
    for entry in std::fs::read_dir(dir).map_err(|e| io_err(dir, e))? {
        let entry = entry.map_err(|e| io_err(dir, e))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some((version, name)) = parse_file_name(file_name)? else {
            continue;
        };
        if let Some((first, _)) = found.get(&version) {
            return Err(MigrateError::DuplicateMigration {
                version,
                first: first.clone(),
                second: file_name.to_string(),
            });
        }
        let sql = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
        found.insert(
            version,
            (file_name.to_string(), Migration::new(version, name, sql)),
        );
    }

    log::debug!("Loaded {} migrations from {}", found.len(), dir.display());
    Ok(found.into_values().map(|(_, m)| m).collect())
}
