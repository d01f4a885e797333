//! Driver configuration

use crate::error::{MigrateError, MigrateResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Options passed to a migration driver when it wraps a connection.
///
/// Every field has a default, so an empty document (or
/// [`DriverConfig::default`]) yields the dialect defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DriverConfig {
    /// Table holding the single version/dirty row
    #[serde(default = "default_migrations_table")]
    pub migrations_table: String,

    /// Table holding advisory lock rows
    #[serde(default = "default_lock_table")]
    pub lock_table: String,

    /// How long `lock` waits for another session to release the lock
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,

    /// Largest migration script `run` accepts, in bytes
    #[serde(default = "default_max_migration_size")]
    pub max_migration_size: usize,
}

fn default_migrations_table() -> String {
    "schema_migrations".to_string()
}

fn default_lock_table() -> String {
    "schema_lock".to_string()
}

fn default_lock_timeout_ms() -> u64 {
    15_000
}

fn default_max_migration_size() -> usize {
    10 * 1024 * 1024
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            migrations_table: default_migrations_table(),
            lock_table: default_lock_table(),
            lock_timeout_ms: default_lock_timeout_ms(),
            max_migration_size: default_max_migration_size(),
        }
    }
}

impl DriverConfig {
    /// Load configuration from a YAML file
    pub fn load(path: &Path) -> MigrateResult<Self> {
        if !path.exists() {
            return Err(MigrateError::ConfigNotFound {
                path: path.display().to_string(),
            });
        }
        let content = std::fs::read_to_string(path).map_err(|e| MigrateError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_yaml_str(&content)
    }

    /// Parse configuration from a YAML string
    pub fn from_yaml_str(yaml: &str) -> MigrateResult<Self> {
        // An empty document deserializes as null, not as an empty mapping.
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: DriverConfig =
            serde_yaml::from_str(yaml).map_err(|e| MigrateError::ConfigParse {
                message: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Lock wait as a [`Duration`]
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    /// Check table names and limits
    pub fn validate(&self) -> MigrateResult<()> {
        for (field, value) in [
            ("migrations_table", &self.migrations_table),
            ("lock_table", &self.lock_table),
        ] {
            let valid = !value.is_empty()
                && value
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');
            if !valid {
                return Err(MigrateError::ConfigParse {
                    message: format!("{} must be a plain identifier, got '{}'", field, value),
                });
            }
        }
        if self.migrations_table == self.lock_table {
            return Err(MigrateError::ConfigParse {
                message: "migrations_table and lock_table must differ".to_string(),
            });
        }
        if self.max_migration_size == 0 {
            return Err(MigrateError::ConfigParse {
                message: "max_migration_size must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
