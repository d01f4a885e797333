//! Local instance connector
//!
//! Resolves `project:region:instance` plus a database name to a DuckDB
//! database, either in memory or as a file under a root directory. All
//! connections to the same instance and database share one DuckDB database,
//! so separate migration sessions contend for the same lock and version
//! tables just as they would on a managed instance.

use crate::error::DbError;
use async_trait::async_trait;
use cm_core::{Dsn, InstanceName, MigrateError, MigrateResult, SecureConnector};
use duckdb::Connection;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Connector for locally hosted instances
pub struct LocalConnector {
    root: Option<PathBuf>,
    credentials: Option<(String, String)>,
    databases: Mutex<HashMap<String, Connection>>,
}

impl LocalConnector {
    /// Connector whose instances live in memory for the connector's lifetime
    pub fn in_memory() -> Self {
        Self {
            root: None,
            credentials: None,
            databases: Mutex::new(HashMap::new()),
        }
    }

    /// Connector whose instances are files under `root`
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
            ..Self::in_memory()
        }
    }

    /// Require every connection to present these credentials
    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some((user.into(), password.into()));
        self
    }

    /// File backing `database` on `instance`, if this connector is file-backed
    pub fn database_path(&self, instance: &InstanceName, database: &str) -> Option<PathBuf> {
        self.root.as_ref().map(|root| {
            root.join(path_component(&instance.project))
                .join(path_component(&instance.region))
                .join(path_component(&instance.instance))
                .join(format!("{}.duckdb", path_component(database)))
        })
    }

    fn authenticate(&self, dsn: &Dsn) -> MigrateResult<()> {
        let Some((user, password)) = &self.credentials else {
            return Ok(());
        };
        let given_user = dsn.decoded_user().unwrap_or_default();
        let given_password = dsn.decoded_password().unwrap_or_default();
        if &given_user != user || &given_password != password {
            return Err(MigrateError::Open(format!(
                "authentication failed for user '{}'",
                given_user
            )));
        }
        Ok(())
    }

    fn open_database(&self, instance: &InstanceName, database: &str) -> MigrateResult<Connection> {
        let open_err = |e: duckdb::Error| DbError::from(e).into_migrate(MigrateError::Open);
        match self.database_path(instance, database) {
            Some(path) => {
                create_parent(&path)?;
                log::debug!("Opening local instance database {}", path.display());
                Connection::open(&path).map_err(open_err)
            }
            None => Connection::open_in_memory().map_err(open_err),
        }
    }
}

#[async_trait]
impl SecureConnector for LocalConnector {
    type Connection = Connection;

    async fn connect(&self, dsn: &Dsn) -> MigrateResult<Connection> {
        let instance = dsn
            .instance()
            .map_err(|e| MigrateError::Open(e.to_string()))?;
        if dsn.database.is_empty() {
            return Err(MigrateError::Open(format!(
                "no database name given for instance {}",
                instance
            )));
        }
        self.authenticate(dsn)?;

        let key = format!("{}/{}", instance, dsn.database);
        let mut databases = self
            .databases
            .lock()
            .map_err(|e| MigrateError::Open(format!("connector state poisoned: {}", e)))?;
        if !databases.contains_key(&key) {
            let conn = self.open_database(&instance, &dsn.database)?;
            databases.insert(key.clone(), conn);
        }

        let session = databases
            .get(&key)
            .ok_or_else(|| MigrateError::Open(format!("instance {} vanished", key)))?
            .try_clone()
            .map_err(|e| DbError::from(e).into_migrate(MigrateError::Open))?;
        log::debug!("Connected to {}", key);
        Ok(session)
    }

    fn connector_name(&self) -> &'static str {
        "local"
    }
}

fn path_component(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn create_parent(path: &Path) -> MigrateResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            MigrateError::Open(format!("cannot create {}: {}", parent.display(), e))
        })?;
    }
    Ok(())
}
