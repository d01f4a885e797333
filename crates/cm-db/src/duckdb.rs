//! DuckDB migration driver
//!
//! Version state lives in a single-row table (`schema_migrations` by
//! default). DuckDB has no advisory locks, so the lock is a row in a lock
//! table keyed by `<database>:<migrations table>`; the primary key lets at
//! most one session insert it.

use crate::error::{DbError, DbResult};
use async_trait::async_trait;
use cm_core::{Driver, DriverConfig, MigrateError, MigrateResult, VersionState, WithInstance};
use duckdb::{params, Connection};
use std::io::Read;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// Sessions created by this process, for lock holder ids
static SESSION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Longest pause between lock attempts
const MAX_LOCK_BACKOFF: Duration = Duration::from_secs(1);

/// Stored in the version column when no version is recorded
const NIL_VERSION: i64 = -1;

/// Extra attempts for statements rejected by a concurrent writer
const CONFLICT_RETRIES: u32 = 10;

/// Schemas that belong to DuckDB itself and survive `drop_all`
const SYSTEM_SCHEMAS: &[&str] = &["main", "information_schema", "pg_catalog"];

/// Migration driver over one DuckDB connection
pub struct DuckDbDriver {
    conn: Option<Connection>,
    config: DriverConfig,
    lock_key: String,
    holder: String,
    is_locked: bool,
}

impl DuckDbDriver {
    /// Wrap `conn`, creating the version and lock tables if needed.
    pub fn with_instance(conn: Connection, config: &DriverConfig) -> MigrateResult<Self> {
        let open_err = |e: DbError| e.into_migrate(MigrateError::Open);

        // Sessions opening the same database at once race on the catalog.
        retry_on_conflict(|| ensure_version_table(&conn, &config.migrations_table))
            .map_err(open_err)?;
        retry_on_conflict(|| ensure_lock_table(&conn, &config.lock_table)).map_err(open_err)?;
        let database: String = conn
            .query_row("SELECT current_database()", [], |row| row.get(0))
            .map_err(|e| open_err(e.into()))?;

        let session = SESSION_COUNTER.fetch_add(1, Ordering::Relaxed);
        Ok(Self {
            conn: Some(conn),
            lock_key: format!("{}:{}", database, config.migrations_table),
            holder: format!("{}-{}", std::process::id(), session),
            config: config.clone(),
            is_locked: false,
        })
    }

    /// Driver over a fresh in-memory database
    pub fn in_memory(config: &DriverConfig) -> MigrateResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| DbError::from(e).into_migrate(MigrateError::Open))?;
        Self::with_instance(conn, config)
    }

    /// Key of the lock row this driver contends for
    pub fn lock_key(&self) -> &str {
        &self.lock_key
    }

    fn conn(&self, kind: fn(String) -> MigrateError) -> MigrateResult<&Connection> {
        self.conn
            .as_ref()
            .ok_or_else(|| kind("connection is closed".to_string()))
    }

    /// Insert the lock row. `Ok(false)` when another session holds it.
    fn try_acquire(&self) -> MigrateResult<bool> {
        let conn = self.conn(MigrateError::Lock)?;
        let sql = format!(
            "INSERT INTO {} (lock_key, holder, acquired_at) VALUES (?, ?, now()) ON CONFLICT DO NOTHING",
            self.config.lock_table
        );
        match conn.execute(&sql, params![self.lock_key, self.holder]) {
            Ok(inserted) => Ok(inserted == 1),
            Err(e) => match DbError::from(e) {
                DbError::Conflict(_) => Ok(false),
                other => Err(other.into_migrate(MigrateError::Lock)),
            },
        }
    }

    /// Delete this session's lock row. Returns whether a row was removed.
    fn release(&self) -> DbResult<bool> {
        let Some(conn) = self.conn.as_ref() else {
            return Ok(false);
        };
        let sql = format!(
            "DELETE FROM {} WHERE lock_key = ? AND holder = ?",
            self.config.lock_table
        );
        let deleted =
            retry_on_conflict(|| Ok(conn.execute(&sql, params![self.lock_key, self.holder])?))?;
        Ok(deleted > 0)
    }

    fn read_script(&self, migration: &mut (dyn Read + Send)) -> MigrateResult<String> {
        let limit = self.config.max_migration_size;
        let mut buf = Vec::new();
        Read::take(migration, limit as u64 + 1)
            .read_to_end(&mut buf)
            .map_err(|e| MigrateError::Run(format!("cannot read migration: {}", e)))?;
        if buf.len() > limit {
            return Err(MigrateError::Run(format!(
                "migration exceeds max_migration_size of {} bytes",
                limit
            )));
        }
        String::from_utf8(buf)
            .map_err(|e| MigrateError::Run(format!("migration is not valid UTF-8: {}", e)))
    }

    fn write_version(&mut self, version: Option<u64>, dirty: bool) -> DbResult<()> {
        let stored = match version {
            Some(v) => i64::try_from(v)
                .map_err(|_| DbError::ExecutionError(format!("version {} out of range", v)))?,
            None => NIL_VERSION,
        };
        let table = self.config.migrations_table.clone();
        let conn = self
            .conn
            .as_mut()
            .ok_or_else(|| DbError::ConnectionError("connection is closed".to_string()))?;

        let tx = conn.transaction()?;
        tx.execute(&format!("DELETE FROM {}", table), [])?;
        // A dirty state with no version still has to be recorded.
        if version.is_some() || dirty {
            tx.execute(
                &format!("INSERT INTO {} (version, dirty) VALUES (?, ?)", table),
                params![stored, dirty],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn read_version(&self) -> DbResult<VersionState> {
        let conn = self
            .conn
            .as_ref()
            .ok_or_else(|| DbError::ConnectionError("connection is closed".to_string()))?;
        let sql = format!(
            "SELECT version, dirty FROM {} LIMIT 1",
            self.config.migrations_table
        );
        match conn.query_row(&sql, [], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, bool>(1)?))
        }) {
            Ok((version, dirty)) => Ok(VersionState::new(u64::try_from(version).ok(), dirty)),
            Err(duckdb::Error::QueryReturnedNoRows) => Ok(VersionState::NONE),
            Err(e) => match DbError::from(e) {
                DbError::TableNotFound(_) => Ok(VersionState::NONE),
                other => Err(other),
            },
        }
    }

    fn drop_objects(&self) -> DbResult<()> {
        let conn = self
            .conn
            .as_ref()
            .ok_or_else(|| DbError::ConnectionError("connection is closed".to_string()))?;
        let (lock_schema, lock_table) = split_qualified(&self.config.lock_table);

        let views = list_pairs(
            conn,
            "SELECT schema_name, view_name FROM duckdb_views() \
             WHERE database_name = current_database() AND NOT internal AND NOT temporary",
        )?;
        for (schema, view) in &views {
            conn.execute_batch(&format!(
                "DROP VIEW IF EXISTS {}.{}",
                quote(schema),
                quote(view)
            ))?;
        }

        let mut tables: Vec<(String, String)> = list_pairs(
            conn,
            "SELECT schema_name, table_name FROM duckdb_tables() \
             WHERE database_name = current_database() AND NOT temporary",
        )?
        .into_iter()
        .filter(|(schema, table)| !(schema == lock_schema && table == lock_table))
        .collect();

        // Foreign keys block dropping a referenced table first, so keep
        // sweeping until a pass makes no progress.
        while !tables.is_empty() {
            let before = tables.len();
            let mut last_err = None;
            tables.retain(|(schema, table)| {
                let sql = format!("DROP TABLE IF EXISTS {}.{}", quote(schema), quote(table));
                match conn.execute_batch(&sql) {
                    Ok(()) => false,
                    Err(e) => {
                        last_err = Some(e);
                        true
                    }
                }
            });
            if tables.len() == before {
                if let Some(e) = last_err {
                    return Err(e.into());
                }
            }
        }

        let mut stmt = conn.prepare(
            "SELECT schema_name FROM duckdb_schemas() \
             WHERE database_name = current_database() AND NOT internal",
        )?;
        let schemas: Vec<String> = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<_, _>>()?;
        for schema in schemas
            .iter()
            .filter(|s| !SYSTEM_SCHEMAS.contains(&s.as_str()) && s.as_str() != lock_schema)
        {
            conn.execute_batch(&format!("DROP SCHEMA IF EXISTS {} CASCADE", quote(schema)))?;
        }

        ensure_version_table(conn, &self.config.migrations_table)
    }
}

#[async_trait]
impl Driver for DuckDbDriver {
    async fn lock(&mut self) -> MigrateResult<()> {
        if self.is_locked {
            return Err(MigrateError::Lock(format!(
                "lock '{}' is already held by this session",
                self.lock_key
            )));
        }

        let timeout = self.config.lock_timeout();
        let started = Instant::now();
        let mut backoff = Duration::from_millis(10);
        loop {
            if self.try_acquire()? {
                self.is_locked = true;
                log::debug!("Acquired migration lock '{}'", self.lock_key);
                return Ok(());
            }
            let elapsed = started.elapsed();
            if elapsed >= timeout {
                return Err(MigrateError::LockTimeout {
                    lock_key: self.lock_key.clone(),
                    timeout_ms: self.config.lock_timeout_ms,
                });
            }
            log::debug!(
                "Migration lock '{}' is held by another session, retrying in {:?}",
                self.lock_key,
                backoff
            );
            tokio::time::sleep(backoff.min(timeout - elapsed)).await;
            backoff = (backoff * 2).min(MAX_LOCK_BACKOFF);
        }
    }

    async fn unlock(&mut self) -> MigrateResult<()> {
        self.conn(MigrateError::Unlock)?;
        if !self.is_locked {
            return Err(MigrateError::Unlock(format!(
                "lock '{}' is not held by this session",
                self.lock_key
            )));
        }
        let released = self
            .release()
            .map_err(|e| e.into_migrate(MigrateError::Unlock))?;
        self.is_locked = false;
        if !released {
            return Err(MigrateError::Unlock(format!(
                "lock row '{}' was removed by another session",
                self.lock_key
            )));
        }
        log::debug!("Released migration lock '{}'", self.lock_key);
        Ok(())
    }

    async fn run(&mut self, migration: &mut (dyn Read + Send)) -> MigrateResult<()> {
        self.conn(MigrateError::Run)?;
        let script = self.read_script(migration)?;
        if script.trim().is_empty() {
            return Ok(());
        }
        self.conn(MigrateError::Run)?
            .execute_batch(&script)
            .map_err(|e| DbError::from(e).into_migrate(MigrateError::Run))
    }

    async fn set_version(&mut self, version: Option<u64>, dirty: bool) -> MigrateResult<()> {
        self.write_version(version, dirty)
            .map_err(|e| e.into_migrate(MigrateError::State))
    }

    async fn version(&mut self) -> MigrateResult<VersionState> {
        self.read_version()
            .map_err(|e| e.into_migrate(MigrateError::State))
    }

    async fn drop_all(&mut self) -> MigrateResult<()> {
        self.conn(MigrateError::Drop)?;
        self.drop_objects()
            .map_err(|e| e.into_migrate(MigrateError::Drop))?;
        log::info!("Dropped all objects in '{}'", self.lock_key);
        Ok(())
    }

    async fn close(&mut self) -> MigrateResult<()> {
        self.conn(MigrateError::Close)?;
        if self.is_locked {
            if let Err(e) = self.release() {
                log::warn!("Failed to release lock '{}' on close: {}", self.lock_key, e);
            }
            self.is_locked = false;
        }
        let Some(conn) = self.conn.take() else {
            return Err(MigrateError::Close("connection is closed".to_string()));
        };
        conn.close()
            .map_err(|(_, e)| DbError::from(e).into_migrate(MigrateError::Close))
    }

    fn driver_name(&self) -> &'static str {
        "duckdb"
    }
}

impl Drop for DuckDbDriver {
    fn drop(&mut self) {
        // The lock row outlives the session otherwise.
        if self.is_locked {
            if let Err(e) = self.release() {
                log::warn!("Failed to release lock '{}' on drop: {}", self.lock_key, e);
            }
        }
    }
}

/// Wraps DuckDB connections in [`DuckDbDriver`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct DuckDbDialect;

impl WithInstance<Connection> for DuckDbDialect {
    fn with_instance(&self, conn: Connection, config: &DriverConfig) -> MigrateResult<Box<dyn Driver>> {
        Ok(Box::new(DuckDbDriver::with_instance(conn, config)?))
    }
}

/// Run `op` again while it fails with a write conflict.
///
/// Only for short statements that become no-ops once the competing write has
/// committed (`IF NOT EXISTS` setup, deleting our own lock row).
fn retry_on_conflict<T>(mut op: impl FnMut() -> DbResult<T>) -> DbResult<T> {
    let mut attempt = 0;
    loop {
        match op() {
            Err(e) if e.is_conflict() && attempt < CONFLICT_RETRIES => {
                attempt += 1;
                log::debug!("Retrying after write conflict (attempt {}): {}", attempt, e);
                std::thread::sleep(Duration::from_millis(2 * u64::from(attempt)));
            }
            result => return result,
        }
    }
}

fn ensure_version_table(conn: &Connection, table: &str) -> DbResult<()> {
    create_schema_for(conn, table)?;
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {} (
             version BIGINT NOT NULL,
             dirty   BOOLEAN NOT NULL
         );",
        table
    ))?;
    Ok(())
}

fn ensure_lock_table(conn: &Connection, table: &str) -> DbResult<()> {
    create_schema_for(conn, table)?;
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {} (
             lock_key    VARCHAR PRIMARY KEY,
             holder      VARCHAR NOT NULL,
             acquired_at TIMESTAMP NOT NULL
         );",
        table
    ))?;
    Ok(())
}

fn create_schema_for(conn: &Connection, table: &str) -> DbResult<()> {
    let (schema, _) = split_qualified(table);
    if schema != "main" {
        conn.execute_batch(&format!("CREATE SCHEMA IF NOT EXISTS {}", schema))?;
    }
    Ok(())
}

/// Split `schema.table`, defaulting the schema to `main`
fn split_qualified(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(pos) => (&name[..pos], &name[pos + 1..]),
        None => ("main", name),
    }
}

fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn list_pairs(conn: &Connection, sql: &str) -> DbResult<Vec<(String, String)>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
#[path = "duckdb_test.rs"]
mod tests;
