//! Migration engine.
//!
//! Drives any [`Driver`] through the lock, run, set-version, unlock
//! sequence. Before a migration runs, the last clean version is recorded as
//! dirty; once the script succeeds the new version is recorded clean. A
//! failed script therefore leaves the database dirty at the version it had
//! before, and every later `up` refuses to run until [`Migrator::force`]
//! repairs the state.

use crate::driver::{Driver, VersionState};
use crate::error::{MigrateError, MigrateResult};
use crate::migration::Migration;

/// Applies migrations through a driver.
pub struct Migrator<D: Driver = Box<dyn Driver>> {
    driver: D,
    migrations: Vec<Migration>,
}

impl<D: Driver> Migrator<D> {
    /// Create a migrator; migrations are applied in version order.
    pub fn new(driver: D, mut migrations: Vec<Migration>) -> Self {
        migrations.sort_by_key(|m| m.version);
        Self { driver, migrations }
    }

    /// Migrations known to this migrator, sorted by version
    pub fn migrations(&self) -> &[Migration] {
        &self.migrations
    }

    /// Borrow the underlying driver
    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    /// Apply every migration newer than the recorded version.
    ///
    /// Returns the versions applied by this call. The lock is released even
    /// when a migration fails; the migration error takes precedence over an
    /// unlock error.
    pub async fn up(&mut self) -> MigrateResult<Vec<u64>> {
        self.driver.lock().await?;
        let result = self.apply_pending().await;
        self.release(result).await
    }

    /// Record `version` as clean without running anything.
    ///
    /// This is the operator's way out of a dirty state.
    pub async fn force(&mut self, version: Option<u64>) -> MigrateResult<()> {
        self.driver.lock().await?;
        let result = self.driver.set_version(version, false).await;
        if result.is_ok() {
            log::info!(
                "Forced version to {}",
                VersionState::new(version, false)
            );
        }
        self.release(result).await
    }

    /// Read the recorded version state
    pub async fn version(&mut self) -> MigrateResult<VersionState> {
        self.driver.version().await
    }

    /// Drop every object in the target database under the lock.
    pub async fn drop_all(&mut self) -> MigrateResult<()> {
        self.driver.lock().await?;
        let result = self.driver.drop_all().await;
        self.release(result).await
    }

    /// Close the driver
    pub async fn close(mut self) -> MigrateResult<()> {
        self.driver.close().await
    }

    async fn apply_pending(&mut self) -> MigrateResult<Vec<u64>> {
        let Self { driver, migrations } = self;

        let state = driver.version().await?;
        if state.dirty {
            return Err(MigrateError::Dirty {
                version: VersionState::new(state.version, false).to_string(),
            });
        }

        let start = state.version;
        let mut current = start;
        let mut applied = Vec::new();
        for migration in migrations
            .iter()
            .filter(|m| start.map_or(true, |v| m.version > v))
        {
            log::info!(
                "Applying migration {}_{} on {}",
                migration.version,
                migration.name,
                driver.driver_name()
            );
            driver.set_version(current, true).await?;
            driver.run(&mut migration.sql.as_bytes()).await?;
            driver.set_version(Some(migration.version), false).await?;
            current = Some(migration.version);
            applied.push(migration.version);
        }

        if applied.is_empty() {
            log::debug!("No pending migrations at version {}", state);
        }
        Ok(applied)
    }

    async fn release<T>(&mut self, result: MigrateResult<T>) -> MigrateResult<T> {
        let unlocked = self.driver.unlock().await;
        match (result, unlocked) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(err)) => Err(err),
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(unlock_err)) => {
                log::warn!("Failed to release migration lock: {}", unlock_err);
                Err(err)
            }
        }
    }
}

#[cfg(test)]
#[path = "migrator_test.rs"]
mod tests;
