//! Migration driver contract
//!
//! A [`Driver`] owns one open database connection and exposes the operations
//! the migration engine needs: advisory locking, running a script, and
//! reading and writing the persisted version state.

use crate::error::MigrateResult;
use async_trait::async_trait;
use std::fmt;
use std::io::Read;

/// Persisted migration version state.
///
/// `version` is `None` until the first migration has been recorded. A dirty
/// state means a migration started but never finished; the engine refuses to
/// continue until an operator forces a version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VersionState {
    /// Last recorded version, `None` when nothing has been applied
    pub version: Option<u64>,

    /// Whether the last recorded migration was interrupted
    pub dirty: bool,
}

/// High-level view of a [`VersionState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationStatus {
    /// No migration has ever been recorded
    Uninitialized,
    /// Version `v` is fully applied
    Clean(u64),
    /// A migration started at version `v` did not complete
    Dirty(Option<u64>),
}

impl VersionState {
    /// State of a database with no recorded migrations
    pub const NONE: VersionState = VersionState {
        version: None,
        dirty: false,
    };

    /// Create a state from its parts
    pub fn new(version: Option<u64>, dirty: bool) -> Self {
        Self { version, dirty }
    }

    /// Clean state at `version`
    pub fn clean(version: u64) -> Self {
        Self::new(Some(version), false)
    }

    /// Classify this state
    pub fn status(&self) -> MigrationStatus {
        match (self.version, self.dirty) {
            (v, true) => MigrationStatus::Dirty(v),
            (None, false) => MigrationStatus::Uninitialized,
            (Some(v), false) => MigrationStatus::Clean(v),
        }
    }
}

impl fmt::Display for VersionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.version {
            Some(v) => write!(f, "{}", v)?,
            None => f.write_str("none")?,
        }
        if self.dirty {
            f.write_str(" (dirty)")?;
        }
        Ok(())
    }
}

/// Migration driver abstraction.
///
/// A driver is owned by exactly one migration session and is never shared
/// between threads, so every operation takes `&mut self`. Implementations
/// must be `Send` so a session can move across tasks.
#[async_trait]
pub trait Driver: Send {
    /// Acquire the advisory lock for this database.
    ///
    /// Locking twice on the same handle without an unlock is an error.
    async fn lock(&mut self) -> MigrateResult<()>;

    /// Release the advisory lock. Fails if the lock is not held.
    async fn unlock(&mut self) -> MigrateResult<()>;

    /// Execute a migration script as one logical unit.
    ///
    /// Does not touch the version state.
    async fn run(&mut self, migration: &mut (dyn Read + Send)) -> MigrateResult<()>;

    /// Persist the version state atomically.
    async fn set_version(&mut self, version: Option<u64>, dirty: bool) -> MigrateResult<()>;

    /// Read the version state, [`VersionState::NONE`] if nothing was recorded.
    async fn version(&mut self) -> MigrateResult<VersionState>;

    /// Destroy every object in the database, including the version state.
    async fn drop_all(&mut self) -> MigrateResult<()>;

    /// Release the connection. Calling close twice is an error.
    async fn close(&mut self) -> MigrateResult<()>;

    /// Driver type identifier for logging
    fn driver_name(&self) -> &'static str;
}

#[async_trait]
impl<D: Driver + ?Sized> Driver for Box<D> {
    async fn lock(&mut self) -> MigrateResult<()> {
        (**self).lock().await
    }

    async fn unlock(&mut self) -> MigrateResult<()> {
        (**self).unlock().await
    }

    async fn run(&mut self, migration: &mut (dyn Read + Send)) -> MigrateResult<()> {
        (**self).run(migration).await
    }

    async fn set_version(&mut self, version: Option<u64>, dirty: bool) -> MigrateResult<()> {
        (**self).set_version(version, dirty).await
    }

    async fn version(&mut self) -> MigrateResult<VersionState> {
        (**self).version().await
    }

    async fn drop_all(&mut self) -> MigrateResult<()> {
        (**self).drop_all().await
    }

    async fn close(&mut self) -> MigrateResult<()> {
        (**self).close().await
    }

    fn driver_name(&self) -> &'static str {
        (**self).driver_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions() {
        assert_eq!(VersionState::NONE.status(), MigrationStatus::Uninitialized);
        assert_eq!(
            VersionState::clean(3).status(),
            MigrationStatus::Clean(3)
        );
        assert_eq!(
            VersionState::new(Some(3), true).status(),
            MigrationStatus::Dirty(Some(3))
        );
        assert_eq!(
            VersionState::new(None, true).status(),
            MigrationStatus::Dirty(None)
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(VersionState::NONE.to_string(), "none");
        assert_eq!(VersionState::clean(7).to_string(), "7");
        assert_eq!(VersionState::new(Some(7), true).to_string(), "7 (dirty)");
    }
}
