//! In-memory driver for tests.
//!
//! [`MemoryDatabase`] plays the role of a shared target database; every
//! [`MemoryDriver`] opened on it is a separate session. Scripts containing
//! the marker `FAIL` fail in `run`, and every call is recorded so forwarding
//! can be asserted.

use crate::driver::{Driver, VersionState};
use crate::error::{MigrateError, MigrateResult};
use crate::registry::DriverFactory;
use async_trait::async_trait;
use std::io::Read;
use std::sync::{Arc, Mutex, MutexGuard};

/// Marker that makes [`MemoryDriver::run`] fail
pub const FAIL_MARKER: &str = "FAIL";

#[derive(Debug, Default)]
struct MemoryState {
    version: VersionState,
    lock_holder: Option<u64>,
    next_session: u64,
    scripts: Vec<String>,
    calls: Vec<String>,
}

/// Shared in-memory target database.
#[derive(Debug, Clone, Default)]
pub struct MemoryDatabase {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryDatabase {
    /// Create an empty database
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Open a new session
    pub fn driver(&self) -> MemoryDriver {
        let session = {
            let mut state = self.state();
            state.next_session += 1;
            state.next_session
        };
        MemoryDriver {
            db: self.clone(),
            session,
            holds_lock: false,
            closed: false,
        }
    }

    /// Currently persisted version state
    pub fn version_state(&self) -> VersionState {
        self.state().version
    }

    /// Scripts successfully run, in order
    pub fn scripts(&self) -> Vec<String> {
        self.state().scripts.clone()
    }

    /// Operation names called on any session, in order
    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    /// Whether any session holds the lock
    pub fn is_locked(&self) -> bool {
        self.state().lock_holder.is_some()
    }
}

#[async_trait]
impl DriverFactory for MemoryDatabase {
    async fn open(&self, _url: &str) -> MigrateResult<Box<dyn Driver>> {
        Ok(Box::new(self.driver()))
    }
}

/// One session on a [`MemoryDatabase`].
#[derive(Debug)]
pub struct MemoryDriver {
    db: MemoryDatabase,
    session: u64,
    holds_lock: bool,
    closed: bool,
}

impl MemoryDriver {
    fn record(&self, call: &str) -> MutexGuard<'_, MemoryState> {
        let mut state = self.db.state();
        state.calls.push(call.to_string());
        state
    }

    fn ensure_open(&self, err: fn(String) -> MigrateError) -> MigrateResult<()> {
        if self.closed {
            return Err(err("driver is closed".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Driver for MemoryDriver {
    async fn lock(&mut self) -> MigrateResult<()> {
        self.ensure_open(MigrateError::Lock)?;
        let mut state = self.record("lock");
        if self.holds_lock {
            return Err(MigrateError::Lock("already locked".to_string()));
        }
        if state.lock_holder.is_some() {
            return Err(MigrateError::LockTimeout {
                lock_key: "memory".to_string(),
                timeout_ms: 0,
            });
        }
        state.lock_holder = Some(self.session);
        drop(state);
        self.holds_lock = true;
        Ok(())
    }

    async fn unlock(&mut self) -> MigrateResult<()> {
        self.ensure_open(MigrateError::Unlock)?;
        let mut state = self.record("unlock");
        if !self.holds_lock {
            return Err(MigrateError::Unlock("not locked".to_string()));
        }
        state.lock_holder = None;
        drop(state);
        self.holds_lock = false;
        Ok(())
    }

    async fn run(&mut self, migration: &mut (dyn Read + Send)) -> MigrateResult<()> {
        self.ensure_open(MigrateError::Run)?;
        let mut script = String::new();
        migration
            .read_to_string(&mut script)
            .map_err(|e| MigrateError::Run(e.to_string()))?;
        let mut state = self.record("run");
        if script.contains(FAIL_MARKER) {
            return Err(MigrateError::Run(format!("script failed: {}", script)));
        }
        state.scripts.push(script);
        Ok(())
    }

    async fn set_version(&mut self, version: Option<u64>, dirty: bool) -> MigrateResult<()> {
        self.ensure_open(MigrateError::State)?;
        let mut state = self.record("set_version");
        state.version = VersionState::new(version, dirty);
        Ok(())
    }

    async fn version(&mut self) -> MigrateResult<VersionState> {
        self.ensure_open(MigrateError::State)?;
        Ok(self.record("version").version)
    }

    async fn drop_all(&mut self) -> MigrateResult<()> {
        self.ensure_open(MigrateError::Drop)?;
        let mut state = self.record("drop_all");
        state.version = VersionState::NONE;
        state.scripts.clear();
        Ok(())
    }

    async fn close(&mut self) -> MigrateResult<()> {
        self.ensure_open(MigrateError::Close)?;
        let mut state = self.record("close");
        if self.holds_lock {
            state.lock_holder = None;
        }
        drop(state);
        self.holds_lock = false;
        self.closed = true;
        Ok(())
    }

    fn driver_name(&self) -> &'static str {
        "memory"
    }
}
