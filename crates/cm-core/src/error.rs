//! Error types for cm-core

use thiserror::Error;

/// Migration driver errors.
///
/// Every driver operation reports failures through this type. The variant
/// tells the caller which remediation applies: reconnect, wait for the lock,
/// or repair a dirty version by hand.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// C001: Connection URL could not be parsed
    #[error("[C001] Invalid connection URL '{url}': {reason}")]
    Parse { url: String, reason: String },

    /// C002: Connection or driver setup failed
    #[error("[C002] Failed to open database: {0}")]
    Open(String),

    /// C003: Advisory lock could not be acquired
    #[error("[C003] Failed to acquire migration lock: {0}")]
    Lock(String),

    /// C004: Advisory lock is held elsewhere and the wait expired
    #[error("[C004] Timed out after {timeout_ms}ms waiting for migration lock '{lock_key}'")]
    LockTimeout { lock_key: String, timeout_ms: u64 },

    /// C005: Advisory lock could not be released
    #[error("[C005] Failed to release migration lock: {0}")]
    Unlock(String),

    /// C006: Migration script failed
    #[error("[C006] Migration failed: {0}")]
    Run(String),

    /// C007: Version record could not be read or written
    #[error("[C007] Version state error: {0}")]
    State(String),

    /// C008: Drop failed
    #[error("[C008] Failed to drop database objects: {0}")]
    Drop(String),

    /// C009: Close failed
    #[error("[C009] Failed to close database: {0}")]
    Close(String),

    /// C010: Database is dirty and needs a forced version
    #[error("[C010] Database is dirty at version {version}. Fix the failed migration and force the version")]
    Dirty { version: String },

    /// C011: No driver registered under the requested name
    #[error("[C011] Unknown migration driver '{0}'")]
    UnknownDriver(String),

    /// C012: Driver name is already taken
    #[error("[C012] Migration driver '{0}' is already registered")]
    DuplicateDriver(String),

    /// C013: Configuration file not found
    #[error("[C013] Config file not found: {path}")]
    ConfigNotFound { path: String },

    /// C014: Configuration could not be parsed
    #[error("[C014] Failed to parse config: {message}")]
    ConfigParse { message: String },

    /// C015: Migration file name does not follow `<version>_<name>.up.sql`
    #[error("[C015] Invalid migration file '{path}': {reason}")]
    InvalidMigrationFile { path: String, reason: String },

    /// C016: Two migration files share a version
    #[error("[C016] Duplicate migration version {version}: {first} and {second}")]
    DuplicateMigration {
        version: u64,
        first: String,
        second: String,
    },

    /// C017: IO error with file path context
    #[error("[C017] Failed to read '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
}

/// Result type alias for MigrateError
pub type MigrateResult<T> = Result<T, MigrateError>;

/// Coarse classification of a [`MigrateError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input: URL, config, or migration files
    Invalid,
    /// Cannot connect; retrying the connection may help
    Connection,
    /// Cannot acquire or release the lock; wait and retry
    Lock,
    /// Migration script failed; the version is left dirty
    Migration,
    /// Version record is dirty or unreadable; needs operator repair
    State,
    /// Drop or close failed
    Teardown,
    /// Registry lookup or registration failed
    Registry,
}

impl MigrateError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            MigrateError::Parse { .. }
            | MigrateError::ConfigNotFound { .. }
            | MigrateError::ConfigParse { .. }
            | MigrateError::InvalidMigrationFile { .. }
            | MigrateError::DuplicateMigration { .. }
            | MigrateError::Io { .. } => ErrorKind::Invalid,
            MigrateError::Open(_) => ErrorKind::Connection,
            MigrateError::Lock(_) | MigrateError::LockTimeout { .. } | MigrateError::Unlock(_) => {
                ErrorKind::Lock
            }
            MigrateError::Run(_) => ErrorKind::Migration,
            MigrateError::State(_) | MigrateError::Dirty { .. } => ErrorKind::State,
            MigrateError::Drop(_) | MigrateError::Close(_) => ErrorKind::Teardown,
            MigrateError::UnknownDriver(_) | MigrateError::DuplicateDriver(_) => {
                ErrorKind::Registry
            }
        }
    }

    /// Build a [`MigrateError::Parse`] for `url`.
    pub fn parse(url: &str, reason: impl Into<String>) -> Self {
        MigrateError::Parse {
            url: crate::dsn::redact_password(url),
            reason: reason.into(),
        }
    }
}
