//! cm-core - Core library for cloudsql-migrate
//!
//! This crate provides the migration driver contract, the persisted version
//! state, connection descriptor parsing, the driver registry, and a small
//! migration engine that drives any [`Driver`] through the lock, run,
//! set-version, unlock sequence.

pub mod config;
pub mod connector;
pub mod driver;
pub mod dsn;
pub mod error;
pub mod migration;
pub mod migrator;
pub mod registry;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use config::DriverConfig;
pub use connector::{SecureConnector, WithInstance};
pub use driver::{Driver, MigrationStatus, VersionState};
pub use dsn::{Dsn, InstanceName, QueryParam, CUSTOM_PARAM_PREFIX};
pub use error::{ErrorKind, MigrateError, MigrateResult};
pub use migration::{load_migrations, Migration};
pub use migrator::Migrator;
pub use registry::{DriverFactory, Registry};
