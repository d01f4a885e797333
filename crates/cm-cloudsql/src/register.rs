//! Registry wiring for the Cloud SQL adapter.

use crate::adapter::CloudSql;
use cm_core::{DriverConfig, MigrateResult, Registry, SecureConnector, WithInstance};
use std::sync::Arc;

/// Name under which the adapter registers; URLs select it with
/// `cloudsql-mysql://`.
pub const DRIVER_NAME: &str = "cloudsql-mysql";

/// Register the adapter in `registry`.
///
/// Fails with [`DuplicateDriver`](cm_core::MigrateError::DuplicateDriver)
/// if the name is already taken.
pub fn register<C, W>(registry: &Registry, connector: C, dialect: W) -> MigrateResult<()>
where
    C: SecureConnector + 'static,
    W: WithInstance<C::Connection> + 'static,
{
    register_with_config(registry, connector, dialect, DriverConfig::default())
}

/// Register the adapter with an explicit driver configuration.
pub fn register_with_config<C, W>(
    registry: &Registry,
    connector: C,
    dialect: W,
    config: DriverConfig,
) -> MigrateResult<()>
where
    C: SecureConnector + 'static,
    W: WithInstance<C::Connection> + 'static,
{
    config.validate()?;
    let factory = CloudSql::new(connector, dialect).with_config(config);
    registry.register(DRIVER_NAME, Arc::new(factory))
}

/// Register the adapter in the process-wide registry.
///
/// Call once at startup, before any driver is opened.
pub fn register_global<C, W>(connector: C, dialect: W) -> MigrateResult<()>
where
    C: SecureConnector + 'static,
    W: WithInstance<C::Connection> + 'static,
{
    register(Registry::global(), connector, dialect)
}
