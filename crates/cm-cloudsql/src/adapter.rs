//! Cloud SQL driver adapter
//!
//! [`CloudSql`] is the factory stored in the registry: it normalizes the URL,
//! opens a connection through the secure connector and hands it to the SQL
//! dialect driver. The resulting [`CloudSqlDriver`] forwards every operation
//! to that dialect driver unchanged.

use crate::dsn::build_dsn;
use crate::DRIVER_NAME;
use async_trait::async_trait;
use cm_core::{
    Driver, DriverConfig, DriverFactory, MigrateError, MigrateResult, SecureConnector,
    VersionState, WithInstance,
};
use std::io::Read;

/// Factory for proxy-connected migration drivers.
pub struct CloudSql<C, W> {
    connector: C,
    dialect: W,
    config: DriverConfig,
}

impl<C, W> CloudSql<C, W>
where
    C: SecureConnector,
    W: WithInstance<C::Connection>,
{
    /// Create a factory with the default driver configuration
    pub fn new(connector: C, dialect: W) -> Self {
        Self {
            connector,
            dialect,
            config: DriverConfig::default(),
        }
    }

    /// Replace the driver configuration passed to the dialect driver
    pub fn with_config(mut self, config: DriverConfig) -> Self {
        self.config = config;
        self
    }

    /// Driver configuration in use
    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Open a driver for `url`.
    ///
    /// Malformed URLs fail with [`MigrateError::Parse`] before any connection
    /// is attempted. Connector and dialect setup failures surface as
    /// [`MigrateError::Open`].
    pub async fn open_driver(&self, url: &str) -> MigrateResult<CloudSqlDriver> {
        let dsn = build_dsn(url)?;
        let target = format!(
            "{}/{}",
            dsn.address.as_deref().unwrap_or_default(),
            dsn.database
        );
        log::debug!(
            "Connecting to {} via {} connector",
            target,
            self.connector.connector_name()
        );

        let conn = self.connector.connect(&dsn).await.map_err(into_open)?;
        let inner = self
            .dialect
            .with_instance(conn, &self.config)
            .map_err(into_open)?;
        log::debug!("Opened {} driver on {}", inner.driver_name(), target);
        Ok(CloudSqlDriver::new(inner))
    }
}

#[async_trait]
impl<C, W> DriverFactory for CloudSql<C, W>
where
    C: SecureConnector,
    W: WithInstance<C::Connection>,
{
    async fn open(&self, url: &str) -> MigrateResult<Box<dyn Driver>> {
        let driver = self.open_driver(url).await?;
        Ok(Box::new(driver))
    }
}

/// Connector and dialect errors that are not already open failures.
fn into_open(err: MigrateError) -> MigrateError {
    match err {
        MigrateError::Open(_) => err,
        other => MigrateError::Open(other.to_string()),
    }
}

/// Migration driver backed by a proxy connection.
///
/// Every operation is delegated to the wrapped dialect driver.
pub struct CloudSqlDriver<D: Driver = Box<dyn Driver>> {
    inner: D,
}

impl<D: Driver> CloudSqlDriver<D> {
    /// Wrap a dialect driver
    pub fn new(inner: D) -> Self {
        Self { inner }
    }

    /// The wrapped dialect driver
    pub fn inner(&self) -> &D {
        &self.inner
    }

    /// Unwrap into the dialect driver
    pub fn into_inner(self) -> D {
        self.inner
    }
}

#[async_trait]
impl<D: Driver> Driver for CloudSqlDriver<D> {
    async fn lock(&mut self) -> MigrateResult<()> {
        self.inner.lock().await
    }

    async fn unlock(&mut self) -> MigrateResult<()> {
        self.inner.unlock().await
    }

    async fn run(&mut self, migration: &mut (dyn Read + Send)) -> MigrateResult<()> {
        self.inner.run(migration).await
    }

    async fn set_version(&mut self, version: Option<u64>, dirty: bool) -> MigrateResult<()> {
        self.inner.set_version(version, dirty).await
    }

    async fn version(&mut self) -> MigrateResult<VersionState> {
        self.inner.version().await
    }

    async fn drop_all(&mut self) -> MigrateResult<()> {
        log::warn!("Dropping every object through {}", DRIVER_NAME);
        self.inner.drop_all().await
    }

    async fn close(&mut self) -> MigrateResult<()> {
        log::debug!("Closing {} connection", DRIVER_NAME);
        self.inner.close().await
    }

    fn driver_name(&self) -> &'static str {
        DRIVER_NAME
    }
}

#[cfg(test)]
#[path = "adapter_test.rs"]
mod tests;
