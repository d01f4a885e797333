//! Collaborator traits for proxy-aware drivers.
//!
//! A [`SecureConnector`] turns a normalized descriptor into an open
//! connection. A [`WithInstance`] implementation wraps that connection in a
//! dialect-specific [`Driver`]. Adapters compose the two without knowing the
//! connection type.

use crate::config::DriverConfig;
use crate::driver::Driver;
use crate::dsn::Dsn;
use crate::error::MigrateResult;
use async_trait::async_trait;

/// Establishes an authenticated channel to a managed database instance.
#[async_trait]
pub trait SecureConnector: Send + Sync {
    /// Connection handle produced by this connector
    type Connection: Send + 'static;

    /// Open a connection for `dsn`.
    ///
    /// Network and authentication failures are reported as
    /// [`MigrateError::Open`](crate::error::MigrateError::Open).
    async fn connect(&self, dsn: &Dsn) -> MigrateResult<Self::Connection>;

    /// Connector identifier for logging
    fn connector_name(&self) -> &'static str;
}

/// Wraps an open connection in a migration driver.
pub trait WithInstance<C>: Send + Sync {
    /// Build a driver that exclusively owns `conn`.
    ///
    /// Setup failures (for example, the version table cannot be created) are
    /// reported as [`MigrateError::Open`](crate::error::MigrateError::Open).
    fn with_instance(&self, conn: C, config: &DriverConfig) -> MigrateResult<Box<dyn Driver>>;
}
