//! cm-cloudsql - Cloud SQL migration driver adapter
//!
//! Adapts a dialect migration driver to databases reached through a secure
//! instance connector. URLs name the instance as
//! `user:pass@cloudsql-mysql(project:region:instance)/database`; the adapter
//! strips migration-only parameters, enables multi-statement execution,
//! connects through the [`SecureConnector`](cm_core::SecureConnector) and
//! forwards every driver operation to the wrapped dialect driver.

pub mod adapter;
pub mod dsn;
pub mod register;

pub use adapter::{CloudSql, CloudSqlDriver};
pub use dsn::{build_dsn, normalize, MULTI_STATEMENTS_PARAM};
pub use register::{register, register_global, register_with_config, DRIVER_NAME};
