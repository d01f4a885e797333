//! cm-db - DuckDB collaborators for cloudsql-migrate
//!
//! This crate provides a [`LocalConnector`] that resolves instance names to
//! DuckDB databases and a [`DuckDbDriver`] that implements the migration
//! driver contract on top of a DuckDB connection.

pub mod connector;
pub mod duckdb;
pub mod error;

pub use connector::LocalConnector;
pub use self::duckdb::{DuckDbDialect, DuckDbDriver};
pub use error::{DbError, DbResult};
