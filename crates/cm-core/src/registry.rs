//! Driver registry
//!
//! Maps driver names to factories. The process-wide registry is written once
//! at startup (one `register` call per driver) and only read afterwards.

use crate::driver::Driver;
use crate::error::{MigrateError, MigrateResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

/// Creates drivers from connection URLs.
///
/// Each call to [`open`](DriverFactory::open) yields a fresh driver that owns
/// its own connection.
#[async_trait]
pub trait DriverFactory: Send + Sync {
    /// Open a new driver for `url`.
    async fn open(&self, url: &str) -> MigrateResult<Box<dyn Driver>>;
}

/// Name-to-factory mapping.
#[derive(Default)]
pub struct Registry {
    drivers: RwLock<HashMap<String, Arc<dyn DriverFactory>>>,
}

impl Registry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `factory` under `name`.
    ///
    /// Names are unique; registering a taken name fails.
    pub fn register(&self, name: &str, factory: Arc<dyn DriverFactory>) -> MigrateResult<()> {
        let mut drivers = self
            .drivers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if drivers.contains_key(name) {
            return Err(MigrateError::DuplicateDriver(name.to_string()));
        }
        log::debug!("Registered migration driver '{}'", name);
        drivers.insert(name.to_string(), factory);
        Ok(())
    }

    /// Look up a factory by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn DriverFactory>> {
        self.drivers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(name)
            .cloned()
    }

    /// Registered driver names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .drivers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Open a driver selected by the scheme of `url`.
    pub async fn open(&self, url: &str) -> MigrateResult<Box<dyn Driver>> {
        let name = scheme_of(url)?;
        let factory = self
            .get(name)
            .ok_or_else(|| MigrateError::UnknownDriver(name.to_string()))?;
        log::debug!("Opening database with driver '{}'", name);
        factory.open(url).await
    }

    /// The process-wide registry
    pub fn global() -> &'static Registry {
        static GLOBAL: OnceLock<Registry> = OnceLock::new();
        GLOBAL.get_or_init(Registry::new)
    }
}

/// Register `factory` under `name` in the process-wide registry.
pub fn register(name: &str, factory: Arc<dyn DriverFactory>) -> MigrateResult<()> {
    Registry::global().register(name, factory)
}

/// Open a driver from the process-wide registry.
pub async fn open(url: &str) -> MigrateResult<Box<dyn Driver>> {
    Registry::global().open(url).await
}

fn scheme_of(url: &str) -> MigrateResult<&str> {
    match url.split_once("://") {
        Some((scheme, _)) if !scheme.is_empty() => Ok(scheme),
        _ => Err(MigrateError::parse(
            url,
            "missing driver scheme (expected '<driver>://...')",
        )),
    }
}

#[cfg(test)]
#[path = "registry_test.rs"]
mod tests;
