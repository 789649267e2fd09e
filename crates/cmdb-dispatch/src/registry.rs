//! Collector registry: explicit name-to-factory wiring.
//!
//! Every collector is registered once at startup with a factory closure, so
//! the wiring is type-checked at compile time and a construction failure
//! surfaces as a typed error instead of taking the process down. One bad
//! registration never prevents the registry from serving the others.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use crate::collector::Collector;

type Factory = Arc<dyn Fn() -> Result<Arc<dyn Collector>, RegistryError> + Send + Sync>;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("no collector registered under '{0}'")]
    NotRegistered(String),
    #[error("collector '{name}' could not be constructed: {reason}")]
    Construction { name: String, reason: String },
}

/// Name and schedulability of one registry entry, for operator listings.
#[derive(Debug, Clone)]
pub struct JobDescriptor {
    pub name: String,
}

/// Maps collector names to factories producing runnable instances.
#[derive(Default)]
pub struct Registry {
    factories: HashMap<String, Factory>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under `name`, replacing any previous entry.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Result<Arc<dyn Collector>, RegistryError> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    /// Register an already-constructed collector under `name`.
    pub fn register_shared(&mut self, name: impl Into<String>, collector: Arc<dyn Collector>) {
        self.register(name, move || Ok(Arc::clone(&collector)));
    }

    /// Produce a runnable instance for `name`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotRegistered`] for unknown names, or the
    /// factory's own [`RegistryError::Construction`] when the collector
    /// cannot be built.
    pub fn get(&self, name: &str) -> Result<Arc<dyn Collector>, RegistryError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| RegistryError::NotRegistered(name.to_string()))?;
        factory()
    }

    #[must_use]
    pub fn is_registered(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// All registered entries, sorted by name.
    #[must_use]
    pub fn list(&self) -> Vec<JobDescriptor> {
        let mut names: Vec<&String> = self.factories.keys().collect();
        names.sort();
        names
            .into_iter()
            .map(|name| JobDescriptor { name: name.clone() })
            .collect()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("collectors", &self.factories.len())
            .finish_non_exhaustive()
    }
}
