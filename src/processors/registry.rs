//! Processor Registry
//!
//! Process-wide mapping from lowercase processor name to a constructor that
//! builds the processor from a restaurant's `processor_config`. Lookup of an
//! unknown name fails fast; the worker records it as a terminal failure.

use std::collections::HashMap;

use super::{MockProcessor, Processor};

type ProcessorCtor =
    Box<dyn Fn(&serde_json::Value) -> Result<Box<dyn Processor>, RegistryError> + Send + Sync>;

/// Registry errors
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Unknown processor: {name}. Available processors: {available}")]
    UnknownProcessor { name: String, available: String },

    #[error("Invalid processor config for {name}: {reason}")]
    InvalidConfig { name: String, reason: String },
}

/// Name-keyed processor constructors
pub struct ProcessorRegistry {
    ctors: HashMap<String, ProcessorCtor>,
}

impl ProcessorRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self {
            ctors: HashMap::new(),
        }
    }

    /// Registry with the built-in processors registered
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("mock", |config| {
            let processor =
                MockProcessor::from_config(config).map_err(|reason| RegistryError::InvalidConfig {
                    name: "mock".to_string(),
                    reason,
                })?;
            Ok(Box::new(processor))
        });
        registry
    }

    /// Register a processor constructor. Later registrations under the same
    /// name replace earlier ones, which lets deployments override built-ins.
    pub fn register<F>(&mut self, name: &str, ctor: F)
    where
        F: Fn(&serde_json::Value) -> Result<Box<dyn Processor>, RegistryError>
            + Send
            + Sync
            + 'static,
    {
        let name = name.to_lowercase();
        tracing::info!(processor_name = %name, "processor registered");
        self.ctors.insert(name, Box::new(ctor));
    }

    /// Instantiate a processor by name from restaurant configuration.
    pub fn create(
        &self,
        name: &str,
        config: &serde_json::Value,
    ) -> Result<Box<dyn Processor>, RegistryError> {
        let key = name.to_lowercase();
        let ctor = self
            .ctors
            .get(&key)
            .ok_or_else(|| RegistryError::UnknownProcessor {
                name: name.to_string(),
                available: self.names().join(", "),
            })?;

        ctor(config)
    }

    /// Registered processor names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.ctors.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for ProcessorRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
