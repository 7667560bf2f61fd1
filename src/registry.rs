//! A host owned table of tile provider constructors.
//!
//! Nothing registers itself: the host creates a [`ProviderRegistry`] during
//! bootstrap, hands it to each provider crate's `register` function, and later
//! constructs providers by name from its own configuration.

use std::collections::HashMap;

use crate::error::{ConfigError, RegistryError};
use crate::TileProvider;

/// Builds a provider from its section of the host configuration.
pub type ProviderConstructor = fn(&serde_yaml::Value) -> Result<Box<dyn TileProvider>, ConfigError>;

#[derive(Default)]
pub struct ProviderRegistry {
    constructors: HashMap<String, ProviderConstructor>,
}

impl ProviderRegistry {
    pub fn new() -> ProviderRegistry {
        ProviderRegistry::default()
    }

    /// Registers a constructor, returning the one it replaced, if any.
    pub fn register(
        &mut self,
        name: &str,
        constructor: ProviderConstructor,
    ) -> Option<ProviderConstructor> {
        let replaced = self.constructors.insert(name.to_owned(), constructor);
        if replaced.is_some() {
            tracing::warn!(provider = name, "Replacing an already registered provider");
        }
        replaced
    }

    pub fn names(&self) -> Vec<&str> {
        self.constructors.keys().map(String::as_str).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    /// Constructs the provider registered under `name`.
    pub fn construct(
        &self,
        name: &str,
        config: &serde_yaml::Value,
    ) -> Result<Box<dyn TileProvider>, RegistryError> {
        let constructor = self
            .constructors
            .get(name)
            .ok_or_else(|| RegistryError::UnknownProvider(name.to_owned()))?;

        Ok(constructor(config)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_construct() {
        let mut registry = ProviderRegistry::new();
        assert!(registry.names().is_empty());

        assert!(crate::register(&mut registry).is_none());
        assert_eq!(vec![crate::PROVIDER_NAME], registry.names());
        assert!(registry.contains("elasticsearch"));

        let config: serde_yaml::Value =
            serde_yaml::from_str("host: localhost\nlayers:\n  - name: jobs\n").unwrap();
        let provider = registry.construct("elasticsearch", &config).unwrap();
        assert_eq!(vec!["jobs"], provider.layer_names());
    }

    #[test]
    fn test_unknown_provider() {
        let registry = ProviderRegistry::new();
        let config = serde_yaml::Value::Null;

        assert!(matches!(
            registry.construct("postgis", &config),
            Err(RegistryError::UnknownProvider(name)) if name == "postgis"
        ));
    }

    #[test]
    fn test_configuration_errors_are_fatal() {
        let mut registry = ProviderRegistry::new();
        crate::register(&mut registry);

        let config: serde_yaml::Value =
            serde_yaml::from_str("layers:\n  - name: jobs\n  - name: jobs\n").unwrap();
        assert!(matches!(
            registry.construct("elasticsearch", &config),
            Err(RegistryError::Config(ConfigError::DuplicateLayer { .. }))
        ));
    }

    #[test]
    fn test_re_registering_replaces() {
        let mut registry = ProviderRegistry::new();
        crate::register(&mut registry);
        assert!(crate::register(&mut registry).is_some());
        assert_eq!(1, registry.names().len());
    }
}
