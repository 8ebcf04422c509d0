//! Plugin-based integration registry
//!
//! The registry maps an integration domain (e.g. "ads", "bluesound") to the
//! factory that builds its runtime instances and config flows, so the host
//! never needs a hardcoded list of integrations.
//!
//! ## Registration
//!
//! Integration crates expose a `register` function:
//!
//! ```rust,ignore
//! // In hubkit-bluesound
//! pub fn register(registry: &IntegrationRegistry) {
//!     registry.register(Box::new(BluesoundFactory));
//! }
//! ```

use crate::error::{Error, Result};
use crate::traits::{ConfigEntry, ConfigFlow, Integration, IntegrationFactory};
use std::collections::HashMap;
use std::sync::RwLock;

/// Registry of integration factories keyed by domain
///
/// ## Thread Safety
///
/// The registry uses interior mutability with RwLock, allowing concurrent
/// reads and exclusive writes. A poisoned lock is recovered since the map
/// is only ever replaced entry by entry.
#[derive(Default)]
pub struct IntegrationRegistry {
    factories: RwLock<HashMap<&'static str, Box<dyn IntegrationFactory>>>,
}

impl IntegrationRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an integration factory under its domain
    ///
    /// Registering the same domain twice replaces the earlier factory.
    pub fn register(&self, factory: Box<dyn IntegrationFactory>) {
        let domain = factory.domain();
        let mut factories = self.factories.write().unwrap_or_else(|e| e.into_inner());
        if factories.insert(domain, factory).is_some() {
            tracing::warn!("Integration {} registered twice; keeping the latest", domain);
        }
    }

    /// Create an integration instance for a config entry
    ///
    /// # Errors
    ///
    /// `Error::Config` if no factory is registered for the entry's domain,
    /// or whatever the factory returns for invalid entry data.
    pub fn create(&self, entry: &ConfigEntry) -> Result<Box<dyn Integration>> {
        let factories = self.factories.read().unwrap_or_else(|e| e.into_inner());
        let factory = factories
            .get(entry.domain.as_str())
            .ok_or_else(|| Error::config(format!("Unknown integration: {}", entry.domain)))?;
        factory.create(entry)
    }

    /// Start a new config flow for a domain
    pub fn config_flow(&self, domain: &str) -> Result<Box<dyn ConfigFlow>> {
        let factories = self.factories.read().unwrap_or_else(|e| e.into_inner());
        factories
            .get(domain)
            .map(|factory| factory.config_flow())
            .ok_or_else(|| Error::config(format!("Unknown integration: {}", domain)))
    }

    /// List all registered domains, sorted
    pub fn list_domains(&self) -> Vec<&'static str> {
        let factories = self.factories.read().unwrap_or_else(|e| e.into_inner());
        let mut domains: Vec<&'static str> = factories.keys().copied().collect();
        domains.sort_unstable();
        domains
    }

    /// Check if a domain is registered
    pub fn has_domain(&self, domain: &str) -> bool {
        let factories = self.factories.read().unwrap_or_else(|e| e.into_inner());
        factories.contains_key(domain)
    }
}

impl std::fmt::Debug for IntegrationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntegrationRegistry")
            .field("domains", &self.list_domains())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::FlowResult;
    use async_trait::async_trait;

    struct NullFlow;

    #[async_trait]
    impl ConfigFlow for NullFlow {
        async fn step(
            &mut self,
            _step_id: &str,
            _input: Option<serde_json::Value>,
        ) -> Result<FlowResult> {
            Ok(FlowResult::abort("not_supported"))
        }
    }

    struct MockFactory;

    impl IntegrationFactory for MockFactory {
        fn domain(&self) -> &'static str {
            "mock"
        }

        fn create(&self, _entry: &ConfigEntry) -> Result<Box<dyn Integration>> {
            Err(Error::not_found("Mock integration not implemented"))
        }

        fn config_flow(&self) -> Box<dyn ConfigFlow> {
            Box::new(NullFlow)
        }
    }

    #[test]
    fn test_registry_registration() {
        let registry = IntegrationRegistry::new();
        assert!(!registry.has_domain("mock"));

        registry.register(Box::new(MockFactory));

        assert!(registry.has_domain("mock"));
        assert_eq!(registry.list_domains(), vec!["mock"]);
        assert!(registry.config_flow("mock").is_ok());
    }

    #[test]
    fn test_unknown_domain() {
        let registry = IntegrationRegistry::new();
        let entry = ConfigEntry::new("nope", "Nope", serde_json::json!({}));
        assert!(matches!(registry.create(&entry), Err(Error::Config(_))));
        assert!(registry.config_flow("nope").is_err());
    }
}
