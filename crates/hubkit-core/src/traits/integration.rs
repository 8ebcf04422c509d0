// # Integration Trait
//
// Defines the contract between the host and one loaded config entry.
//
// ## Lifecycle
//
// ```text
// IntegrationFactory::create(entry) -> Integration
//        │
//        ▼
// Integration::setup(ctx)   : connect, build coordinators, spawn tasks via ctx
//        │                    returns the entities to expose
//        ▼
// (running: coordinators poll, entities read snapshots, services relay commands)
//        │
//        ▼
// ctx token cancelled -> Integration::unload() -> host joins ctx tasks
// ```

use async_trait::async_trait;
use std::sync::Arc;

use super::config_flow::ConfigFlow;
use super::entity::Entity;
use super::entry_store::ConfigEntry;
use crate::host::IntegrationContext;

/// One running instance of an integration, bound to a config entry
///
/// # Task Ownership
///
/// Background work (poll loops, notification pumps, monitors) MUST be
/// started with [`IntegrationContext::spawn`] and MUST stop when
/// [`IntegrationContext::token`] is cancelled. The host relies on this to
/// unload entries deterministically.
#[async_trait]
pub trait Integration: Send + Sync {
    /// Connect to the device and build entities
    ///
    /// # Errors
    ///
    /// A transient error (device offline) makes the host retry setup later;
    /// any other error leaves the entry in the setup-error state.
    async fn setup(&self, ctx: &IntegrationContext) -> Result<Vec<Arc<dyn Entity>>, crate::Error>;

    /// Release device resources
    ///
    /// Called after the context token was cancelled and before the host
    /// waits for the entry's tasks.
    async fn unload(&self) -> Result<(), crate::Error> {
        Ok(())
    }

    /// Handle a domain service call (e.g. `write_data_by_name`)
    async fn call_service(
        &self,
        service: &str,
        _data: &serde_json::Value,
    ) -> Result<(), crate::Error> {
        Err(crate::Error::not_found(format!("Unknown service: {}", service)))
    }
}

/// Factory for integration instances and their config flows
pub trait IntegrationFactory: Send + Sync {
    /// Domain this factory handles (e.g. "ads")
    fn domain(&self) -> &'static str;

    /// Create an integration instance for a config entry
    fn create(&self, entry: &ConfigEntry) -> Result<Box<dyn Integration>, crate::Error>;

    /// Create a new config flow for this domain
    fn config_flow(&self) -> Box<dyn ConfigFlow>;
}
