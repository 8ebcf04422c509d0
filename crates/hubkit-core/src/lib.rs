// # hubkit-core
//
// Core library for the hubkit device integration host.
//
// ## Architecture Overview
//
// This library provides the building blocks shared by every integration:
// - **Coordinator**: Polls one device client and publishes snapshots
// - **Entity**: Typed view of one value, with capability traits for control
// - **ConfigFlow**: Form-based setup that ends in a config entry
// - **EntryStore**: Persistence for config entries
// - **Host**: Owns loaded entries (setup, retry, unload, service calls)
// - **IntegrationRegistry**: Plugin-based registry of integration factories
//
// ## Design Principles
//
// 1. **Explicit ownership**: every background task belongs to a config entry
//    and stops when that entry's cancellation token fires
// 2. **Classified failures**: errors are transient, fatal or cancelled, and
//    that class alone decides whether a loop retries
// 3. **Plugin-based**: integrations are registered at startup, no hard-coded
//    domain list in the host
// 4. **Library-first**: the daemon is a thin wrapper around this crate

pub mod config;
pub mod coordinator;
pub mod error;
pub mod flow;
pub mod host;
pub mod registry;
pub mod state;
pub mod traits;

// Re-export core types for convenience
pub use config::{CoordinatorConfig, EntryStoreConfig, HostConfig, HubConfig};
pub use coordinator::{Availability, Coordinator, CoordinatorExit, Publisher, RefreshOutcome, Snapshot, Subscription};
pub use error::{Error, FailureClass, Result};
pub use flow::{FlowManager, FlowStep};
pub use host::{EntryState, Host, HostEvent, IntegrationContext};
pub use registry::IntegrationRegistry;
pub use state::{FileEntryStore, MemoryEntryStore};
pub use traits::{
    ConfigEntry, ConfigFlow, DeviceClient, Entity, EntityValue, EntryStore, FlowResult,
    Integration, IntegrationFactory, Platform, Settable, Switchable,
};
