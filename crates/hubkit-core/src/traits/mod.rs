//! Core traits for hubkit
//!
//! This module defines the abstract interfaces that integrations implement.
//!
//! - [`DeviceClient`]: Fetch device state for a coordinator
//! - [`Entity`], [`Switchable`], [`Settable`]: Typed views exposed to the host
//! - [`Integration`], [`IntegrationFactory`]: Per-entry lifecycle
//! - [`ConfigFlow`]: Form-based setup
//! - [`EntryStore`]: Config entry persistence

pub mod config_flow;
pub mod device_client;
pub mod entity;
pub mod entry_store;
pub mod integration;

pub use config_flow::{ConfigFlow, FieldKind, FlowResult, FormField, apply_defaults};
pub use device_client::DeviceClient;
pub use entity::{Entity, EntityState, EntityValue, Platform, Settable, Switchable, check_range};
pub use entry_store::{ConfigEntry, EntryStore};
pub use integration::{Integration, IntegrationFactory};
