//! ADS integration for hubkit
//!
//! Connects to Beckhoff TwinCAT PLCs over AMS/TCP. PLC variables are exposed
//! as sensors, binary sensors, switches, lights and valves whose values
//! arrive as on-change device notifications. Entities are listed in the
//! config entry or discovered from the PLC symbol table through struct
//! templates. A connection monitor follows the PLC through STOP and program
//! downloads.
//!
//! ## Layers
//!
//! - [`types`] / [`codec`] / [`convert`]: PLC datatypes and their binary layout
//! - [`ams`]: AMS/TCP framing
//! - [`client`]: the [`AdsConnection`] trait and [`AmsTcpClient`]
//! - [`hub`]: notification registry and dispatch
//! - [`monitor`]: PLC state supervision
//! - [`discovery`]: struct templates matched against the symbol table
//! - [`entity`], [`flow`], [`integration`]: the hubkit glue

pub mod ams;
pub mod client;
pub mod codec;
pub mod convert;
pub mod discovery;
pub mod entity;
pub mod flow;
pub mod hub;
pub mod integration;
pub mod monitor;
pub mod types;

pub use ams::{AdsSymbol, AmsNetId, RawNotification};
pub use client::{AdsConnection, AdsParams, AmsTcpClient, Connector, TcpConnector};
pub use codec::{decode, decode_tagged, encode};
pub use convert::convert_value;
pub use discovery::{AdsTemplate, discover_entities};
pub use entity::{AdsBinarySensor, AdsEntityConfig, AdsLight, AdsSensor, AdsSwitch, AdsValve};
pub use flow::AdsConfigFlow;
pub use hub::AdsHub;
pub use integration::{AdsEntryData, AdsFactory, AdsIntegration, DOMAIN, SERVICE_WRITE_DATA_BY_NAME};
pub use types::{AdsState, AdsType, AdsValue};

use hubkit_core::IntegrationRegistry;

/// Register the ADS integration
pub fn register(registry: &IntegrationRegistry) {
    registry.register(Box::new(AdsFactory::new()));
}
