//! Bluesound integration for hubkit
//!
//! Talks to BluOS players over their HTTP/XML API. Two long-polling
//! coordinators follow each player: one over `/Status` for playback, one
//! over `/SyncStatus` and `/Presets` for identity, grouping and presets.
//! Each player is exposed as a media player plus a volume number and a
//! mute switch.

pub mod api;
pub mod coordinator;
pub mod entity;
pub mod flow;
pub mod integration;

pub use api::{
    ApiFactory, BluesoundClient, Command, HttpApiFactory, PlayState, PlayerApi, Preset, Status,
    SyncStatus,
};
pub use coordinator::{OFFLINE_RETRY, StatusPoller, SyncData, SyncStatusPoller};
pub use entity::{BluesoundMediaPlayer, BluesoundMute, BluesoundVolume, Player};
pub use flow::BluesoundConfigFlow;
pub use integration::{BluesoundEntryData, BluesoundFactory, BluesoundIntegration, DOMAIN};

use hubkit_core::IntegrationRegistry;

/// Register the Bluesound integration
pub fn register(registry: &IntegrationRegistry) {
    registry.register(Box::new(BluesoundFactory::new()));
}
