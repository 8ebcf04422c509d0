//! Player entities: media player, volume and mute

use crate::api::{PlayerApi, Status};
use crate::coordinator::{StatusPoller, SyncStatusPoller};
use async_trait::async_trait;
use hubkit_core::traits::{Entity, EntityValue, Platform, Settable, Switchable, check_range};
use hubkit_core::{Coordinator, Result};
use serde_json::json;
use std::sync::Arc;

/// Shared handles of one player
#[derive(Clone)]
pub struct Player {
    pub name: String,
    pub api: Arc<dyn PlayerApi>,
    pub status: Arc<Coordinator<StatusPoller>>,
    pub sync: Arc<Coordinator<SyncStatusPoller>>,
}

impl Player {
    fn available(&self) -> bool {
        self.status.is_online() && self.sync.is_online()
    }

    fn current(&self) -> Option<Status> {
        self.status.data()
    }
}

/// The player itself
pub struct BluesoundMediaPlayer {
    unique_id: String,
    player: Player,
}

impl BluesoundMediaPlayer {
    pub fn new(unique_id: String, player: Player) -> Self {
        Self { unique_id, player }
    }
}

impl Entity for BluesoundMediaPlayer {
    fn unique_id(&self) -> &str {
        &self.unique_id
    }

    fn name(&self) -> &str {
        &self.player.name
    }

    fn platform(&self) -> Platform {
        Platform::MediaPlayer
    }

    fn available(&self) -> bool {
        self.player.available()
    }

    fn value(&self) -> EntityValue {
        match self.player.current() {
            Some(status) => EntityValue::Text(status.play_state().as_str().to_string()),
            None => EntityValue::Unknown,
        }
    }

    fn attributes(&self) -> serde_json::Value {
        let status = self.player.current();
        let sync = self.player.sync.data();

        let presets: Vec<_> = sync
            .as_ref()
            .map(|d| {
                d.presets
                    .iter()
                    .map(|p| json!({"id": p.id, "name": p.name}))
                    .collect()
            })
            .unwrap_or_default();

        json!({
            "media_title": status.as_ref().and_then(|s| s.title()),
            "media_artist": status.as_ref().and_then(|s| s.artist.as_deref()),
            "media_album_name": status.as_ref().and_then(|s| s.album.as_deref()),
            "media_image_url": status.as_ref().and_then(|s| s.image.as_deref()),
            "media_position": status.as_ref().and_then(|s| s.secs),
            "media_duration": status.as_ref().and_then(|s| s.totlen),
            "source": status.as_ref().and_then(|s| s.service.as_deref()),
            "presets": presets,
            "group_leader": sync.as_ref().and_then(|d| d.sync_status.master.as_ref().map(|m| m.ip.clone())),
            "group_members": sync
                .as_ref()
                .map(|d| d.sync_status.followers.iter().map(|f| f.ip.clone()).collect::<Vec<_>>())
                .unwrap_or_default(),
        })
    }
}

/// Player volume in percent
pub struct BluesoundVolume {
    unique_id: String,
    name: String,
    player: Player,
}

impl BluesoundVolume {
    pub fn new(unique_id: String, player: Player) -> Self {
        Self {
            unique_id,
            name: format!("{} volume", player.name),
            player,
        }
    }
}

impl Entity for BluesoundVolume {
    fn unique_id(&self) -> &str {
        &self.unique_id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn platform(&self) -> Platform {
        Platform::Number
    }

    fn available(&self) -> bool {
        self.player.available()
    }

    fn value(&self) -> EntityValue {
        match self.player.current().and_then(|s| s.volume_level()) {
            Some(level) => EntityValue::Int(level as i64),
            None => EntityValue::Unknown,
        }
    }

    fn as_settable(&self) -> Option<&dyn Settable> {
        Some(self)
    }
}

#[async_trait]
impl Settable for BluesoundVolume {
    async fn set_value(&self, value: f64) -> Result<()> {
        check_range(self, value)?;
        self.player.api.set_volume(value.round() as u8).await
    }
}

/// Mute switch
pub struct BluesoundMute {
    unique_id: String,
    name: String,
    player: Player,
}

impl BluesoundMute {
    pub fn new(unique_id: String, player: Player) -> Self {
        Self {
            unique_id,
            name: format!("{} mute", player.name),
            player,
        }
    }
}

impl Entity for BluesoundMute {
    fn unique_id(&self) -> &str {
        &self.unique_id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn platform(&self) -> Platform {
        Platform::Switch
    }

    fn available(&self) -> bool {
        self.player.available()
    }

    fn value(&self) -> EntityValue {
        match self.player.current() {
            Some(status) => EntityValue::Bool(status.is_muted()),
            None => EntityValue::Unknown,
        }
    }

    fn as_switchable(&self) -> Option<&dyn Switchable> {
        Some(self)
    }
}

#[async_trait]
impl Switchable for BluesoundMute {
    async fn turn_on(&self) -> Result<()> {
        self.player.api.set_mute(true).await
    }

    async fn turn_off(&self) -> Result<()> {
        self.player.api.set_mute(false).await
    }
}
