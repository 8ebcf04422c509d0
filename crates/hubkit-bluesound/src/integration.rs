//! Bluesound integration: entry data, factory and runtime

use crate::api::{ApiFactory, Command, DEFAULT_PORT, HttpApiFactory};
use crate::coordinator::{status_coordinator, sync_coordinator};
use crate::entity::{BluesoundMediaPlayer, BluesoundMute, BluesoundVolume, Player};
use crate::flow::BluesoundConfigFlow;
use async_trait::async_trait;
use hubkit_core::traits::{ConfigEntry, ConfigFlow, Entity, Integration, IntegrationFactory};
use hubkit_core::{CoordinatorExit, Error, IntegrationContext, Result};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tracing::{error, info};

/// Integration domain
pub const DOMAIN: &str = "bluesound";

pub const SERVICE_PLAY: &str = "play";
pub const SERVICE_PAUSE: &str = "pause";
pub const SERVICE_STOP: &str = "stop";
pub const SERVICE_NEXT_TRACK: &str = "next_track";
pub const SERVICE_PREVIOUS_TRACK: &str = "previous_track";
pub const SERVICE_PRESET: &str = "preset";

fn default_port() -> u16 {
    DEFAULT_PORT
}

/// Data of a Bluesound config entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BluesoundEntryData {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl BluesoundEntryData {
    /// Unique id of the player with MAC address `mac`
    pub fn unique_id(&self, mac: &str) -> String {
        format!("{}-{}", mac, self.port)
    }
}

#[derive(Debug, Deserialize)]
struct PresetArgs {
    id: u32,
}

/// Factory for Bluesound entries
pub struct BluesoundFactory {
    apis: Arc<dyn ApiFactory>,
}

impl BluesoundFactory {
    /// Factory talking HTTP to real players
    pub fn new() -> Self {
        Self::with_api_factory(Arc::new(HttpApiFactory))
    }

    /// Factory using a custom API factory
    pub fn with_api_factory(apis: Arc<dyn ApiFactory>) -> Self {
        Self { apis }
    }
}

impl Default for BluesoundFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl IntegrationFactory for BluesoundFactory {
    fn domain(&self) -> &'static str {
        DOMAIN
    }

    fn create(&self, entry: &ConfigEntry) -> Result<Box<dyn Integration>> {
        let data: BluesoundEntryData = entry.parse_data()?;
        if data.host.trim().is_empty() {
            return Err(Error::config("Bluesound entry has an empty host"));
        }
        Ok(Box::new(BluesoundIntegration {
            title: entry.title.clone(),
            unique_id: entry.unique_id.clone(),
            data,
            apis: Arc::clone(&self.apis),
            player: Mutex::new(None),
        }))
    }

    fn config_flow(&self) -> Box<dyn ConfigFlow> {
        Box::new(BluesoundConfigFlow::new(Arc::clone(&self.apis)))
    }
}

/// One loaded player
pub struct BluesoundIntegration {
    title: String,
    unique_id: Option<String>,
    data: BluesoundEntryData,
    apis: Arc<dyn ApiFactory>,
    player: Mutex<Option<Player>>,
}

impl BluesoundIntegration {
    fn player(&self) -> Result<Player> {
        self.player
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or_else(|| Error::transient(format!("[{}] Player is not set up", self.title)))
    }
}

fn log_exit(name: &str, exit: CoordinatorExit) -> Result<()> {
    match exit {
        CoordinatorExit::Cancelled => Ok(()),
        CoordinatorExit::Fatal(msg) => {
            error!("[{}] Polling stopped: {}", name, msg);
            Err(Error::fatal(msg))
        }
    }
}

#[async_trait]
impl Integration for BluesoundIntegration {
    async fn setup(&self, ctx: &IntegrationContext) -> Result<Vec<Arc<dyn Entity>>> {
        let api = self.apis.create(&self.data.host, self.data.port)?;

        let sync = Arc::new(sync_coordinator(Arc::clone(&api)));
        sync.first_refresh().await?;
        let status = Arc::new(status_coordinator(Arc::clone(&api)));
        status.first_refresh().await?;

        let sync_status = sync
            .data()
            .map(|d| d.sync_status)
            .ok_or_else(|| Error::transient("No sync status after first refresh"))?;
        let base_id = self
            .unique_id
            .clone()
            .unwrap_or_else(|| self.data.unique_id(&sync_status.mac));

        let player = Player {
            name: sync_status.name.clone(),
            api,
            status: Arc::clone(&status),
            sync: Arc::clone(&sync),
        };
        *self.player.lock().unwrap_or_else(|e| e.into_inner()) = Some(player.clone());

        let token = ctx.token().clone();
        let name = player.name.clone();
        ctx.spawn("status", async move { log_exit(&name, status.run(token).await) });

        let token = ctx.token().clone();
        let name = player.name.clone();
        ctx.spawn("sync_status", async move { log_exit(&name, sync.run(token).await) });

        info!(
            "[{}] Player {} ({}) ready",
            self.title,
            sync_status.name,
            sync_status.model_name.as_deref().unwrap_or("unknown model")
        );

        Ok(vec![
            Arc::new(BluesoundMediaPlayer::new(base_id.clone(), player.clone())),
            Arc::new(BluesoundVolume::new(format!("{}-volume", base_id), player.clone())),
            Arc::new(BluesoundMute::new(format!("{}-mute", base_id), player)),
        ])
    }

    async fn unload(&self) -> Result<()> {
        self.player.lock().unwrap_or_else(|e| e.into_inner()).take();
        Ok(())
    }

    async fn call_service(&self, service: &str, data: &serde_json::Value) -> Result<()> {
        let command = match service {
            SERVICE_PLAY => Command::Play,
            SERVICE_PAUSE => Command::Pause,
            SERVICE_STOP => Command::Stop,
            SERVICE_NEXT_TRACK => Command::Next,
            SERVICE_PREVIOUS_TRACK => Command::Previous,
            SERVICE_PRESET => {
                let args: PresetArgs = serde_json::from_value(data.clone())
                    .map_err(|e| Error::invalid_input(format!("Invalid preset data: {}", e)))?;
                Command::Preset(args.id)
            }
            other => return Err(Error::not_found(format!("Unknown service: {}", other))),
        };

        let player = self.player()?;
        if let Command::Preset(id) = command {
            let known = player
                .sync
                .data()
                .is_none_or(|d| d.presets.iter().any(|p| p.id == id));
            if !known {
                return Err(Error::invalid_input(format!("Unknown preset: {}", id)));
            }
        }
        player.api.command(command).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_entry_data() {
        let data: BluesoundEntryData = serde_json::from_value(json!({"host": "10.0.0.2"})).unwrap();
        assert_eq!(data.port, 11000);
        assert_eq!(data.unique_id("90:56:82:9F:AA:01"), "90:56:82:9F:AA:01-11000");
    }

    #[test]
    fn test_create_rejects_empty_host() {
        let entry = ConfigEntry::new(DOMAIN, "Kitchen", json!({"host": " "}));
        assert!(BluesoundFactory::new().create(&entry).is_err());

        let entry = ConfigEntry::new(DOMAIN, "Kitchen", json!({"port": 11000}));
        assert!(BluesoundFactory::new().create(&entry).is_err());
    }
}
