//! In-memory BluOS player for Bluesound contract tests

#![allow(dead_code)]

use async_trait::async_trait;
use hubkit_bluesound::{
    ApiFactory, BluesoundFactory, Command, PlayerApi, Preset, Status, SyncStatus,
};
use hubkit_core::{Error, HubConfig, IntegrationRegistry, Result};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

pub const MAC: &str = "90:56:82:9F:AA:01";

/// Player answering long polls like the real thing
///
/// Every change bumps a version that doubles as the etag. A poll carrying
/// the current etag blocks until the next change or 120 s.
pub struct MockPlayer {
    status: Mutex<Status>,
    sync_status: Mutex<SyncStatus>,
    presets: Mutex<Vec<Preset>>,
    version: watch::Sender<u64>,
    commands: Mutex<Vec<Command>>,
    reachable: AtomicBool,
    polls: AtomicUsize,
}

impl MockPlayer {
    pub fn new() -> Arc<Self> {
        let (version, _) = watch::channel(1);
        Arc::new(Self {
            status: Mutex::new(Status {
                etag: "1".to_string(),
                state: "play".to_string(),
                volume: 30,
                mute: 0,
                name: Some("So What".to_string()),
                artist: Some("Miles Davis".to_string()),
                album: Some("Kind of Blue".to_string()),
                title1: None,
                image: None,
                service: Some("Tidal".to_string()),
                secs: Some(42),
                totlen: Some(545),
            }),
            sync_status: Mutex::new(SyncStatus {
                etag: "1".to_string(),
                id: "10.0.0.2:11000".to_string(),
                mac: MAC.to_string(),
                name: "Kitchen".to_string(),
                brand: Some("Bluesound".to_string()),
                model_name: Some("NODE 2i".to_string()),
                volume: 30,
                group: None,
                master: None,
                followers: Vec::new(),
            }),
            presets: Mutex::new(vec![
                Preset {
                    id: 1,
                    name: "Radio Paradise".to_string(),
                    url: "RadioParadise:/0:4".to_string(),
                    image: None,
                },
                Preset {
                    id: 2,
                    name: "Jazz".to_string(),
                    url: "Tidal:playlist/1".to_string(),
                    image: None,
                },
            ]),
            version,
            commands: Mutex::new(Vec::new()),
            reachable: AtomicBool::new(true),
            polls: AtomicUsize::new(0),
        })
    }

    /// Change the playback status as the user would on the player
    pub fn update_status(&self, f: impl FnOnce(&mut Status)) {
        let etag = self.bump();
        let mut status = self.status.lock().unwrap();
        f(&mut status);
        status.etag = etag;
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
        // Wake pending long polls so they notice
        self.bump();
    }

    pub fn commands(&self) -> Vec<Command> {
        self.commands.lock().unwrap().clone()
    }

    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    fn bump(&self) -> String {
        self.version.send_modify(|v| *v += 1);
        self.version.borrow().to_string()
    }

    fn check_reachable(&self) -> Result<()> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::transient("player unreachable: connection refused"))
        }
    }

    async fn long_poll(&self, etag: Option<&str>, current: impl Fn() -> String) -> Result<()> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        let mut rx = self.version.subscribe();
        self.check_reachable()?;
        if etag.is_some_and(|e| e == current()) {
            let _ = tokio::time::timeout(Duration::from_secs(120), rx.changed()).await;
        }
        self.check_reachable()
    }
}

#[async_trait]
impl PlayerApi for MockPlayer {
    fn address(&self) -> String {
        "10.0.0.2:11000".to_string()
    }

    async fn sync_status(&self, etag: Option<&str>) -> Result<SyncStatus> {
        self.long_poll(etag, || self.sync_status.lock().unwrap().etag.clone())
            .await?;
        Ok(self.sync_status.lock().unwrap().clone())
    }

    async fn status(&self, etag: Option<&str>) -> Result<Status> {
        self.long_poll(etag, || self.status.lock().unwrap().etag.clone())
            .await?;
        Ok(self.status.lock().unwrap().clone())
    }

    async fn presets(&self) -> Result<Vec<Preset>> {
        self.check_reachable()?;
        Ok(self.presets.lock().unwrap().clone())
    }

    async fn command(&self, command: Command) -> Result<()> {
        self.check_reachable()?;
        self.commands.lock().unwrap().push(command);
        let state = match command {
            Command::Pause => "pause",
            Command::Stop => "stop",
            _ => "play",
        };
        self.update_status(|s| s.state = state.to_string());
        Ok(())
    }

    async fn set_volume(&self, level: u8) -> Result<()> {
        self.check_reachable()?;
        self.update_status(|s| s.volume = i32::from(level));
        Ok(())
    }

    async fn set_mute(&self, mute: bool) -> Result<()> {
        self.check_reachable()?;
        self.update_status(|s| s.mute = i32::from(mute));
        Ok(())
    }
}

/// Factory handing out one shared [`MockPlayer`]
pub struct MockApiFactory {
    pub player: Arc<MockPlayer>,
    creates: AtomicUsize,
}

impl MockApiFactory {
    pub fn new(player: Arc<MockPlayer>) -> Arc<Self> {
        Arc::new(Self {
            player,
            creates: AtomicUsize::new(0),
        })
    }

    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }
}

impl ApiFactory for MockApiFactory {
    fn create(&self, _host: &str, _port: u16) -> Result<Arc<dyn PlayerApi>> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::clone(&self.player) as Arc<dyn PlayerApi>)
    }
}

/// Registry with the Bluesound integration using `apis`
pub fn bluesound_registry(apis: Arc<MockApiFactory>) -> Arc<IntegrationRegistry> {
    let registry = IntegrationRegistry::new();
    registry.register(Box::new(BluesoundFactory::with_api_factory(apis)));
    Arc::new(registry)
}

pub fn test_config() -> HubConfig {
    let mut config = HubConfig::new();
    config.host.setup_retry_secs = 30;
    config.host.unload_timeout_secs = 5;
    config
}
