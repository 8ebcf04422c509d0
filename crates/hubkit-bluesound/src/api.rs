//! BluOS HTTP API
//!
//! Players answer plain `GET` requests on port 11000 with small XML
//! documents. `/Status` and `/SyncStatus` support long polling: passing the
//! `etag` of the previous answer blocks until something changes or the
//! `timeout` expires.
//!
//! ## Endpoints
//!
//! | Path                          | Answer        |
//! |-------------------------------|---------------|
//! | `/SyncStatus`                 | `<SyncStatus>`|
//! | `/Status`                     | `<status>`    |
//! | `/Presets`                    | `<presets>`   |
//! | `/Play`, `/Pause`, `/Stop`    | `<state>`     |
//! | `/Skip`, `/Back`              | `<id>`        |
//! | `/Preset?id=N`                | `<loaded>`    |
//! | `/Volume?level=N`, `?mute=0/1`| `<volume>`    |

use async_trait::async_trait;
use hubkit_core::{Error, Result};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// Default BluOS port
pub const DEFAULT_PORT: u16 = 11000;

/// Seconds a long poll may block on the player
pub const LONG_POLL_TIMEOUT_SECS: u64 = 120;

/// HTTP timeout for long polls (slightly above the player's own timeout)
const LONG_POLL_HTTP_TIMEOUT: Duration = Duration::from_secs(LONG_POLL_TIMEOUT_SECS + 5);

/// HTTP timeout for everything else
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Player identity and grouping, from `/SyncStatus`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SyncStatus {
    #[serde(rename = "@etag", default)]
    pub etag: String,
    #[serde(rename = "@id", default)]
    pub id: String,
    #[serde(rename = "@mac")]
    pub mac: String,
    #[serde(rename = "@name")]
    pub name: String,
    #[serde(rename = "@brand", default)]
    pub brand: Option<String>,
    #[serde(rename = "@modelName", default)]
    pub model_name: Option<String>,
    #[serde(rename = "@volume", default)]
    pub volume: i32,
    #[serde(rename = "@group", default)]
    pub group: Option<String>,
    /// Group leader, when this player is grouped
    #[serde(default)]
    pub master: Option<Leader>,
    /// Grouped players, when this player leads a group
    #[serde(rename = "slave", default)]
    pub followers: Vec<Follower>,
}

/// `<master port="11000">10.0.0.2</master>`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Leader {
    #[serde(rename = "$text")]
    pub ip: String,
    #[serde(rename = "@port", default = "default_port")]
    pub port: u16,
}

/// `<slave id="10.0.0.3" port="11000"/>`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Follower {
    #[serde(rename = "@id")]
    pub ip: String,
    #[serde(rename = "@port", default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

/// Playback state, from `/Status`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Status {
    #[serde(rename = "@etag", default)]
    pub etag: String,
    #[serde(default)]
    pub state: String,
    /// 0..=100, or -1 for fixed volume outputs
    #[serde(default)]
    pub volume: i32,
    #[serde(default)]
    pub mute: i32,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub artist: Option<String>,
    #[serde(default)]
    pub album: Option<String>,
    #[serde(default)]
    pub title1: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub service: Option<String>,
    #[serde(default)]
    pub secs: Option<u64>,
    #[serde(default)]
    pub totlen: Option<u64>,
}

/// Normalised playback state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayState {
    Playing,
    Paused,
    Idle,
    Buffering,
    Unknown,
}

impl PlayState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlayState::Playing => "playing",
            PlayState::Paused => "paused",
            PlayState::Idle => "idle",
            PlayState::Buffering => "buffering",
            PlayState::Unknown => "unknown",
        }
    }
}

impl Status {
    /// Playback state as reported by `<state>`
    pub fn play_state(&self) -> PlayState {
        match self.state.as_str() {
            "play" | "stream" => PlayState::Playing,
            "pause" => PlayState::Paused,
            "stop" => PlayState::Idle,
            "connecting" => PlayState::Buffering,
            _ => PlayState::Unknown,
        }
    }

    pub fn is_muted(&self) -> bool {
        self.mute != 0
    }

    /// Volume in percent, `None` for fixed volume outputs
    pub fn volume_level(&self) -> Option<u8> {
        u8::try_from(self.volume).ok().filter(|v| *v <= 100)
    }

    /// Track title (`<title1>` for streams, `<name>` otherwise)
    pub fn title(&self) -> Option<&str> {
        self.title1.as_deref().or(self.name.as_deref())
    }
}

/// One stored preset
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Preset {
    #[serde(rename = "@id")]
    pub id: u32,
    #[serde(rename = "@name")]
    pub name: String,
    #[serde(rename = "@url", default)]
    pub url: String,
    #[serde(rename = "@image", default)]
    pub image: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PresetList {
    #[serde(rename = "preset", default)]
    presets: Vec<Preset>,
}

/// Parse a BluOS XML document
pub fn parse_xml<T: DeserializeOwned>(what: &str, xml: &str) -> Result<T> {
    quick_xml::de::from_str(xml)
        .map_err(|e| Error::decode(format!("Failed to parse {} XML: {}", what, e)))
}

/// Parse a `/Presets` answer
pub fn parse_presets(xml: &str) -> Result<Vec<Preset>> {
    let list: PresetList = parse_xml("presets", xml)?;
    Ok(list.presets)
}

/// Transport commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Play,
    Pause,
    Stop,
    Next,
    Previous,
    Preset(u32),
}

impl Command {
    /// Request path of the command
    pub fn path(&self) -> String {
        match self {
            Command::Play => "/Play".to_string(),
            Command::Pause => "/Pause".to_string(),
            Command::Stop => "/Stop".to_string(),
            Command::Next => "/Skip".to_string(),
            Command::Previous => "/Back".to_string(),
            Command::Preset(id) => format!("/Preset?id={}", id),
        }
    }
}

/// Operations on one player
#[async_trait]
pub trait PlayerApi: Send + Sync {
    /// Host and port, for log lines
    fn address(&self) -> String;

    /// `/SyncStatus`, long polling when `etag` is given
    async fn sync_status(&self, etag: Option<&str>) -> Result<SyncStatus>;

    /// `/Status`, long polling when `etag` is given
    async fn status(&self, etag: Option<&str>) -> Result<Status>;

    /// `/Presets`
    async fn presets(&self) -> Result<Vec<Preset>>;

    /// Send a transport command
    async fn command(&self, command: Command) -> Result<()>;

    /// Set the volume in percent
    async fn set_volume(&self, level: u8) -> Result<()>;

    async fn set_mute(&self, mute: bool) -> Result<()>;
}

/// Builds the API handle for a host
pub trait ApiFactory: Send + Sync {
    /// # Errors
    ///
    /// `Error::Config` if the HTTP client cannot be built.
    fn create(&self, host: &str, port: u16) -> Result<Arc<dyn PlayerApi>>;
}

/// Factory for [`BluesoundClient`]s
#[derive(Debug, Default, Clone)]
pub struct HttpApiFactory;

impl ApiFactory for HttpApiFactory {
    fn create(&self, host: &str, port: u16) -> Result<Arc<dyn PlayerApi>> {
        Ok(Arc::new(BluesoundClient::new(host, port)?))
    }
}

/// HTTP client for one BluOS player
#[derive(Debug, Clone)]
pub struct BluesoundClient {
    host: String,
    port: u16,
    base_url: String,
    client: reqwest::Client,
}

impl BluesoundClient {
    /// Create a client for `host:port`
    pub fn new(host: impl Into<String>, port: u16) -> Result<Self> {
        let host = host.into();
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: format!("http://{}:{}", host, port),
            host,
            port,
            client,
        })
    }

    async fn get(&self, path: &str, timeout: Duration) -> Result<String> {
        let url = format!("{}{}", self.base_url, path);
        trace!("GET {}", url);

        let response = self
            .client
            .get(&url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| Error::transient(format!("player unreachable: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());

            return match status.as_u16() {
                401 | 403 => Err(Error::invalid_auth(format!(
                    "Player {} rejected {}: {}",
                    self.host, path, status
                ))),
                404 => Err(Error::not_found(format!(
                    "Player {} has no endpoint {}",
                    self.host, path
                ))),
                429 | 500..=599 => Err(Error::transient(format!(
                    "Player {} error (transient): {} - {}",
                    self.host, status, error_text
                ))),
                _ => Err(Error::integration(
                    "bluesound",
                    format!("{} failed: {} - {}", path, status, error_text),
                )),
            };
        }

        response
            .text()
            .await
            .map_err(|e| Error::transient(format!("player unreachable: {}", e)))
    }

    fn long_poll_path(endpoint: &str, etag: Option<&str>) -> (String, Duration) {
        match etag.filter(|e| !e.is_empty()) {
            Some(etag) => (
                format!("{}?etag={}&timeout={}", endpoint, etag, LONG_POLL_TIMEOUT_SECS),
                LONG_POLL_HTTP_TIMEOUT,
            ),
            None => (endpoint.to_string(), DEFAULT_HTTP_TIMEOUT),
        }
    }
}

#[async_trait]
impl PlayerApi for BluesoundClient {
    fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    async fn sync_status(&self, etag: Option<&str>) -> Result<SyncStatus> {
        let (path, timeout) = Self::long_poll_path("/SyncStatus", etag);
        let body = self.get(&path, timeout).await?;
        parse_xml("SyncStatus", &body)
    }

    async fn status(&self, etag: Option<&str>) -> Result<Status> {
        let (path, timeout) = Self::long_poll_path("/Status", etag);
        let body = self.get(&path, timeout).await?;
        parse_xml("status", &body)
    }

    async fn presets(&self) -> Result<Vec<Preset>> {
        let body = self.get("/Presets", DEFAULT_HTTP_TIMEOUT).await?;
        parse_presets(&body)
    }

    async fn command(&self, command: Command) -> Result<()> {
        debug!("[{}] {:?}", self.host, command);
        self.get(&command.path(), DEFAULT_HTTP_TIMEOUT).await?;
        Ok(())
    }

    async fn set_volume(&self, level: u8) -> Result<()> {
        debug!("[{}] Volume {}", self.host, level);
        self.get(&format!("/Volume?level={}", level.min(100)), DEFAULT_HTTP_TIMEOUT)
            .await?;
        Ok(())
    }

    async fn set_mute(&self, mute: bool) -> Result<()> {
        debug!("[{}] Mute {}", self.host, mute);
        self.get(&format!("/Volume?mute={}", u8::from(mute)), DEFAULT_HTTP_TIMEOUT)
            .await?;
        Ok(())
    }
}
