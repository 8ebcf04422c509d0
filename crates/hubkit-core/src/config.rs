//! Configuration types for hubkit
//!
//! This module defines the host-level configuration. Per-integration settings
//! live in each config entry's `data` and are parsed by the integration itself.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main hubkit configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HubConfig {
    /// Where config entries are persisted
    #[serde(default)]
    pub entry_store: EntryStoreConfig,

    /// Default polling behaviour for coordinators
    #[serde(default)]
    pub coordinator: CoordinatorConfig,

    /// Host lifecycle settings
    #[serde(default)]
    pub host: HostConfig,
}

impl HubConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        self.entry_store.validate()?;
        self.coordinator.validate()?;
        self.host.validate()?;
        Ok(())
    }
}

/// Config entry store configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EntryStoreConfig {
    /// File-based entry store
    File {
        /// Path to the entries file
        path: String,
    },

    /// In-memory entry store (not persistent)
    #[default]
    Memory,
}

impl EntryStoreConfig {
    /// Validate the entry store configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            EntryStoreConfig::File { path } if path.is_empty() => {
                Err(crate::Error::config("Entry store path cannot be empty"))
            }
            _ => Ok(()),
        }
    }
}

/// Coordinator polling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Delay between successful polls (in seconds)
    ///
    /// Zero means poll again immediately, which is what long-polling
    /// clients want since the device paces the request itself.
    #[serde(default = "default_update_interval_secs")]
    pub update_interval_secs: u64,

    /// Delay before retrying an offline device (in seconds)
    #[serde(default = "default_offline_retry_secs")]
    pub offline_retry_secs: u64,
}

impl CoordinatorConfig {
    /// Validate the coordinator configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.offline_retry_secs == 0 {
            return Err(crate::Error::config("Offline retry interval must be > 0"));
        }
        Ok(())
    }

    /// Delay between successful polls
    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval_secs)
    }

    /// Delay before retrying an offline device
    pub fn offline_retry(&self) -> Duration {
        Duration::from_secs(self.offline_retry_secs)
    }

    /// Set the update interval
    pub fn with_update_interval_secs(mut self, secs: u64) -> Self {
        self.update_interval_secs = secs;
        self
    }

    /// Set the offline retry interval
    pub fn with_offline_retry_secs(mut self, secs: u64) -> Self {
        self.offline_retry_secs = secs;
        self
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            update_interval_secs: default_update_interval_secs(),
            offline_retry_secs: default_offline_retry_secs(),
        }
    }
}

/// Host lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    /// Delay between setup attempts for entries whose device is offline (in seconds)
    #[serde(default = "default_setup_retry_secs")]
    pub setup_retry_secs: u64,

    /// Maximum time to wait for an entry's tasks to exit on unload (in seconds)
    #[serde(default = "default_unload_timeout_secs")]
    pub unload_timeout_secs: u64,

    /// Capacity of the host event channel
    ///
    /// When full, new events are dropped (with a warning log).
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl HostConfig {
    /// Validate the host configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.setup_retry_secs == 0 {
            return Err(crate::Error::config("Setup retry interval must be > 0"));
        }
        if self.event_channel_capacity == 0 {
            return Err(crate::Error::config("Event channel capacity must be > 0"));
        }
        Ok(())
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            setup_retry_secs: default_setup_retry_secs(),
            unload_timeout_secs: default_unload_timeout_secs(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

fn default_update_interval_secs() -> u64 {
    30
}

fn default_offline_retry_secs() -> u64 {
    180
}

fn default_setup_retry_secs() -> u64 {
    30
}

fn default_unload_timeout_secs() -> u64 {
    10
}

fn default_event_channel_capacity() -> usize {
    256
}
