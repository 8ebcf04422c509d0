// # Entry Store Trait
//
// Defines the interface for persisting config entries.
//
// ## Purpose
//
// A config entry is the record a config flow produces: which integration
// (domain) it belongs to, a title, an optional unique id used to reject
// duplicates, and the integration-specific data needed to connect.
//
// ## Implementations
//
// - `MemoryEntryStore`: not persistent, for tests and embedding
// - `FileEntryStore`: JSON file with atomic writes and backup recovery

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A persisted integration instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigEntry {
    /// Opaque id, unique within the store
    pub entry_id: String,
    /// Integration domain (e.g. "ads", "bluesound")
    pub domain: String,
    /// Human readable title
    pub title: String,
    /// Device-level unique id (e.g. MAC address), used to reject duplicates
    #[serde(default)]
    pub unique_id: Option<String>,
    /// Integration-specific data
    pub data: serde_json::Value,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl ConfigEntry {
    /// Create a new entry with a freshly generated id
    pub fn new(
        domain: impl Into<String>,
        title: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            entry_id: uuid::Uuid::new_v4().simple().to_string(),
            domain: domain.into(),
            title: title.into(),
            unique_id: None,
            data,
            created_at: Utc::now(),
        }
    }

    /// Set the unique id
    pub fn with_unique_id(mut self, unique_id: impl Into<String>) -> Self {
        self.unique_id = Some(unique_id.into());
        self
    }

    /// Deserialize the entry data into an integration's typed config
    pub fn parse_data<T: serde::de::DeserializeOwned>(&self) -> Result<T, crate::Error> {
        serde_json::from_value(self.data.clone()).map_err(|e| {
            crate::Error::config(format!(
                "Invalid data for {} entry {}: {}",
                self.domain, self.entry_id, e
            ))
        })
    }
}

/// Trait for config entry store implementations
///
/// All methods must be safe to call concurrently from multiple tasks.
/// Mutating calls on persistent stores are durable when they return.
#[async_trait]
pub trait EntryStore: Send + Sync {
    /// Get an entry by id
    async fn get_entry(&self, entry_id: &str) -> Result<Option<ConfigEntry>, crate::Error>;

    /// List all entries, ordered by creation time
    async fn list_entries(&self) -> Result<Vec<ConfigEntry>, crate::Error>;

    /// Add a new entry
    ///
    /// Fails with `Error::AlreadyConfigured` if an entry with the same id,
    /// or the same domain and unique id, already exists.
    async fn add_entry(&self, entry: ConfigEntry) -> Result<(), crate::Error>;

    /// Replace an existing entry
    async fn update_entry(&self, entry: ConfigEntry) -> Result<(), crate::Error>;

    /// Remove an entry (no-op if it doesn't exist)
    async fn remove_entry(&self, entry_id: &str) -> Result<(), crate::Error>;

    /// Persist any pending changes
    async fn flush(&self) -> Result<(), crate::Error>;

    /// Find the entry of a domain with the given unique id
    async fn find_by_unique_id(
        &self,
        domain: &str,
        unique_id: &str,
    ) -> Result<Option<ConfigEntry>, crate::Error> {
        Ok(self
            .list_entries()
            .await?
            .into_iter()
            .find(|e| e.domain == domain && e.unique_id.as_deref() == Some(unique_id)))
    }
}

/// Reject an entry that collides with one already stored
pub(crate) fn check_duplicate<'a>(
    existing: impl IntoIterator<Item = &'a ConfigEntry>,
    entry: &ConfigEntry,
) -> Result<(), crate::Error> {
    for other in existing {
        if other.entry_id == entry.entry_id {
            return Err(crate::Error::AlreadyConfigured(format!(
                "entry {}",
                entry.entry_id
            )));
        }
        if other.domain == entry.domain
            && entry.unique_id.is_some()
            && other.unique_id == entry.unique_id
        {
            return Err(crate::Error::AlreadyConfigured(format!(
                "{} {}",
                entry.domain,
                entry.unique_id.as_deref().unwrap_or_default()
            )));
        }
    }
    Ok(())
}
