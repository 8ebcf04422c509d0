// # Memory Entry Store
//
// In-memory implementation of EntryStore.
//
// ## Purpose
//
// Provides a simple entry store that doesn't persist across restarts.
// Useful for testing and for applications embedding hubkit that keep their
// own configuration.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use async_trait::async_trait;

use crate::traits::entry_store::{ConfigEntry, EntryStore, check_duplicate};
use crate::Error;

/// In-memory entry store implementation
///
/// # Example
///
/// ```rust,no_run
/// use hubkit_core::state::MemoryEntryStore;
/// use hubkit_core::traits::{ConfigEntry, EntryStore};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = MemoryEntryStore::new();
///     let entry = ConfigEntry::new("bluesound", "Kitchen", serde_json::json!({"host": "10.0.0.2"}));
///     let id = entry.entry_id.clone();
///
///     store.add_entry(entry).await?;
///     assert!(store.get_entry(&id).await?.is_some());
///
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryEntryStore {
    inner: Arc<RwLock<HashMap<String, ConfigEntry>>>,
}

impl MemoryEntryStore {
    /// Create a new empty memory entry store
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of entries in the store
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Check if the store is empty
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

#[async_trait]
impl EntryStore for MemoryEntryStore {
    async fn get_entry(&self, entry_id: &str) -> Result<Option<ConfigEntry>, Error> {
        let guard = self.inner.read().await;
        Ok(guard.get(entry_id).cloned())
    }

    async fn list_entries(&self) -> Result<Vec<ConfigEntry>, Error> {
        let guard = self.inner.read().await;
        let mut entries: Vec<ConfigEntry> = guard.values().cloned().collect();
        entries.sort_by_key(|e| e.created_at);
        Ok(entries)
    }

    async fn add_entry(&self, entry: ConfigEntry) -> Result<(), Error> {
        let mut guard = self.inner.write().await;
        check_duplicate(guard.values(), &entry)?;
        guard.insert(entry.entry_id.clone(), entry);
        Ok(())
    }

    async fn update_entry(&self, entry: ConfigEntry) -> Result<(), Error> {
        let mut guard = self.inner.write().await;
        if !guard.contains_key(&entry.entry_id) {
            return Err(Error::not_found(format!("Config entry {}", entry.entry_id)));
        }
        guard.insert(entry.entry_id.clone(), entry);
        Ok(())
    }

    async fn remove_entry(&self, entry_id: &str) -> Result<(), Error> {
        let mut guard = self.inner.write().await;
        guard.remove(entry_id);
        Ok(())
    }

    async fn flush(&self) -> Result<(), Error> {
        // Nothing is buffered
        Ok(())
    }
}
