// # Entry Store Implementations
//
// This module provides implementations of the EntryStore trait for
// different persistence strategies.

pub mod file;
pub mod memory;

pub use file::FileEntryStore;
pub use memory::MemoryEntryStore;

use crate::config::EntryStoreConfig;
use crate::traits::EntryStore;
use std::sync::Arc;

/// Open the entry store described by `config`
pub async fn open_entry_store(config: &EntryStoreConfig) -> crate::Result<Arc<dyn EntryStore>> {
    config.validate()?;
    Ok(match config {
        EntryStoreConfig::File { path } => Arc::new(FileEntryStore::new(path).await?),
        EntryStoreConfig::Memory => Arc::new(MemoryEntryStore::new()),
    })
}
