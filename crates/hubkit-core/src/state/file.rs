// # File Entry Store
//
// File-based implementation of EntryStore with crash recovery.
//
// ## Crash Recovery
//
// - Atomic writes: Uses write-then-rename for atomicity
// - Corruption detection: Validates JSON on load
// - Automatic backup: Keeps .backup of last known good entries
// - Recovery: Falls back to backup if corruption detected
//
// ## File Format
//
// ```json
// {
//   "version": "1.0",
//   "entries": {
//     "3f2a...": {
//       "entry_id": "3f2a...",
//       "domain": "bluesound",
//       "title": "Kitchen",
//       "unique_id": "00:11:22:33:44:55-11000",
//       "data": { "host": "192.168.1.20", "port": 11000 },
//       "created_at": "2025-01-09T12:00:00Z"
//     }
//   }
// }
// ```

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

use crate::Error;
use crate::traits::entry_store::{ConfigEntry, EntryStore, check_duplicate};

/// Entries file format version
const ENTRIES_FILE_VERSION: &str = "1.0";

fn io_failure(action: &str, path: &Path, err: std::io::Error) -> Error {
    Error::entry_store(format!("Failed to {} {}: {}", action, path.display(), err))
}

/// File-based entry store with crash recovery
///
/// Every mutating call writes the whole file before returning.
///
/// # Example
///
/// ```rust,no_run
/// use hubkit_core::state::FileEntryStore;
/// use hubkit_core::traits::{ConfigEntry, EntryStore};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = FileEntryStore::new("/var/lib/hubkit/entries.json").await?;
///     let entry = ConfigEntry::new("ads", "PLC", serde_json::json!({"device": "5.1.2.3.1.1"}));
///     store.add_entry(entry).await?;
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct FileEntryStore {
    path: PathBuf,
    state: Arc<RwLock<FileState>>,
}

/// Internal state for file-based store
#[derive(Debug)]
struct FileState {
    entries: HashMap<String, ConfigEntry>,
    dirty: bool,
}

/// Serializable entries file format
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct EntriesFileFormat {
    version: String,
    entries: HashMap<String, ConfigEntry>,
}

impl FileEntryStore {
    /// Create or load a file entry store
    ///
    /// This will:
    /// 1. Create parent directories if needed
    /// 2. Try to load the existing entries file
    /// 3. If corruption is detected, try to load from backup
    /// 4. If both fail, start with no entries
    pub async fn new<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).await.map_err(|e| {
                    Error::config(format!(
                        "Failed to create entry store directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let entries = Self::load_with_recovery(&path).await?;

        Ok(Self {
            path,
            state: Arc::new(RwLock::new(FileState {
                entries,
                dirty: false,
            })),
        })
    }

    /// Load entries with automatic recovery from backup
    async fn load_with_recovery(path: &Path) -> Result<HashMap<String, ConfigEntry>, Error> {
        let err = match Self::load(path).await {
            Ok(entries) => {
                tracing::debug!("Loaded {} config entries from {}", entries.len(), path.display());
                return Ok(entries);
            }
            Err(e) => e,
        };

        // Only parse failures count as corruption; I/O errors are reported
        if !matches!(err, Error::Json(_)) {
            return Err(err);
        }

        tracing::warn!(
            "Entries file appears corrupted: {}. Attempting recovery from backup.",
            err
        );

        let backup_path = Self::backup_path(path);
        if !backup_path.exists() {
            tracing::warn!("No backup file found. Starting with no config entries.");
            return Ok(HashMap::new());
        }

        match Self::load(&backup_path).await {
            Ok(entries) => {
                tracing::info!("Recovered {} config entries from backup", entries.len());
                if let Err(restore_err) = fs::copy(&backup_path, path).await {
                    tracing::error!(
                        "Failed to restore entries file from backup: {}",
                        restore_err
                    );
                }
                Ok(entries)
            }
            Err(backup_err) => {
                tracing::error!(
                    "Backup also corrupted: {}. Starting with no config entries.",
                    backup_err
                );
                Ok(HashMap::new())
            }
        }
    }

    /// Load entries from a file
    async fn load(path: &Path) -> Result<HashMap<String, ConfigEntry>, Error> {
        if !path.exists() {
            tracing::debug!("Entries file does not exist: {}", path.display());
            return Ok(HashMap::new());
        }

        let content = fs::read_to_string(path)
            .await
            .map_err(|e| io_failure("read", path, e))?;

        let file: EntriesFileFormat = serde_json::from_str(&content)?;

        if file.version != ENTRIES_FILE_VERSION {
            tracing::warn!(
                "Entries file version mismatch: expected {}, got {}. Attempting to load anyway.",
                ENTRIES_FILE_VERSION,
                file.version
            );
        }

        Ok(file.entries)
    }

    /// Write entries to file atomically
    async fn write(&self) -> Result<(), Error> {
        let json = {
            let guard = self.state.read().await;
            let file = EntriesFileFormat {
                version: ENTRIES_FILE_VERSION.to_string(),
                entries: guard.entries.clone(),
            };
            serde_json::to_string_pretty(&file)
                .map_err(|e| Error::entry_store(format!("Failed to serialize entries: {}", e)))?
        };

        let temp_path = self.temp_path();
        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| io_failure("create", &temp_path, e))?;
        file.write_all(json.as_bytes())
            .await
            .map_err(|e| io_failure("write", &temp_path, e))?;
        file.sync_all()
            .await
            .map_err(|e| io_failure("sync", &temp_path, e))?;
        drop(file);

        // Keep the last good file around for load_with_recovery
        if self.path.exists() {
            let backup_path = Self::backup_path(&self.path);
            if let Err(e) = fs::copy(&self.path, &backup_path).await {
                tracing::warn!("Failed to back up {}: {}", self.path.display(), e);
            }
        }

        fs::rename(&temp_path, &self.path)
            .await
            .map_err(|e| io_failure("replace", &self.path, e))?;

        self.state.write().await.dirty = false;

        tracing::trace!("Config entries written to {}", self.path.display());
        Ok(())
    }

    /// Get path to temporary file for atomic writes
    fn temp_path(&self) -> PathBuf {
        let mut temp = self.path.clone();
        temp.set_extension("tmp");
        temp
    }

    /// Get path to backup file
    fn backup_path(path: &Path) -> PathBuf {
        let mut backup = path.to_path_buf();
        backup.set_extension("backup");
        backup
    }

    /// Path of the entries file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl EntryStore for FileEntryStore {
    async fn get_entry(&self, entry_id: &str) -> Result<Option<ConfigEntry>, Error> {
        let guard = self.state.read().await;
        Ok(guard.entries.get(entry_id).cloned())
    }

    async fn list_entries(&self) -> Result<Vec<ConfigEntry>, Error> {
        let guard = self.state.read().await;
        let mut entries: Vec<ConfigEntry> = guard.entries.values().cloned().collect();
        entries.sort_by_key(|e| e.created_at);
        Ok(entries)
    }

    async fn add_entry(&self, entry: ConfigEntry) -> Result<(), Error> {
        {
            let mut guard = self.state.write().await;
            check_duplicate(guard.entries.values(), &entry)?;
            guard.entries.insert(entry.entry_id.clone(), entry);
            guard.dirty = true;
        }
        self.write().await
    }

    async fn update_entry(&self, entry: ConfigEntry) -> Result<(), Error> {
        {
            let mut guard = self.state.write().await;
            if !guard.entries.contains_key(&entry.entry_id) {
                return Err(Error::not_found(format!("Config entry {}", entry.entry_id)));
            }
            guard.entries.insert(entry.entry_id.clone(), entry);
            guard.dirty = true;
        }
        self.write().await
    }

    async fn remove_entry(&self, entry_id: &str) -> Result<(), Error> {
        {
            let mut guard = self.state.write().await;
            if guard.entries.remove(entry_id).is_none() {
                return Ok(());
            }
            guard.dirty = true;
        }
        self.write().await
    }

    async fn flush(&self) -> Result<(), Error> {
        let dirty = self.state.read().await.dirty;
        if dirty { self.write().await } else { Ok(()) }
    }
}
