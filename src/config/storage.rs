//! Record Storage
//!
//! Durable key/value storage for the JSON record collections (hosts, groups,
//! identities). Each key maps to one string value; the registries store a
//! whole JSON array per key and rewrite it on every mutation.
//!
//! State location: ~/.labonair on macOS/Linux, %APPDATA%\Labonair on Windows

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Record storage errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Failed to determine config directory")]
    NoConfigDir,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config version {found} is newer than supported {supported}")]
    VersionTooNew { found: u32, supported: u32 },
}

/// Get the Labonair configuration directory
/// Returns %APPDATA%\Labonair on Windows, ~/.labonair on macOS/Linux
pub fn config_dir() -> Result<PathBuf, StorageError> {
    #[cfg(windows)]
    {
        if let Some(app_data) = dirs::config_dir() {
            return Ok(app_data.join("Labonair"));
        }
        dirs::home_dir()
            .map(|home| home.join(".labonair"))
            .ok_or(StorageError::NoConfigDir)
    }

    #[cfg(not(windows))]
    {
        dirs::home_dir()
            .map(|home| home.join(".labonair"))
            .ok_or(StorageError::NoConfigDir)
    }
}

/// Get the record state file path
pub fn state_file() -> Result<PathBuf, StorageError> {
    Ok(config_dir()?.join("state.json"))
}

/// Durable string-per-key storage
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Read the value stored under `key`
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Replace the value stored under `key`
    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
}

/// Record store backed by a single JSON object file
pub struct FileRecordStore {
    path: PathBuf,
    /// Serializes read-modify-write cycles on the file
    lock: tokio::sync::Mutex<()>,
}

impl FileRecordStore {
    /// Create a store at the default state file
    pub fn new() -> Result<Self, StorageError> {
        Ok(Self::with_path(state_file()?))
    }

    /// Create a store with a custom path (for testing)
    pub fn with_path(path: PathBuf) -> Self {
        Self {
            path,
            lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    async fn ensure_dir(&self) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Load every entry from disk
    /// Returns an empty map if the file doesn't exist
    /// If the file is corrupted, backs it up and returns an empty map
    async fn load_all(&self) -> Result<HashMap<String, String>, StorageError> {
        match fs::read_to_string(&self.path).await {
            Ok(contents) => match serde_json::from_str::<HashMap<String, String>>(&contents) {
                Ok(entries) => Ok(entries),
                Err(e) => {
                    tracing::warn!("State file corrupted: {}", e);

                    match self.backup().await {
                        Ok(backup_path) => {
                            tracing::warn!(
                                "Corrupted state backed up to {:?}, starting empty",
                                backup_path
                            );
                        }
                        Err(backup_err) => {
                            tracing::error!("Failed to backup corrupted state: {}", backup_err);
                        }
                    }

                    Ok(HashMap::new())
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    /// Write every entry to disk (temp file, then rename)
    async fn save_all(&self, entries: &HashMap<String, String>) -> Result<(), StorageError> {
        self.ensure_dir().await?;

        let temp_path = self.path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(entries)?;

        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(json.as_bytes()).await?;
        file.sync_all().await?;

        fs::rename(&temp_path, &self.path).await?;

        Ok(())
    }

    /// Copy the current file next to itself with a timestamp suffix
    pub async fn backup(&self) -> Result<PathBuf, StorageError> {
        let backup_path = self.path.with_extension(format!(
            "json.backup.{}",
            chrono::Utc::now().format("%Y%m%d_%H%M%S")
        ));

        if fs::metadata(&self.path).await.is_ok() {
            fs::copy(&self.path, &backup_path).await?;
        }

        Ok(backup_path)
    }
}

#[async_trait]
impl RecordStore for FileRecordStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let _guard = self.lock.lock().await;
        Ok(self.load_all().await?.remove(key))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let _guard = self.lock.lock().await;
        let mut entries = self.load_all().await?;
        entries.insert(key.to_string(), value.to_string());
        self.save_all(&entries).await
    }
}

/// In-process record store (tests, ephemeral sessions)
#[derive(Default)]
pub struct MemoryRecordStore {
    entries: parking_lot::Mutex<HashMap<String, String>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a raw value, bypassing serialization
    pub fn insert(&self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.lock().insert(key.into(), value.into());
    }

    pub fn raw(&self, key: &str) -> Option<String> {
        self.entries.lock().get(key).cloned()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Load a JSON array stored under `key`
///
/// Read failures and malformed JSON are logged and yield an empty collection.
pub async fn load_collection<T: DeserializeOwned>(store: &dyn RecordStore, key: &str) -> Vec<T> {
    let raw = match store.get(key).await {
        Ok(Some(raw)) => raw,
        Ok(None) => return Vec::new(),
        Err(e) => {
            tracing::error!("Failed to read '{}': {}", key, e);
            return Vec::new();
        }
    };

    match serde_json::from_str::<Vec<T>>(&raw) {
        Ok(items) => {
            tracing::debug!("Loaded {} records from '{}'", items.len(), key);
            items
        }
        Err(e) => {
            tracing::error!("Malformed records under '{}', loading empty: {}", key, e);
            Vec::new()
        }
    }
}

/// Rewrite the full JSON array under `key`
///
/// Last writer wins. Failures are logged; the caller's in-memory state stays
/// authoritative and no retry happens.
pub async fn save_collection<T: Serialize>(store: &dyn RecordStore, key: &str, items: &[T]) {
    let json = match serde_json::to_string(items) {
        Ok(json) => json,
        Err(e) => {
            tracing::error!("Failed to serialize '{}': {}", key, e);
            return;
        }
    };

    if let Err(e) = store.set(key, &json).await {
        tracing::error!("Failed to persist '{}': {}", key, e);
    }
}
