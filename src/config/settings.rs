//! Library Settings
//!
//! Tunables for the registries and the liveness prober, read from
//! `<config_dir>/settings.json`. Every field has a default so a partial or
//! missing file is fine.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::fs;

use super::keychain::SERVICE_NAME;
use super::storage::{config_dir, StorageError};

/// Current settings file version
pub const SETTINGS_VERSION: u32 = 1;

/// Which reachability check the prober runs for SSH hosts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeStrategy {
    /// HEAD request over https, then http
    #[default]
    Http,
    /// Raw TCP connect to the SSH port
    Tcp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    pub version: u32,
    /// Prefix of record-store keys and secret keys
    pub namespace: String,
    pub probe_interval_secs: u64,
    pub probe_timeout_secs: u64,
    pub probe_strategy: ProbeStrategy,
    /// Overrides ~/.ssh/config
    pub ssh_config_path: Option<PathBuf>,
    pub watch_ssh_config: bool,
    pub keychain_service: String,
    /// Buffered events per subscriber before it lags
    pub event_capacity: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: SETTINGS_VERSION,
            namespace: "labonair".to_string(),
            probe_interval_secs: 60,
            probe_timeout_secs: 5,
            probe_strategy: ProbeStrategy::Http,
            ssh_config_path: None,
            watch_ssh_config: true,
            keychain_service: SERVICE_NAME.to_string(),
            event_capacity: 256,
        }
    }
}

impl Settings {
    /// Default settings file location
    pub fn default_path() -> Result<PathBuf, StorageError> {
        Ok(config_dir()?.join("settings.json"))
    }

    /// Load settings from the default location
    pub async fn load_default() -> Result<Self, StorageError> {
        Self::load(&Self::default_path()?).await
    }

    /// Load settings from `path`
    /// Missing file yields defaults; a corrupted file is logged and yields defaults
    pub async fn load(path: &Path) -> Result<Self, StorageError> {
        let contents = match fs::read_to_string(path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(StorageError::Io(e)),
        };

        match serde_json::from_str::<Settings>(&contents) {
            Ok(settings) if settings.version > SETTINGS_VERSION => {
                Err(StorageError::VersionTooNew {
                    found: settings.version,
                    supported: SETTINGS_VERSION,
                })
            }
            Ok(settings) => Ok(settings),
            Err(e) => {
                tracing::warn!("Settings file {:?} corrupted, using defaults: {}", path, e);
                Ok(Self::default())
            }
        }
    }

    /// Save settings to `path`
    pub async fn save(&self, path: &Path) -> Result<(), StorageError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?).await?;
        Ok(())
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs.max(1))
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs.max(1))
    }

    pub fn hosts_key(&self) -> String {
        format!("{}.hosts", self.namespace)
    }

    pub fn groups_key(&self) -> String {
        format!("{}.groups", self.namespace)
    }

    pub fn identities_key(&self) -> String {
        format!("{}.identities", self.namespace)
    }
}
