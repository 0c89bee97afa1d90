//! Service Wiring
//!
//! Builds the stores, the ~/.ssh/config bridge, both registries and the
//! liveness prober from `Settings`, and tears them down again.

use std::sync::Arc;

use parking_lot::Mutex;

#[cfg(feature = "keychain")]
use crate::config::Keychain;
#[cfg(not(feature = "keychain"))]
use crate::config::MemorySecretStore;
use crate::config::{
    FileRecordStore, RecordStore, SecretStore, Settings, SshConfigBridge, StorageError,
};
use crate::health::LivenessProber;
use crate::registry::{EventEmitter, HostRegistry, IdentityRegistry};

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Running connectivity core
pub struct ConnectivityService {
    settings: Settings,
    events: EventEmitter,
    hosts: Arc<HostRegistry>,
    identities: Arc<IdentityRegistry>,
    ssh_config: Arc<SshConfigBridge>,
    prober: Mutex<Option<LivenessProber>>,
}

impl ConnectivityService {
    /// Start with the on-disk record store and the platform secret store
    pub async fn start(settings: Settings) -> Result<Self, ServiceError> {
        let records: Arc<dyn RecordStore> = Arc::new(FileRecordStore::new()?);

        #[cfg(feature = "keychain")]
        let secrets: Arc<dyn SecretStore> =
            Arc::new(Keychain::with_service(settings.keychain_service.clone()));

        #[cfg(not(feature = "keychain"))]
        let secrets: Arc<dyn SecretStore> = {
            tracing::warn!("Built without keychain support, secrets are kept in memory only");
            Arc::new(MemorySecretStore::new())
        };

        Self::start_with(records, secrets, settings).await
    }

    /// Start with injected stores
    pub async fn start_with(
        records: Arc<dyn RecordStore>,
        secrets: Arc<dyn SecretStore>,
        settings: Settings,
    ) -> Result<Self, ServiceError> {
        let events = EventEmitter::new(settings.event_capacity);

        let ssh_config = Arc::new(match settings.ssh_config_path.clone() {
            Some(path) => SshConfigBridge::with_path(Some(path), events.clone()),
            None => SshConfigBridge::new(events.clone()),
        });
        if settings.watch_ssh_config {
            if let Err(e) = ssh_config.start_watching() {
                tracing::warn!("Not watching SSH config: {}", e);
            }
        }

        let hosts = Arc::new(
            HostRegistry::load(
                Arc::clone(&records),
                Arc::clone(&secrets),
                &settings,
                events.clone(),
            )
            .await
            .with_ssh_config(Arc::clone(&ssh_config)),
        );
        let identities =
            Arc::new(IdentityRegistry::load(records, secrets, &settings, events.clone()).await);

        let prober = LivenessProber::spawn(Arc::clone(&hosts), settings.probe_interval());

        tracing::info!("Connectivity service started");
        Ok(Self {
            settings,
            events,
            hosts,
            identities,
            ssh_config,
            prober: Mutex::new(Some(prober)),
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn events(&self) -> &EventEmitter {
        &self.events
    }

    pub fn hosts(&self) -> &Arc<HostRegistry> {
        &self.hosts
    }

    pub fn identities(&self) -> &Arc<IdentityRegistry> {
        &self.identities
    }

    pub fn ssh_config(&self) -> &Arc<SshConfigBridge> {
        &self.ssh_config
    }

    pub fn is_running(&self) -> bool {
        self.prober.lock().as_ref().is_some_and(|p| p.is_running())
    }

    /// Stop the prober and the config watcher
    pub fn shutdown(&self) {
        if let Some(mut prober) = self.prober.lock().take() {
            prober.stop();
        }
        self.ssh_config.stop_watching();
        tracing::info!("Connectivity service stopped");
    }
}

impl Drop for ConnectivityService {
    fn drop(&mut self) {
        if self.prober.get_mut().is_some() {
            self.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Host, IdentityKind, Identity, MemoryRecordStore, MemorySecretStore};
    use crate::registry::RegistryEvent;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let temp = tempdir().unwrap();
        let config_path = temp.path().join("config");
        std::fs::write(&config_path, "Host jump\n  HostName jump.lan\n").unwrap();

        let settings = Settings {
            ssh_config_path: Some(config_path),
            ..Default::default()
        };
        let service = ConnectivityService::start_with(
            Arc::new(MemoryRecordStore::new()),
            Arc::new(MemorySecretStore::new()),
            settings,
        )
        .await
        .unwrap();

        assert!(service.is_running());
        assert!(service.ssh_config().is_watching());

        let mut rx = service.events().subscribe();
        service.hosts().add(Host::new("web", "web.lan")).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), RegistryEvent::HostsChanged);

        service
            .identities()
            .add(Identity::new("deploy", IdentityKind::SshKey), "key", None)
            .await
            .unwrap();
        assert_eq!(rx.recv().await.unwrap(), RegistryEvent::IdentitiesChanged);

        assert_eq!(service.hosts().list().await.len(), 2);

        service.shutdown();
        assert!(!service.is_running());
        assert!(!service.ssh_config().is_watching());
    }
}
