//! Host Registry
//!
//! Owns the locally stored hosts and groups, the per-host status cache and
//! the in-flight probe handles. Read-only hosts from ~/.ssh/config are
//! appended to listings but never persisted unless adopted.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::error::RegistryError;
use super::events::{EventEmitter, RegistryEvent};
use super::guard::{ConnectingGuard, PendingIds};
use super::inherit::effective_config;
use crate::config::{
    convert_to_host, is_system_host_id, load_collection, save_collection, AuthType, Group, Host,
    HostDefaults, HostPatch, HostStatus, RecordStore, SecretKeys, SecretStore, Settings,
    SshConfigBridge,
};
use crate::exchange::{self, ImportResult, ImportSource};
use crate::health::probe::{build_probe, check_host, LivenessProbe};

pub struct HostRegistry {
    records: Arc<dyn RecordStore>,
    secrets: Arc<dyn SecretStore>,
    keys: SecretKeys,
    hosts_key: String,
    groups_key: String,
    events: EventEmitter,
    ssh_config: Option<Arc<SshConfigBridge>>,
    probe: Arc<dyn LivenessProbe>,
    probe_timeout: Duration,
    hosts: RwLock<Vec<Host>>,
    groups: RwLock<Vec<Group>>,
    status: DashMap<String, HostStatus>,
    /// One token per host; cancelled when the host is deleted
    probe_tokens: DashMap<String, CancellationToken>,
    /// Explicit ids of adds still writing their password slot
    pending: PendingIds,
}

impl HostRegistry {
    /// Read hosts and groups from `records`
    ///
    /// Malformed collections are logged and start empty. The probe follows
    /// `settings.probe_strategy` until replaced with [`HostRegistry::with_probe`].
    pub async fn load(
        records: Arc<dyn RecordStore>,
        secrets: Arc<dyn SecretStore>,
        settings: &Settings,
        events: EventEmitter,
    ) -> Self {
        let hosts_key = settings.hosts_key();
        let groups_key = settings.groups_key();

        let hosts: Vec<Host> = load_collection(records.as_ref(), &hosts_key).await;
        let groups: Vec<Group> = load_collection(records.as_ref(), &groups_key).await;

        let status = DashMap::new();
        for host in &hosts {
            if let Some(s) = host.status.filter(|s| s.is_settled()) {
                status.insert(host.id.clone(), s);
            }
        }

        tracing::info!("Host registry loaded: {} hosts, {} groups", hosts.len(), groups.len());

        Self {
            records,
            secrets,
            keys: SecretKeys::new(settings.namespace.clone()),
            hosts_key,
            groups_key,
            events,
            ssh_config: None,
            probe: build_probe(settings.probe_strategy, settings.probe_timeout()),
            probe_timeout: settings.probe_timeout(),
            hosts: RwLock::new(hosts),
            groups: RwLock::new(groups),
            status,
            probe_tokens: DashMap::new(),
            pending: PendingIds::default(),
        }
    }

    /// Append ~/.ssh/config hosts to listings
    pub fn with_ssh_config(mut self, bridge: Arc<SshConfigBridge>) -> Self {
        self.ssh_config = Some(bridge);
        self
    }

    /// Replace the liveness probe strategy
    pub fn with_probe(mut self, probe: Arc<dyn LivenessProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn events(&self) -> &EventEmitter {
        &self.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    pub fn ssh_config(&self) -> Option<&Arc<SshConfigBridge>> {
        self.ssh_config.as_ref()
    }

    // ========== Hosts ==========

    /// Local hosts, then ~/.ssh/config hosts, with cached status filled in
    pub async fn list(&self) -> Vec<Host> {
        let mut hosts: Vec<Host> = self.hosts.read().clone();

        if let Some(ref bridge) = self.ssh_config {
            let system = bridge.get_system_hosts().await;
            self.prune_system_entries(&system);
            hosts.extend(system);
        }

        for host in &mut hosts {
            host.status = Some(self.get_status(&host.id));
        }
        hosts
    }

    /// Local hosts first, then ~/.ssh/config
    pub async fn get(&self, id: &str) -> Option<Host> {
        let local = self.hosts.read().iter().find(|h| h.id == id).cloned();

        let mut host = match local {
            Some(host) => host,
            None if is_system_host_id(id) => self.ssh_config.as_ref()?.get_system_host(id).await?,
            None => return None,
        };
        host.status = Some(self.get_status(id));
        Some(host)
    }

    /// Validate, assign id and creation time, provision the password slot
    async fn insert_host(&self, mut host: Host) -> Result<Host, RegistryError> {
        host.validate().map_err(RegistryError::InvalidHost)?;

        if host.id.is_empty() {
            host.id = Uuid::new_v4().to_string();
        } else if is_system_host_id(&host.id) {
            return Err(RegistryError::InvalidHost(format!(
                "id '{}' is reserved for ssh config hosts",
                host.id
            )));
        }

        // held across the secret write so a concurrent add of the same id fails fast
        let _claim = self
            .pending
            .claim(&host.id, || self.contains(&host.id))
            .ok_or_else(|| RegistryError::DuplicateHost(host.id.clone()))?;

        host.created.get_or_insert_with(Utc::now);
        host.status = Some(HostStatus::Unknown);

        if host.auth.auth_type == AuthType::Password {
            // filled in later by the credential entry flow
            self.secrets.set(&self.keys.host(&host.id), "").await?;
        }

        self.hosts.write().push(host.clone());
        self.status.insert(host.id.clone(), HostStatus::Unknown);

        Ok(host)
    }

    /// Add a host; returns the stored record
    pub async fn add(&self, host: Host) -> Result<Host, RegistryError> {
        let host = self.insert_host(host).await?;
        tracing::info!("Host added: {} ({})", host.name, host.id);

        self.save_hosts().await;
        self.events.emit_hosts_changed();
        Ok(host)
    }

    /// Shallow-merge `patch` onto a stored host
    ///
    /// Unknown ids are logged and yield `Ok(None)`.
    pub async fn update(&self, id: &str, patch: HostPatch) -> Result<Option<Host>, RegistryError> {
        let updated = {
            let mut hosts = self.hosts.write();
            let Some(slot) = hosts.iter_mut().find(|h| h.id == id) else {
                tracing::warn!("Update of unknown host {}", id);
                return Ok(None);
            };

            let mut candidate = slot.clone();
            patch.apply(&mut candidate);
            candidate.validate().map_err(RegistryError::InvalidHost)?;
            *slot = candidate.clone();
            candidate
        };

        self.save_hosts().await;
        self.events.emit_hosts_changed();
        Ok(Some(updated))
    }

    /// Stamp `lastUsed` with the current time
    pub async fn touch(&self, id: &str) -> bool {
        let touched = {
            let mut hosts = self.hosts.write();
            match hosts.iter_mut().find(|h| h.id == id) {
                Some(host) => {
                    host.last_used = Some(Utc::now());
                    true
                }
                None => false,
            }
        };

        if touched {
            self.save_hosts().await;
            self.events.emit_hosts_changed();
        } else {
            tracing::warn!("Touch of unknown host {}", id);
        }
        touched
    }

    /// Remove a host, its cached status and its secret; cancels an in-flight probe
    pub async fn delete(&self, id: &str) -> bool {
        let removed = {
            let mut hosts = self.hosts.write();
            let before = hosts.len();
            hosts.retain(|h| h.id != id);
            hosts.len() != before
        };

        if !removed {
            tracing::warn!("Delete of unknown host {}", id);
            return false;
        }

        self.status.remove(id);
        if let Some((_, token)) = self.probe_tokens.remove(id) {
            token.cancel();
        }

        if let Err(e) = self.secrets.delete(&self.keys.host(id)).await {
            tracing::error!("Failed to purge secret of host {}: {}", id, e);
        }

        tracing::info!("Host deleted: {}", id);
        self.save_hosts().await;
        self.events.emit_hosts_changed();
        true
    }

    /// Copy an ~/.ssh/config host into the registry as an editable record
    pub async fn adopt_system_host(&self, id: &str) -> Result<Host, RegistryError> {
        let bridge = self
            .ssh_config
            .as_ref()
            .ok_or_else(|| RegistryError::NotSystemHost(id.to_string()))?;
        let system = bridge
            .get_system_host(id)
            .await
            .ok_or_else(|| RegistryError::NotSystemHost(id.to_string()))?;

        self.add(convert_to_host(&system)).await
    }

    fn contains(&self, id: &str) -> bool {
        self.hosts.read().iter().any(|h| h.id == id)
    }

    async fn save_hosts(&self) {
        let snapshot = self.hosts.read().clone();
        save_collection(self.records.as_ref(), &self.hosts_key, &snapshot).await;
    }

    // ========== Groups ==========

    pub fn list_groups(&self) -> Vec<Group> {
        self.groups.read().clone()
    }

    pub fn get_group(&self, name: &str) -> Option<Group> {
        self.groups.read().iter().find(|g| g.name == name).cloned()
    }

    pub async fn add_group(&self, mut group: Group) -> Result<Group, RegistryError> {
        group.name = group.name.trim().to_string();
        if group.name.is_empty() {
            return Err(RegistryError::InvalidGroup("name must not be empty".into()));
        }
        if let Some(ref defaults) = group.defaults {
            defaults.validate(&group.name).map_err(RegistryError::InvalidGroup)?;
        }

        {
            let mut groups = self.groups.write();
            if groups.iter().any(|g| g.name == group.name) {
                return Err(RegistryError::DuplicateGroup(group.name));
            }
            groups.push(group.clone());
        }

        tracing::info!("Group added: {}", group.name);
        self.save_groups().await;
        self.events.emit_hosts_changed();
        Ok(group)
    }

    /// Shallow-merge `defaults` onto a group's defaults
    ///
    /// Unknown names are logged and yield `Ok(None)`.
    pub async fn update_group(
        &self,
        name: &str,
        defaults: HostDefaults,
    ) -> Result<Option<Group>, RegistryError> {
        let updated = {
            let mut groups = self.groups.write();
            let Some(group) = groups.iter_mut().find(|g| g.name == name) else {
                tracing::warn!("Update of unknown group {}", name);
                return Ok(None);
            };

            let mut merged = group.defaults.clone().unwrap_or_default();
            merged.merge(defaults);
            merged.validate(name).map_err(RegistryError::InvalidGroup)?;
            group.defaults = Some(merged);
            group.clone()
        };

        self.save_groups().await;
        self.events.emit_hosts_changed();
        Ok(Some(updated))
    }

    /// Remove a group. Member hosts keep their now dangling reference.
    pub async fn delete_group(&self, name: &str) -> bool {
        let removed = {
            let mut groups = self.groups.write();
            let before = groups.len();
            groups.retain(|g| g.name != name);
            groups.len() != before
        };

        if !removed {
            tracing::warn!("Delete of unknown group {}", name);
            return false;
        }

        tracing::info!("Group deleted: {}", name);
        self.save_groups().await;
        self.events.emit_hosts_changed();
        true
    }

    async fn save_groups(&self) {
        let snapshot = self.groups.read().clone();
        save_collection(self.records.as_ref(), &self.groups_key, &snapshot).await;
    }

    /// Host merged over its group's defaults over built-in fallbacks
    pub fn get_effective_config(&self, host: &Host) -> Host {
        effective_config(host, &self.groups.read())
    }

    // ========== Status ==========

    pub fn get_status(&self, id: &str) -> HostStatus {
        self.status.get(id).map(|s| *s).unwrap_or_default()
    }

    /// Probe one host now, regardless of its cached status
    ///
    /// Emits `connecting`, then the final status. Unknown hosts are `unknown`.
    /// If the returned future is dropped mid-probe, the previous settled
    /// status is put back.
    pub async fn refresh_status(&self, id: &str) -> HostStatus {
        let Some(host) = self.get(id).await else {
            tracing::warn!("Refresh of unknown host {}", id);
            return HostStatus::Unknown;
        };

        let _connecting = ConnectingGuard::enter(&self.status, &self.events, id);

        let Some(status) = self.probe(&host).await else {
            return HostStatus::Unknown;
        };

        if self.is_tracked(id) {
            self.status.insert(id.to_string(), status);
            self.events.emit_status_changed(id, status);
        }
        status
    }

    /// Run the configured probe against a host's effective config
    ///
    /// `None` when the probe was cancelled because the host was deleted.
    pub(crate) async fn probe(&self, host: &Host) -> Option<HostStatus> {
        let token = self
            .probe_tokens
            .entry(host.id.clone())
            .or_insert_with(CancellationToken::new)
            .clone();
        let effective = self.get_effective_config(host);

        tokio::select! {
            _ = token.cancelled() => {
                tracing::debug!("Probe of {} cancelled", host.id);
                None
            }
            status = check_host(self.probe.as_ref(), &effective, self.probe_timeout) => Some(status),
        }
    }

    /// Cache a periodic probe result; emits only when the value changed
    pub(crate) fn record_status(&self, id: &str, status: HostStatus) -> bool {
        if !self.is_tracked(id) {
            return false;
        }

        let previous = self.status.insert(id.to_string(), status).unwrap_or_default();
        if previous == status {
            return false;
        }

        tracing::debug!("Host {} status {:?} -> {:?}", id, previous, status);
        self.events.emit_status_changed(id, status);
        true
    }

    fn is_tracked(&self, id: &str) -> bool {
        if is_system_host_id(id) {
            return self.ssh_config.as_ref().is_some_and(|b| b.is_live(id));
        }
        self.contains(id)
    }

    /// Drop cached status and probe handles of aliases gone from ~/.ssh/config
    fn prune_system_entries(&self, live: &[Host]) {
        let is_stale = |id: &str| is_system_host_id(id) && !live.iter().any(|h| h.id == id);

        self.status.retain(|id, _| !is_stale(id));
        self.probe_tokens.retain(|id, token| {
            if is_stale(id) {
                token.cancel();
                return false;
            }
            true
        });
    }

    // ========== Import / Export ==========

    /// Parse `data` and add every valid entry as a new host
    pub async fn import(
        &self,
        source: ImportSource,
        data: &str,
    ) -> Result<ImportResult, RegistryError> {
        let parsed = exchange::parse(source, data)?;

        let mut result = ImportResult {
            hosts: Vec::with_capacity(parsed.hosts.len()),
            errors: parsed.errors,
        };
        for host in parsed.hosts {
            let name = host.name.clone();
            match self.insert_host(host).await {
                Ok(host) => result.hosts.push(host),
                Err(e) => result.errors.push(format!("host '{}': {}", name, e)),
            }
        }

        if !result.hosts.is_empty() {
            self.save_hosts().await;
            self.events.emit_hosts_changed();
        }

        tracing::info!(
            "Imported {} hosts from {} ({} errors)",
            result.hosts.len(),
            source,
            result.errors.len()
        );
        Ok(result)
    }

    /// Export the given hosts (all local hosts when `ids` is empty)
    pub async fn export(&self, ids: &[String], encrypt: bool) -> Result<String, RegistryError> {
        let hosts = if ids.is_empty() {
            self.hosts.read().clone()
        } else {
            let mut hosts = Vec::with_capacity(ids.len());
            for id in ids {
                match self.get(id).await {
                    Some(host) => hosts.push(host),
                    None => tracing::warn!("Export of unknown host {}", id),
                }
            }
            hosts
        };

        Ok(exchange::export(&hosts, encrypt)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        ConnectionConfig, KeychainError, MemoryRecordStore, MemorySecretStore, Protocol,
        StorageError, Tunnel,
    };
    use crate::health::probe::ProbeTarget;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StaticProbe {
        status: HostStatus,
        calls: AtomicUsize,
    }

    impl StaticProbe {
        fn new(status: HostStatus) -> Arc<Self> {
            Arc::new(Self {
                status,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl LivenessProbe for StaticProbe {
        async fn probe(&self, _target: &ProbeTarget) -> HostStatus {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            self.status
        }
    }

    struct HangingProbe;

    #[async_trait]
    impl LivenessProbe for HangingProbe {
        async fn probe(&self, _target: &ProbeTarget) -> HostStatus {
            std::future::pending::<()>().await;
            HostStatus::Online
        }
    }

    struct SlowProbe;

    #[async_trait]
    impl LivenessProbe for SlowProbe {
        async fn probe(&self, _target: &ProbeTarget) -> HostStatus {
            tokio::time::sleep(Duration::from_millis(200)).await;
            HostStatus::Online
        }
    }

    /// Secret store that yields before every write
    #[derive(Default)]
    struct YieldingSecrets {
        inner: MemorySecretStore,
    }

    #[async_trait]
    impl SecretStore for YieldingSecrets {
        async fn set(&self, key: &str, value: &str) -> Result<(), KeychainError> {
            tokio::task::yield_now().await;
            self.inner.set(key, value).await
        }

        async fn get(&self, key: &str) -> Result<Option<String>, KeychainError> {
            self.inner.get(key).await
        }

        async fn delete(&self, key: &str) -> Result<(), KeychainError> {
            self.inner.delete(key).await
        }
    }

    /// Record store whose writes always fail
    struct ReadOnlyRecords;

    #[async_trait]
    impl RecordStore for ReadOnlyRecords {
        async fn get(&self, _key: &str) -> Result<Option<String>, StorageError> {
            Ok(None)
        }

        async fn set(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
            Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "read-only",
            )))
        }
    }

    struct Fixture {
        registry: HostRegistry,
        records: Arc<MemoryRecordStore>,
        secrets: Arc<MemorySecretStore>,
    }

    async fn fixture_with(records: Arc<MemoryRecordStore>, probe: Arc<dyn LivenessProbe>) -> Fixture {
        let secrets = Arc::new(MemorySecretStore::new());
        let registry = HostRegistry::load(
            records.clone(),
            secrets.clone(),
            &Settings::default(),
            EventEmitter::default(),
        )
        .await
        .with_probe(probe);
        Fixture {
            registry,
            records,
            secrets,
        }
    }

    async fn fixture(probe: Arc<dyn LivenessProbe>) -> Fixture {
        fixture_with(Arc::new(MemoryRecordStore::new()), probe).await
    }

    fn web1() -> Host {
        serde_json::from_str(
            r#"{
                "name": "web1",
                "connection": {"host": "10.0.0.5", "port": 22, "username": "root", "protocol": "ssh", "osIcon": "linux"},
                "auth": {"type": "password"}
            }"#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_add_web1() {
        let f = fixture(StaticProbe::new(HostStatus::Online)).await;
        let host = f.registry.add(web1()).await.unwrap();

        assert!(!host.id.is_empty());
        assert!(host.created.is_some());
        assert_eq!(f.registry.get_status(&host.id), HostStatus::Unknown);
        assert!(f.secrets.contains(&format!("labonair.host.{}", host.id)));
        assert_eq!(
            f.secrets.get(&format!("labonair.host.{}", host.id)).await.unwrap().as_deref(),
            Some("")
        );
    }

    #[tokio::test]
    async fn test_non_password_host_has_no_secret() {
        let f = fixture(StaticProbe::new(HostStatus::Online)).await;
        let mut host = web1();
        host.auth.auth_type = AuthType::Agent;
        f.registry.add(host).await.unwrap();
        assert!(f.secrets.is_empty());
    }

    #[tokio::test]
    async fn test_ids_unique() {
        let f = fixture(StaticProbe::new(HostStatus::Online)).await;
        let a = f.registry.add(web1()).await.unwrap();
        let b = f.registry.add(web1()).await.unwrap();
        assert_ne!(a.id, b.id);

        let mut dup = web1();
        dup.id = a.id.clone();
        assert!(matches!(
            f.registry.add(dup).await,
            Err(RegistryError::DuplicateHost(_))
        ));

        let mut reserved = web1();
        reserved.id = "ssh-config:web".into();
        assert!(matches!(
            f.registry.add(reserved).await,
            Err(RegistryError::InvalidHost(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_port_rejected() {
        let f = fixture(StaticProbe::new(HostStatus::Online)).await;
        let mut host = web1();
        host.connection.port = Some(0);
        assert!(matches!(
            f.registry.add(host).await,
            Err(RegistryError::InvalidHost(_))
        ));
        assert!(f.registry.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_roundtrip_through_store() {
        let records = Arc::new(MemoryRecordStore::new());
        let f = fixture_with(records.clone(), StaticProbe::new(HostStatus::Online)).await;
        let added = f.registry.add(web1()).await.unwrap();
        f.registry.add_group(Group::new("prod")).await.unwrap();

        assert!(f.records.raw("labonair.hosts").unwrap().contains(&added.id));

        let reloaded = fixture_with(records, StaticProbe::new(HostStatus::Online)).await;
        let got = reloaded.registry.get(&added.id).await.unwrap();
        assert_eq!(got.name, "web1");
        assert_eq!(got.connection, added.connection);
        assert_eq!(reloaded.registry.list_groups().len(), 1);
    }

    #[tokio::test]
    async fn test_update_merges() {
        let f = fixture(StaticProbe::new(HostStatus::Online)).await;
        let host = f.registry.add(web1()).await.unwrap();

        let updated = f
            .registry
            .update(&host.id, HostPatch::name("web1-renamed"))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(updated.name, "web1-renamed");
        assert_eq!(updated.id, host.id);
        assert_eq!(updated.connection, host.connection);
        assert_eq!(updated.created, host.created);

        assert!(f
            .registry
            .update("missing", HostPatch::name("x"))
            .await
            .unwrap()
            .is_none());

        let bad = HostPatch {
            connection: Some(ConnectionConfig {
                port: Some(0),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(f.registry.update(&host.id, bad).await.is_err());
        assert_eq!(f.registry.get(&host.id).await.unwrap().name, "web1-renamed");
    }

    #[tokio::test]
    async fn test_delete_purges_secret() {
        let f = fixture(StaticProbe::new(HostStatus::Online)).await;
        let host = f.registry.add(web1()).await.unwrap();

        assert!(f.registry.delete(&host.id).await);
        assert!(f.registry.get(&host.id).await.is_none());
        assert!(f.secrets.is_empty());
        assert_eq!(f.registry.get_status(&host.id), HostStatus::Unknown);

        assert!(!f.registry.delete(&host.id).await);
    }

    #[tokio::test]
    async fn test_touch_sets_last_used() {
        let f = fixture(StaticProbe::new(HostStatus::Online)).await;
        let host = f.registry.add(web1()).await.unwrap();
        assert!(host.last_used.is_none());

        assert!(f.registry.touch(&host.id).await);
        assert!(f.registry.get(&host.id).await.unwrap().last_used.is_some());
        assert!(!f.registry.touch("missing").await);
    }

    #[tokio::test]
    async fn test_local_hosts_always_online() {
        let f = fixture(StaticProbe::new(HostStatus::Offline)).await;
        for protocol in [Protocol::Local, Protocol::Wsl] {
            let mut host = Host::new("shell", "");
            host.connection.protocol = Some(protocol);
            let host = f.registry.add(host).await.unwrap();
            assert_eq!(f.registry.refresh_status(&host.id).await, HostStatus::Online);
        }
    }

    #[tokio::test]
    async fn test_refresh_emits_connecting_then_final() {
        let f = fixture(StaticProbe::new(HostStatus::Offline)).await;
        let host = f.registry.add(web1()).await.unwrap();
        let mut rx = f.registry.subscribe();

        assert_eq!(f.registry.refresh_status(&host.id).await, HostStatus::Offline);

        assert_eq!(
            rx.recv().await.unwrap(),
            RegistryEvent::HostStatusChanged {
                host_id: host.id.clone(),
                status: HostStatus::Connecting
            }
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            RegistryEvent::HostStatusChanged {
                host_id: host.id.clone(),
                status: HostStatus::Offline
            }
        );
    }

    #[tokio::test]
    async fn test_concurrent_refresh_settles() {
        let probe = StaticProbe::new(HostStatus::Online);
        let f = fixture(probe.clone()).await;
        let host = f.registry.add(web1()).await.unwrap();

        let (a, b) = tokio::join!(
            f.registry.refresh_status(&host.id),
            f.registry.refresh_status(&host.id)
        );

        assert_eq!(a, HostStatus::Online);
        assert_eq!(b, HostStatus::Online);
        assert_eq!(f.registry.get_status(&host.id), HostStatus::Online);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_delete_cancels_in_flight_probe() {
        let f = fixture(Arc::new(HangingProbe)).await;
        let host = f.registry.add(web1()).await.unwrap();

        let (status, deleted) = tokio::join!(f.registry.refresh_status(&host.id), async {
            tokio::task::yield_now().await;
            f.registry.delete(&host.id).await
        });

        assert!(deleted);
        assert_eq!(status, HostStatus::Unknown);
        assert_eq!(f.registry.get_status(&host.id), HostStatus::Unknown);
    }

    #[tokio::test]
    async fn test_record_status_emits_on_change_only() {
        let f = fixture(StaticProbe::new(HostStatus::Online)).await;
        let host = f.registry.add(web1()).await.unwrap();
        let mut rx = f.registry.subscribe();

        assert!(!f.registry.record_status(&host.id, HostStatus::Unknown));
        assert!(f.registry.record_status(&host.id, HostStatus::Online));
        assert!(!f.registry.record_status(&host.id, HostStatus::Online));
        assert!(!f.registry.record_status("deleted", HostStatus::Online));

        assert!(matches!(
            rx.try_recv().unwrap(),
            RegistryEvent::HostStatusChanged { status: HostStatus::Online, .. }
        ));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_groups_crud_and_effective_config() {
        let f = fixture(StaticProbe::new(HostStatus::Online)).await;
        f.registry
            .add_group(Group::with_defaults(
                "prod",
                HostDefaults {
                    connection: Some(ConnectionConfig {
                        port: Some(2222),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
            ))
            .await
            .unwrap();
        assert!(matches!(
            f.registry.add_group(Group::new("prod")).await,
            Err(RegistryError::DuplicateGroup(_))
        ));

        let mut host = Host::new("api", "api.lan");
        host.group = Some("prod".into());
        let host = f.registry.add(host).await.unwrap();
        assert_eq!(f.registry.get_effective_config(&host).connection.port, Some(2222));

        f.registry
            .update_group(
                "prod",
                HostDefaults {
                    tags: Some(vec!["prod".into()]),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        let effective = f.registry.get_effective_config(&host);
        assert_eq!(effective.connection.port, Some(2222));
        assert_eq!(effective.tags, vec!["prod".to_string()]);

        // no cascade: the host stays, its reference dangles
        assert!(f.registry.delete_group("prod").await);
        let stored = f.registry.get(&host.id).await.unwrap();
        assert_eq!(stored.group.as_deref(), Some("prod"));
        assert_eq!(f.registry.get_effective_config(&stored).connection.port, None);
    }

    #[tokio::test]
    async fn test_import_own_export_gets_fresh_ids() {
        let f = fixture(StaticProbe::new(HostStatus::Online)).await;
        let mut host = web1();
        host.id = "abc".into();
        let data = exchange::export(&[host], false).unwrap();

        let result = f.registry.import(ImportSource::Labonair, &data).await.unwrap();
        assert_eq!(result.hosts.len(), 1);
        assert!(result.errors.is_empty());

        let listed = f.registry.list().await;
        assert_eq!(listed.len(), 1);
        assert_ne!(listed[0].id, "abc");
        assert!(listed[0].has_tag(crate::config::IMPORTED_TAG));
        let created = listed[0].created.unwrap();
        assert!(Utc::now().signed_duration_since(created).num_seconds() < 60);
    }

    #[tokio::test]
    async fn test_export_selected_and_encrypted() {
        let f = fixture(StaticProbe::new(HostStatus::Online)).await;
        let a = f.registry.add(web1()).await.unwrap();
        f.registry.add(Host::new("other", "other.lan")).await.unwrap();

        let json = f.registry.export(&[a.id.clone()], false).await.unwrap();
        let file: exchange::ExportFile = serde_json::from_str(&json).unwrap();
        assert_eq!(file.hosts.len(), 1);
        assert_eq!(file.hosts[0].id, a.id);

        let all: exchange::ExportFile =
            serde_json::from_str(&f.registry.export(&[], false).await.unwrap()).unwrap();
        assert_eq!(all.hosts.len(), 2);

        assert!(matches!(
            f.registry.export(&[], true).await,
            Err(RegistryError::Exchange(exchange::ExchangeError::Unsupported(_)))
        ));
    }

    #[tokio::test]
    async fn test_ssh_config_hosts_listed_and_adopted() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("config");
        std::fs::write(&path, "Host bastion\n  HostName bastion.lan\n  User ops\n").unwrap();

        let f = fixture(StaticProbe::new(HostStatus::Online)).await;
        let bridge = Arc::new(SshConfigBridge::with_path(Some(path), f.registry.events().clone()));
        let registry = f.registry.with_ssh_config(bridge);

        let listed = registry.list().await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, "ssh-config:bastion");
        assert!(registry.get("ssh-config:bastion").await.is_some());

        // read-only: nothing persisted
        assert!(f.records.raw("labonair.hosts").is_none());

        let adopted = registry.adopt_system_host("ssh-config:bastion").await.unwrap();
        assert!(!is_system_host_id(&adopted.id));
        assert_eq!(registry.list().await.len(), 2);
        assert!(f.records.raw("labonair.hosts").unwrap().contains(&adopted.id));

        assert!(matches!(
            registry.adopt_system_host("ssh-config:nope").await,
            Err(RegistryError::NotSystemHost(_))
        ));

        assert_eq!(registry.refresh_status("ssh-config:bastion").await, HostStatus::Online);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_refresh_restores_status() {
        let f = fixture(Arc::new(SlowProbe)).await;
        let host = f.registry.add(web1()).await.unwrap();
        f.registry.record_status(&host.id, HostStatus::Offline);

        let abandoned = tokio::time::timeout(
            Duration::from_millis(10),
            f.registry.refresh_status(&host.id),
        )
        .await;
        assert!(abandoned.is_err());
        assert_eq!(f.registry.get_status(&host.id), HostStatus::Offline);

        // the next sweep probes it again
        assert_eq!(crate::health::sweep(&f.registry).await, 1);
        assert_eq!(f.registry.get_status(&host.id), HostStatus::Online);
    }

    #[tokio::test]
    async fn test_concurrent_add_same_id() {
        let registry = HostRegistry::load(
            Arc::new(MemoryRecordStore::new()),
            Arc::new(YieldingSecrets::default()),
            &Settings::default(),
            EventEmitter::default(),
        )
        .await;

        let mut a = web1();
        a.id = "fixed".into();
        a.name = "a".into();
        let mut b = a.clone();
        b.name = "b".into();

        let (ra, rb) = tokio::join!(registry.add(a), registry.add(b));
        assert!(ra.is_ok());
        assert!(matches!(rb, Err(RegistryError::DuplicateHost(_))));

        let listed = registry.list().await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "a");

        // the id is free again once the host is gone
        assert!(registry.delete("fixed").await);
        let mut again = web1();
        again.id = "fixed".into();
        assert!(registry.add(again).await.is_ok());
    }

    #[tokio::test]
    async fn test_failed_persist_keeps_memory_state() {
        let registry = HostRegistry::load(
            Arc::new(ReadOnlyRecords),
            Arc::new(MemorySecretStore::new()),
            &Settings::default(),
            EventEmitter::default(),
        )
        .await;
        let mut rx = registry.subscribe();

        let a = registry.add(web1()).await.unwrap();
        let b = registry.add(Host::new("b", "b.lan")).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), RegistryEvent::HostsChanged);

        registry.update(&a.id, HostPatch::name("renamed")).await.unwrap();
        assert_eq!(registry.get(&a.id).await.unwrap().name, "renamed");

        assert!(registry.delete(&b.id).await);
        let listed = registry.list().await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "renamed");

        registry.add_group(Group::new("prod")).await.unwrap();
        assert_eq!(registry.list_groups().len(), 1);
    }

    #[tokio::test]
    async fn test_group_defaults_validated() {
        let f = fixture(StaticProbe::new(HostStatus::Online)).await;
        let bad_port = HostDefaults {
            connection: Some(ConnectionConfig {
                port: Some(0),
                ..Default::default()
            }),
            ..Default::default()
        };

        assert!(matches!(
            f.registry
                .add_group(Group::with_defaults("g", bad_port.clone()))
                .await,
            Err(RegistryError::InvalidGroup(_))
        ));
        assert!(f.registry.list_groups().is_empty());

        f.registry.add_group(Group::new("g")).await.unwrap();
        assert!(matches!(
            f.registry.update_group("g", bad_port).await,
            Err(RegistryError::InvalidGroup(_))
        ));
        let bad_tunnel = HostDefaults {
            tunnels: Some(vec![Tunnel::dynamic(0)]),
            ..Default::default()
        };
        assert!(f.registry.update_group("g", bad_tunnel).await.is_err());
        assert_eq!(f.registry.get_group("g").unwrap().defaults, None);

        assert!(f
            .registry
            .update_group("missing", HostDefaults::default())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_vanished_alias_entries_pruned() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("config");
        std::fs::write(&path, "Host a\n  HostName a.lan\nHost b\n  HostName b.lan\n").unwrap();

        let f = fixture(StaticProbe::new(HostStatus::Online)).await;
        let bridge = Arc::new(SshConfigBridge::with_path(
            Some(path.clone()),
            f.registry.events().clone(),
        ));
        let registry = f.registry.with_ssh_config(Arc::clone(&bridge));

        assert_eq!(registry.refresh_status("ssh-config:b").await, HostStatus::Online);
        assert!(registry.probe_tokens.contains_key("ssh-config:b"));

        std::fs::write(&path, "Host a\n  HostName a.lan\n").unwrap();
        bridge.invalidate();

        assert_eq!(registry.list().await.len(), 1);
        assert!(!registry.status.contains_key("ssh-config:b"));
        assert!(!registry.probe_tokens.contains_key("ssh-config:b"));
        assert!(!registry.record_status("ssh-config:b", HostStatus::Offline));
        assert!(registry.record_status("ssh-config:a", HostStatus::Online));
    }
}
