//! Identity Registry
//!
//! Reusable credentials. Metadata is persisted as a JSON collection; the
//! private key text, password and passphrase only ever go to the secret store.
//! Secrets are written before the metadata record, so a listed identity
//! always has its material.

use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use uuid::Uuid;

use super::error::RegistryError;
use super::events::EventEmitter;
use super::guard::PendingIds;
use crate::config::{
    load_collection, save_collection, Identity, IdentityPatch, KeychainError, RecordStore,
    SecretKeys, SecretStore, Settings,
};

pub struct IdentityRegistry {
    records: Arc<dyn RecordStore>,
    secrets: Arc<dyn SecretStore>,
    keys: SecretKeys,
    identities_key: String,
    events: EventEmitter,
    identities: RwLock<Vec<Identity>>,
    /// Ids of adds still writing secrets
    pending: PendingIds,
}

impl IdentityRegistry {
    pub async fn load(
        records: Arc<dyn RecordStore>,
        secrets: Arc<dyn SecretStore>,
        settings: &Settings,
        events: EventEmitter,
    ) -> Self {
        let identities_key = settings.identities_key();
        let identities: Vec<Identity> = load_collection(records.as_ref(), &identities_key).await;
        tracing::info!("Identity registry loaded: {} identities", identities.len());

        Self {
            records,
            secrets,
            keys: SecretKeys::new(settings.namespace.clone()),
            identities_key,
            events,
            identities: RwLock::new(identities),
            pending: PendingIds::default(),
        }
    }

    pub fn list(&self) -> Vec<Identity> {
        self.identities.read().clone()
    }

    pub fn get(&self, id: &str) -> Option<Identity> {
        self.identities.read().iter().find(|i| i.id == id).cloned()
    }

    fn contains(&self, id: &str) -> bool {
        self.identities.read().iter().any(|i| i.id == id)
    }

    /// Store a new identity and its private material
    ///
    /// `private_data` is the key text or the password. A failed secret write
    /// aborts the add and leaves nothing behind.
    pub async fn add(
        &self,
        mut identity: Identity,
        private_data: &str,
        passphrase: Option<&str>,
    ) -> Result<Identity, RegistryError> {
        if identity.id.is_empty() {
            identity.id = Uuid::new_v4().to_string();
        }

        // held until the metadata is in, so no other add writes this id's slots meanwhile
        let _claim = self
            .pending
            .claim(&identity.id, || self.contains(&identity.id))
            .ok_or_else(|| RegistryError::DuplicateIdentity(identity.id.clone()))?;
        identity.created_at.get_or_insert_with(Utc::now);

        let primary_key = self.keys.identity(&identity.id);
        self.secrets.set(&primary_key, private_data).await?;

        if let Some(passphrase) = passphrase {
            let passphrase_key = self.keys.identity_passphrase(&identity.id);
            if let Err(e) = self.secrets.set(&passphrase_key, passphrase).await {
                if let Err(cleanup) = self.secrets.delete(&primary_key).await {
                    tracing::error!(
                        "Failed to remove orphaned secret of identity {}: {}",
                        identity.id,
                        cleanup
                    );
                }
                return Err(e.into());
            }
        }

        self.identities.write().push(identity.clone());

        tracing::info!("Identity added: {} ({})", identity.name, identity.id);
        self.save().await;
        self.events.emit_identities_changed();
        Ok(identity)
    }

    /// Merge metadata changes. Unknown ids are logged and yield `None`.
    pub async fn update(&self, id: &str, patch: IdentityPatch) -> Option<Identity> {
        let updated = {
            let mut identities = self.identities.write();
            let Some(identity) = identities.iter_mut().find(|i| i.id == id) else {
                tracing::warn!("Update of unknown identity {}", id);
                return None;
            };
            patch.apply(identity);
            identity.clone()
        };

        self.save().await;
        self.events.emit_identities_changed();
        Some(updated)
    }

    /// Remove the metadata, then both secret slots
    pub async fn delete(&self, id: &str) -> bool {
        let removed = {
            let mut identities = self.identities.write();
            let before = identities.len();
            identities.retain(|i| i.id != id);
            identities.len() != before
        };

        if !removed {
            tracing::warn!("Delete of unknown identity {}", id);
            return false;
        }

        self.save().await;

        for key in [self.keys.identity(id), self.keys.identity_passphrase(id)] {
            if let Err(e) = self.secrets.delete(&key).await {
                tracing::error!("Failed to purge secret {}: {}", key, e);
            }
        }

        tracing::info!("Identity deleted: {}", id);
        self.events.emit_identities_changed();
        true
    }

    /// Private key text of an ssh-key identity
    pub async fn get_private_key(&self, id: &str) -> Result<Option<String>, KeychainError> {
        self.secrets.get(&self.keys.identity(id)).await
    }

    /// Password of a password identity (same slot as the private key)
    pub async fn get_password(&self, id: &str) -> Result<Option<String>, KeychainError> {
        self.secrets.get(&self.keys.identity(id)).await
    }

    pub async fn get_passphrase(&self, id: &str) -> Result<Option<String>, KeychainError> {
        self.secrets.get(&self.keys.identity_passphrase(id)).await
    }

    async fn save(&self) {
        let snapshot = self.identities.read().clone();
        save_collection(self.records.as_ref(), &self.identities_key, &snapshot).await;
    }
}
