//! Registry Event System
//!
//! Change notifications for hosts, host status and identities. Subscribers
//! get a `broadcast::Receiver`; dropping it unsubscribes. Nothing is sent while
//! nobody is listening.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::config::HostStatus;

/// Default per-subscriber buffer
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Events emitted by the registries
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RegistryEvent {
    /// Host or group records changed (also fired when ~/.ssh/config changes)
    HostsChanged,
    /// Cached reachability of a host changed
    #[serde(rename_all = "camelCase")]
    HostStatusChanged { host_id: String, status: HostStatus },
    /// Identity records changed
    IdentitiesChanged,
}

/// Cloneable handle for emitting and subscribing to registry events
#[derive(Clone)]
pub struct EventEmitter {
    tx: broadcast::Sender<RegistryEvent>,
}

impl EventEmitter {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Start receiving events. Drop the receiver to unsubscribe.
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Emit an event to current subscribers
    pub fn emit(&self, event: RegistryEvent) {
        if self.tx.receiver_count() == 0 {
            return;
        }
        if self.tx.send(event).is_err() {
            tracing::trace!("Registry event dropped: all subscribers gone");
        }
    }

    pub fn emit_hosts_changed(&self) {
        self.emit(RegistryEvent::HostsChanged);
    }

    pub fn emit_status_changed(&self, host_id: &str, status: HostStatus) {
        self.emit(RegistryEvent::HostStatusChanged {
            host_id: host_id.to_string(),
            status,
        });
    }

    pub fn emit_identities_changed(&self) {
        self.emit(RegistryEvent::IdentitiesChanged);
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("subscribers", &self.tx.receiver_count())
            .finish()
    }
}
