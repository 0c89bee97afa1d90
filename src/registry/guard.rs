//! RAII guards for registry operations that span an `.await`

use std::collections::HashSet;

use dashmap::DashMap;
use parking_lot::Mutex;

use super::events::EventEmitter;
use crate::config::HostStatus;

/// Ids claimed by adds that are still writing secrets
#[derive(Debug, Default)]
pub(crate) struct PendingIds {
    ids: Mutex<HashSet<String>>,
}

impl PendingIds {
    /// Claim `id` unless another add holds it or `taken` reports it stored
    ///
    /// `taken` runs under the claim lock, so a check-then-claim cannot interleave.
    pub(crate) fn claim(&self, id: &str, taken: impl FnOnce() -> bool) -> Option<IdClaim<'_>> {
        let mut ids = self.ids.lock();
        if ids.contains(id) || taken() {
            return None;
        }
        ids.insert(id.to_string());
        Some(IdClaim {
            pending: self,
            id: id.to_string(),
        })
    }
}

/// Releases a claimed id on drop, on every return path and on cancellation
pub(crate) struct IdClaim<'a> {
    pending: &'a PendingIds,
    id: String,
}

impl Drop for IdClaim<'_> {
    fn drop(&mut self) {
        self.pending.ids.lock().remove(&self.id);
    }
}

/// Puts a settled status back if a refresh ends while the cache still says `connecting`
///
/// Covers a refresh whose future is dropped mid-probe, so the sweep never
/// skips the host forever.
pub(crate) struct ConnectingGuard<'a> {
    status: &'a DashMap<String, HostStatus>,
    events: &'a EventEmitter,
    id: String,
    restore: HostStatus,
}

impl<'a> ConnectingGuard<'a> {
    /// Mark `id` as connecting; the previous settled value is kept for restore
    pub(crate) fn enter(
        status: &'a DashMap<String, HostStatus>,
        events: &'a EventEmitter,
        id: &str,
    ) -> Self {
        let restore = status
            .insert(id.to_string(), HostStatus::Connecting)
            .filter(|s| s.is_settled())
            .unwrap_or_default();
        events.emit_status_changed(id, HostStatus::Connecting);
        Self {
            status,
            events,
            id: id.to_string(),
            restore,
        }
    }
}

impl Drop for ConnectingGuard<'_> {
    fn drop(&mut self) {
        let restored = match self.status.get_mut(&self.id) {
            Some(mut slot) if *slot == HostStatus::Connecting => {
                *slot = self.restore;
                true
            }
            _ => false,
        };
        if restored {
            tracing::debug!("Host {} left connecting, restored {:?}", self.id, self.restore);
            self.events.emit_status_changed(&self.id, self.restore);
        }
    }
}
