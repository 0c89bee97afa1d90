//! Liveness Prober
//!
//! Background loop that probes every known host on a fixed period and
//! caches the result in the host registry. Hosts with a manual refresh in
//! flight (`connecting`) are skipped for that tick.
//!
//! The loop stops when:
//! 1. `stop()` is called
//! 2. The `LivenessProber` is dropped

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::registry::HostRegistry;

/// Default probing period
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(60);

/// Default bound on a single probe
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Probe all settled hosts once, concurrently
///
/// Returns how many cached statuses changed.
pub async fn sweep(registry: &HostRegistry) -> usize {
    let hosts: Vec<_> = registry
        .list()
        .await
        .into_iter()
        .filter(|h| registry.get_status(&h.id).is_settled())
        .collect();

    let results = join_all(hosts.iter().map(|host| async move {
        (host.id.as_str(), registry.probe(host).await)
    }))
    .await;

    let changed = results
        .into_iter()
        .filter_map(|(id, status)| status.map(|s| (id, s)))
        .filter(|(id, status)| registry.record_status(id, *status))
        .count();

    debug!("Liveness sweep: {} hosts probed, {} changed", hosts.len(), changed);
    changed
}

/// Handle to the periodic probing task
pub struct LivenessProber {
    registry: Arc<HostRegistry>,
    /// Sender to signal the probing loop to stop
    stop_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl LivenessProber {
    /// Start probing every `interval`. The first sweep runs one interval in.
    pub fn spawn(registry: Arc<HostRegistry>, interval: Duration) -> Self {
        let (stop_tx, stop_rx) = oneshot::channel();

        info!("Starting liveness prober (every {:?})", interval);
        let handle = tokio::spawn(probe_loop(Arc::clone(&registry), interval, stop_rx));

        Self {
            registry,
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        }
    }

    /// Probe all hosts now, outside the schedule
    pub async fn sweep_now(&self) -> usize {
        sweep(&self.registry).await
    }

    pub fn is_running(&self) -> bool {
        self.stop_tx.is_some() && self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Signal the probing loop to stop
    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        self.handle.take();
    }
}

impl Drop for LivenessProber {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn probe_loop(
    registry: Arc<HostRegistry>,
    period: Duration,
    mut stop_rx: oneshot::Receiver<()>,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // Skip the immediate first tick
    interval.tick().await;

    loop {
        tokio::select! {
            _ = interval.tick() => {
                sweep(&registry).await;
            }
            _ = &mut stop_rx => {
                debug!("Liveness prober stop requested");
                break;
            }
        }
    }

    info!("Liveness prober stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Host, HostStatus, MemoryRecordStore, MemorySecretStore, Settings};
    use crate::health::probe::{LivenessProbe, ProbeTarget};
    use crate::registry::{EventEmitter, RegistryEvent};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProbe {
        status: HostStatus,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LivenessProbe for CountingProbe {
        async fn probe(&self, _target: &ProbeTarget) -> HostStatus {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.status
        }
    }

    async fn registry(probe: Arc<CountingProbe>) -> Arc<HostRegistry> {
        let registry = HostRegistry::load(
            Arc::new(MemoryRecordStore::new()),
            Arc::new(MemorySecretStore::new()),
            &Settings::default(),
            EventEmitter::default(),
        )
        .await
        .with_probe(probe);
        Arc::new(registry)
    }

    fn counting(status: HostStatus) -> Arc<CountingProbe> {
        Arc::new(CountingProbe {
            status,
            calls: AtomicUsize::new(0),
        })
    }

    #[tokio::test]
    async fn test_sweep_emits_only_changes() {
        let probe = counting(HostStatus::Online);
        let registry = registry(probe.clone()).await;
        let a = registry.add(Host::new("a", "a.lan")).await.unwrap();
        registry.add(Host::new("b", "b.lan")).await.unwrap();
        let mut rx = registry.subscribe();

        assert_eq!(sweep(&registry).await, 2);
        assert_eq!(sweep(&registry).await, 0);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 4);
        assert_eq!(registry.get_status(&a.id), HostStatus::Online);

        let mut events = 0;
        while let Ok(event) = rx.try_recv() {
            assert!(matches!(event, RegistryEvent::HostStatusChanged { .. }));
            events += 1;
        }
        assert_eq!(events, 2);
    }

    #[tokio::test]
    async fn test_sweep_skips_connecting() {
        let probe = counting(HostStatus::Online);
        let registry = registry(probe.clone()).await;
        let a = registry.add(Host::new("a", "a.lan")).await.unwrap();
        registry.record_status(&a.id, HostStatus::Connecting);

        assert_eq!(sweep(&registry).await, 0);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 0);
        assert_eq!(registry.get_status(&a.id), HostStatus::Connecting);
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_loop() {
        let probe = counting(HostStatus::Offline);
        let registry = registry(probe.clone()).await;
        let a = registry.add(Host::new("a", "a.lan")).await.unwrap();

        let mut prober = LivenessProber::spawn(registry.clone(), DEFAULT_PROBE_INTERVAL);
        assert!(prober.is_running());

        // no sweep at start
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(probe.calls.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(probe.calls.load(Ordering::SeqCst), 1);
        assert_eq!(registry.get_status(&a.id), HostStatus::Offline);

        prober.stop();
        assert!(!prober.is_running());

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(probe.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_sweep_now() {
        let probe = counting(HostStatus::Online);
        let registry = registry(probe.clone()).await;
        registry.add(Host::new("a", "a.lan")).await.unwrap();

        let prober = LivenessProber::spawn(registry, Duration::from_secs(3600));
        assert_eq!(prober.sweep_now().await, 1);
    }
}
