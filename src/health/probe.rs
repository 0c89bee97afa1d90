//! Liveness Probes
//!
//! Best-effort reachability checks behind the `LivenessProbe` strategy trait.
//! A probe never fails: anything inconclusive is reported as `Unknown`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::config::{Host, HostStatus, ProbeStrategy};

/// Where a probe should look
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTarget {
    pub host_id: String,
    pub address: String,
    pub port: u16,
}

impl ProbeTarget {
    /// Target of an SSH host; `None` when it has no address to probe
    pub fn from_host(host: &Host) -> Option<Self> {
        Some(Self {
            host_id: host.id.clone(),
            address: host.connection.address()?.to_string(),
            port: host.connection.effective_port(),
        })
    }

    /// Address usable in a URL authority (IPv6 literals bracketed)
    fn url_host(&self) -> String {
        if self.address.contains(':') && !self.address.starts_with('[') {
            format!("[{}]", self.address)
        } else {
            self.address.clone()
        }
    }
}

/// Reachability check strategy
#[async_trait]
pub trait LivenessProbe: Send + Sync {
    async fn probe(&self, target: &ProbeTarget) -> HostStatus;
}

/// HEAD request against `https://<host>` then `http://<host>`
///
/// Any HTTP response, error status included, counts as reachable. No response
/// proves nothing about the SSH port, so failure is `Unknown`, never `Offline`.
pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .danger_accept_invalid_certs(true)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self { client })
    }

    fn urls(target: &ProbeTarget) -> [String; 2] {
        let host = target.url_host();
        [format!("https://{}", host), format!("http://{}", host)]
    }
}

#[async_trait]
impl LivenessProbe for HttpProbe {
    async fn probe(&self, target: &ProbeTarget) -> HostStatus {
        for url in Self::urls(target) {
            match self.client.head(&url).send().await {
                Ok(resp) => {
                    tracing::debug!("HTTP probe {} -> {}", url, resp.status());
                    return HostStatus::Online;
                }
                Err(e) => tracing::debug!("HTTP probe {} failed: {}", url, e),
            }
        }
        HostStatus::Unknown
    }
}

/// TCP connect to the host's SSH port
pub struct TcpProbe {
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl LivenessProbe for TcpProbe {
    async fn probe(&self, target: &ProbeTarget) -> HostStatus {
        let addr = format!("{}:{}", target.url_host(), target.port);
        match timeout(self.timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(_)) => HostStatus::Online,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
                tracing::debug!("TCP probe {} refused", addr);
                HostStatus::Offline
            }
            Ok(Err(e)) => {
                tracing::debug!("TCP probe {} failed: {}", addr, e);
                HostStatus::Unknown
            }
            Err(_) => {
                tracing::debug!("TCP probe {} timed out", addr);
                HostStatus::Unknown
            }
        }
    }
}

/// Probe for the configured strategy
pub fn build_probe(strategy: ProbeStrategy, probe_timeout: Duration) -> Arc<dyn LivenessProbe> {
    match strategy {
        ProbeStrategy::Http => match HttpProbe::new(probe_timeout) {
            Ok(probe) => Arc::new(probe),
            Err(e) => {
                tracing::warn!("HTTP probe unavailable ({}), using TCP probe", e);
                Arc::new(TcpProbe::new(probe_timeout))
            }
        },
        ProbeStrategy::Tcp => Arc::new(TcpProbe::new(probe_timeout)),
    }
}

/// Probe one host
///
/// Local and WSL hosts are always online. The strategy is bounded by
/// `probe_timeout`; running out of time yields `Unknown`.
pub async fn check_host(
    probe: &dyn LivenessProbe,
    host: &Host,
    probe_timeout: Duration,
) -> HostStatus {
    if host.connection.effective_protocol().is_local() {
        return HostStatus::Online;
    }

    let Some(target) = ProbeTarget::from_host(host) else {
        tracing::debug!("Host {} has no address, status unknown", host.id);
        return HostStatus::Unknown;
    };

    match timeout(probe_timeout, probe.probe(&target)).await {
        Ok(status) => status,
        Err(_) => {
            tracing::debug!("Probe of {} timed out after {:?}", host.id, probe_timeout);
            HostStatus::Unknown
        }
    }
}
