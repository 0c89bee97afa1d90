//! Labonair Hosts - remote host connectivity core
//!
//! Host and group registry with group inheritance, reusable credential
//! identities, background liveness probing, a read-only bridge to
//! ~/.ssh/config and host import/export.

pub mod config;
pub mod exchange;
pub mod health;
pub mod registry;
pub mod service;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use config::{Group, Host, HostStatus, Identity, Settings};
pub use exchange::{ImportResult, ImportSource};
pub use health::{LivenessProbe, LivenessProber};
pub use registry::{EventEmitter, HostRegistry, IdentityRegistry, RegistryError, RegistryEvent};
pub use service::{ConnectivityService, ServiceError};

/// Install a `tracing` subscriber: `RUST_LOG` filter (default `info`), fmt output
///
/// Embedders that bring their own subscriber should skip this.
pub fn init_logging() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();
}
