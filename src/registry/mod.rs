//! Host and Identity Registries
//!
//! In-memory record sets backed by the record store, with change events and
//! group inheritance.

pub mod error;
pub mod events;
mod guard;
pub mod host;
pub mod identity;
pub mod inherit;

pub use error::RegistryError;
pub use events::{EventEmitter, RegistryEvent, DEFAULT_EVENT_CAPACITY};
pub use host::HostRegistry;
pub use identity::IdentityRegistry;
pub use inherit::{effective_config, Overlay};
