//! Configuration Management Module
//!
//! Record shapes, persistent record storage, secret storage via the system
//! keychain, library settings and the read-only ~/.ssh/config bridge.

pub mod keychain;
pub mod settings;
pub mod ssh_config;
pub mod storage;
pub mod types;

#[cfg(feature = "keychain")]
pub use keychain::Keychain;
pub use keychain::{KeychainError, MemorySecretStore, SecretKeys, SecretStore, SERVICE_NAME};
pub use settings::{ProbeStrategy, Settings, SETTINGS_VERSION};
pub use ssh_config::{
    convert_to_host, default_ssh_config_path, is_system_host_id, parse_ssh_config,
    parse_ssh_config_content, system_host_id, SshConfigBridge, SshConfigError, SshConfigHost,
    SSH_CONFIG_TAG, SYSTEM_ID_PREFIX,
};
pub use storage::{
    config_dir, load_collection, save_collection, state_file, FileRecordStore, MemoryRecordStore,
    RecordStore, StorageError,
};
pub use types::{
    AdvancedConfig, AuthConfig, AuthType, ConnectionConfig, CursorStyle, Group, Host,
    HostDefaults, HostPatch, HostStatus, Identity, IdentityKind, IdentityPatch, Protocol,
    SftpConfig, TerminalConfig, Tunnel, TunnelType, DEFAULT_ENCODING, DEFAULT_SSH_PORT,
    IMPORTED_TAG,
};
