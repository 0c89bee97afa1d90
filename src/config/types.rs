//! Host, Group and Identity Records
//!
//! These are the persisted shapes (camelCase JSON). Sub-object fields are
//! optional so that a group's defaults can fill whatever a host leaves unset;
//! see `registry::inherit` for the resolution rules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Port used when neither the host nor its group sets one
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Terminal encoding used when nothing else is configured
pub const DEFAULT_ENCODING: &str = "auto";

/// Tag stamped on every record that came in through an import
pub const IMPORTED_TAG: &str = "imported";

/// Transport used to reach a host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Ssh,
    Local,
    Wsl,
}

impl Protocol {
    /// Local shells and WSL distributions have no remote address to probe
    pub fn is_local(self) -> bool {
        matches!(self, Protocol::Local | Protocol::Wsl)
    }
}

/// Connection endpoint
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConnectionConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os_icon: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<Protocol>,
}

impl ConnectionConfig {
    /// Effective port (port or 22)
    pub fn effective_port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_SSH_PORT)
    }

    /// Effective protocol (protocol or ssh)
    pub fn effective_protocol(&self) -> Protocol {
        self.protocol.unwrap_or_default()
    }

    /// Remote address, if one is set and non-empty
    pub fn address(&self) -> Option<&str> {
        self.host.as_deref().map(str::trim).filter(|h| !h.is_empty())
    }
}

/// Authentication method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    #[default]
    Password,
    Key,
    Agent,
    IdentityRef,
}

/// Authentication settings. Secrets are never stored here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AuthConfig {
    #[serde(rename = "type")]
    pub auth_type: AuthType,
    /// Weak reference to an Identity; required for `identity_ref`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity_id: Option<String>,
    /// Private key file (IdentityFile) for `key` auth
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_path: Option<String>,
}

/// Less common connection knobs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AdvancedConfig {
    /// Weak reference to another Host used as a bastion
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jump_host_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy_command: Option<String>,
    /// Seconds between keepalives
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keep_alive_interval: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_auth_tries: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_exec_script: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CursorStyle {
    #[default]
    Block,
    Underline,
    Bar,
}

/// Terminal presentation preferences
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TerminalConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub font_family: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub font_size: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor_style: Option<CursorStyle>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor_blink: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scrollback: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub copy_on_select: Option<bool>,
}

/// File transfer preferences
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SftpConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_remote_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_local_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub show_hidden_files: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preserve_timestamps: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concurrent_transfers: Option<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TunnelType {
    Local,
    Remote,
    Dynamic,
}

/// Port forward definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tunnel {
    #[serde(rename = "type")]
    pub tunnel_type: TunnelType,
    pub local_port: u16,
    /// Ignored for dynamic (SOCKS) tunnels
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_host: Option<String>,
    /// Ignored for dynamic (SOCKS) tunnels
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_port: Option<u16>,
}

impl Tunnel {
    pub fn dynamic(local_port: u16) -> Self {
        Self {
            tunnel_type: TunnelType::Dynamic,
            local_port,
            remote_host: None,
            remote_port: None,
        }
    }
}

/// Cached reachability of a host. Not authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostStatus {
    Online,
    Offline,
    #[default]
    Unknown,
    Connecting,
}

impl HostStatus {
    /// Anything but `connecting`
    pub fn is_settled(self) -> bool {
        !matches!(self, HostStatus::Connecting)
    }
}

/// A connection target
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Host {
    /// Empty until the registry assigns one
    #[serde(default)]
    pub id: String,
    pub name: String,
    /// Weak reference to a Group by name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advanced: Option<AdvancedConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tunnels: Option<Vec<Tunnel>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminal: Option<TerminalConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sftp: Option<SftpConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<HostStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used: Option<DateTime<Utc>>,
}

impl Host {
    /// Create an SSH host pointing at `address`
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            connection: ConnectionConfig {
                host: Some(address.into()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// Check port ranges and required references
    pub fn validate(&self) -> Result<(), String> {
        let owner = format!("host '{}'", self.name);
        validate_connection(&owner, Some(&self.connection))?;
        validate_tunnels(&owner, self.tunnels.as_deref())?;
        validate_auth(&owner, Some(&self.auth))
    }
}

fn validate_connection(owner: &str, connection: Option<&ConnectionConfig>) -> Result<(), String> {
    if connection.and_then(|c| c.port) == Some(0) {
        return Err(format!("{}: port must be in 1-65535", owner));
    }
    Ok(())
}

fn validate_tunnels(owner: &str, tunnels: Option<&[Tunnel]>) -> Result<(), String> {
    for (i, tunnel) in tunnels.unwrap_or_default().iter().enumerate() {
        if tunnel.local_port == 0 {
            return Err(format!(
                "{}: tunnel #{} local port must be in 1-65535",
                owner,
                i + 1
            ));
        }
        if tunnel.tunnel_type != TunnelType::Dynamic && tunnel.remote_port == Some(0) {
            return Err(format!(
                "{}: tunnel #{} remote port must be in 1-65535",
                owner,
                i + 1
            ));
        }
    }
    Ok(())
}

fn validate_auth(owner: &str, auth: Option<&AuthConfig>) -> Result<(), String> {
    match auth {
        Some(auth) if auth.auth_type == AuthType::IdentityRef && auth.identity_id.is_none() => Err(
            format!("{}: identity_ref auth requires an identityId", owner),
        ),
        _ => Ok(()),
    }
}

/// Partial host used as a group template
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HostDefaults {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection: Option<ConnectionConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub advanced: Option<AdvancedConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terminal: Option<TerminalConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sftp: Option<SftpConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tunnels: Option<Vec<Tunnel>>,
}

impl HostDefaults {
    /// Same port and reference rules as [`Host::validate`], for whatever is set
    pub fn validate(&self, group: &str) -> Result<(), String> {
        let owner = format!("group '{}'", group);
        validate_connection(&owner, self.connection.as_ref())?;
        validate_tunnels(&owner, self.tunnels.as_deref())?;
        validate_auth(&owner, self.auth.as_ref())
    }

    /// Shallow merge: every sub-object present in `patch` replaces ours
    pub fn merge(&mut self, patch: HostDefaults) {
        if patch.connection.is_some() {
            self.connection = patch.connection;
        }
        if patch.auth.is_some() {
            self.auth = patch.auth;
        }
        if patch.advanced.is_some() {
            self.advanced = patch.advanced;
        }
        if patch.terminal.is_some() {
            self.terminal = patch.terminal;
        }
        if patch.sftp.is_some() {
            self.sftp = patch.sftp;
        }
        if patch.tags.is_some() {
            self.tags = patch.tags;
        }
        if patch.tunnels.is_some() {
            self.tunnels = patch.tunnels;
        }
    }
}

/// Named bundle of defaults inherited by member hosts
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub defaults: Option<HostDefaults>,
}

impl Group {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            defaults: None,
        }
    }

    pub fn with_defaults(name: impl Into<String>, defaults: HostDefaults) -> Self {
        Self {
            name: name.into(),
            defaults: Some(defaults),
        }
    }
}

/// Partial update for a host. Present fields replace the stored ones.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HostPatch {
    pub name: Option<String>,
    pub group: Option<String>,
    pub tags: Option<Vec<String>>,
    pub connection: Option<ConnectionConfig>,
    pub auth: Option<AuthConfig>,
    pub advanced: Option<AdvancedConfig>,
    pub tunnels: Option<Vec<Tunnel>>,
    pub terminal: Option<TerminalConfig>,
    pub sftp: Option<SftpConfig>,
    pub notes: Option<String>,
    pub last_used: Option<DateTime<Utc>>,
}

impl HostPatch {
    pub fn name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    /// Shallow merge onto `host`. `id`, `created` and `status` are never touched.
    pub fn apply(self, host: &mut Host) {
        if let Some(name) = self.name {
            host.name = name;
        }
        if let Some(group) = self.group {
            host.group = Some(group).filter(|g| !g.is_empty());
        }
        if let Some(tags) = self.tags {
            host.tags = tags;
        }
        if let Some(connection) = self.connection {
            host.connection = connection;
        }
        if let Some(auth) = self.auth {
            host.auth = auth;
        }
        if self.advanced.is_some() {
            host.advanced = self.advanced;
        }
        if self.tunnels.is_some() {
            host.tunnels = self.tunnels;
        }
        if self.terminal.is_some() {
            host.terminal = self.terminal;
        }
        if self.sftp.is_some() {
            host.sftp = self.sftp;
        }
        if self.notes.is_some() {
            host.notes = self.notes;
        }
        if self.last_used.is_some() {
            host.last_used = self.last_used;
        }
    }
}

/// Kind of credential an identity holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IdentityKind {
    #[default]
    SshKey,
    Password,
}

/// Reusable credential metadata. The private material lives in the secret store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: IdentityKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Identity {
    pub fn new(name: impl Into<String>, kind: IdentityKind) -> Self {
        Self {
            name: name.into(),
            kind,
            ..Default::default()
        }
    }
}

/// Partial update for an identity's metadata
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct IdentityPatch {
    pub name: Option<String>,
    pub public_key: Option<String>,
    pub comment: Option<String>,
}

impl IdentityPatch {
    pub fn apply(self, identity: &mut Identity) {
        if let Some(name) = self.name {
            identity.name = name;
        }
        if self.public_key.is_some() {
            identity.public_key = self.public_key;
        }
        if self.comment.is_some() {
            identity.comment = self.comment;
        }
    }
}
