//! SSH Config Bridge
//!
//! Parses ~/.ssh/config into read-only host records that the host registry
//! appends to its listing, and watches the file so the listing refreshes when
//! it changes.
//! Supports:
//! - Basic: Host, HostName, User, Port, IdentityFile
//! - ProxyJump / ProxyCommand
//! - Port Forwarding: LocalForward, RemoteForward, DynamicForward

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::{Mutex, RwLock};
use tokio::fs;
use uuid::Uuid;

use super::types::{AdvancedConfig, AuthType, ConnectionConfig, Host, Tunnel, TunnelType};
use crate::registry::events::EventEmitter;

/// Tag carried by every host discovered in ~/.ssh/config
pub const SSH_CONFIG_TAG: &str = "ssh-config";

/// Id prefix of discovered hosts; the alias follows
pub const SYSTEM_ID_PREFIX: &str = "ssh-config:";

/// Id a discovered host gets for `alias`
pub fn system_host_id(alias: &str) -> String {
    format!("{}{}", SYSTEM_ID_PREFIX, alias)
}

/// Whether `id` names a host discovered in ~/.ssh/config
pub fn is_system_host_id(id: &str) -> bool {
    id.starts_with(SYSTEM_ID_PREFIX)
}

/// Port forwarding rule: "[bind_address:]port host:hostport"
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortForwardRule {
    pub bind_address: String,
    pub local_port: u16,
    pub remote_host: String,
    pub remote_port: u16,
}

impl PortForwardRule {
    pub fn parse(value: &str) -> Option<Self> {
        let parts: Vec<&str> = value.split_whitespace().collect();
        if parts.len() != 2 {
            return None;
        }

        let (bind_address, local_port) = match parts[0].rsplit_once(':') {
            Some((bind, port)) => (bind.to_string(), port.parse().ok()?),
            None => ("localhost".to_string(), parts[0].parse().ok()?),
        };

        let (remote_host, remote_port) = parts[1].rsplit_once(':')?;

        Some(PortForwardRule {
            bind_address,
            local_port,
            remote_host: remote_host.to_string(),
            remote_port: remote_port.parse().ok()?,
        })
    }

    fn into_tunnel(self, tunnel_type: TunnelType) -> Tunnel {
        Tunnel {
            tunnel_type,
            local_port: self.local_port,
            remote_host: Some(self.remote_host),
            remote_port: Some(self.remote_port),
        }
    }
}

/// One hop of a ProxyJump directive: "[user@]host[:port]"
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyJumpHost {
    pub user: Option<String>,
    pub host: String,
    pub port: u16,
}

impl ProxyJumpHost {
    pub fn parse(value: &str) -> Option<Self> {
        let (user, host_port) = match value.split_once('@') {
            Some((user, rest)) => (Some(user.to_string()), rest),
            None => (None, value),
        };

        let (host, port) = match host_port.rsplit_once(':') {
            Some((host, port)) => (host.to_string(), port.parse().unwrap_or(22)),
            None => (host_port.to_string(), 22),
        };

        if host.is_empty() {
            return None;
        }

        Some(ProxyJumpHost { user, host, port })
    }
}

/// A parsed SSH config host entry
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SshConfigHost {
    /// Host alias (the pattern after "Host")
    pub alias: String,
    pub hostname: Option<String>,
    pub user: Option<String>,
    pub port: Option<u16>,
    pub identity_file: Option<String>,
    pub proxy_jump: Vec<ProxyJumpHost>,
    pub proxy_command: Option<String>,
    pub local_forwards: Vec<PortForwardRule>,
    pub remote_forwards: Vec<PortForwardRule>,
    pub dynamic_forward: Option<u16>,
}

impl SshConfigHost {
    /// Get effective port (port or 22)
    pub fn effective_port(&self) -> u16 {
        self.port.unwrap_or(22)
    }

    /// Read-only host record for the registry listing
    pub fn to_host(&self) -> Host {
        let mut host = Host {
            id: system_host_id(&self.alias),
            name: self.alias.clone(),
            tags: vec![SSH_CONFIG_TAG.to_string()],
            connection: ConnectionConfig {
                host: self.hostname.clone(),
                port: Some(self.effective_port()),
                username: self.user.clone(),
                ..Default::default()
            },
            ..Default::default()
        };

        if let Some(ref key_path) = self.identity_file {
            host.auth.auth_type = AuthType::Key;
            host.auth.key_path = Some(key_path.clone());
        }

        let jump_host_id = self.proxy_jump.first().map(|hop| system_host_id(&hop.host));
        if jump_host_id.is_some() || self.proxy_command.is_some() {
            host.advanced = Some(AdvancedConfig {
                jump_host_id,
                proxy_command: self.proxy_command.clone(),
                ..Default::default()
            });
        }

        let mut tunnels: Vec<Tunnel> = self
            .local_forwards
            .iter()
            .cloned()
            .map(|rule| rule.into_tunnel(TunnelType::Local))
            .chain(
                self.remote_forwards
                    .iter()
                    .cloned()
                    .map(|rule| rule.into_tunnel(TunnelType::Remote)),
            )
            .collect();
        if let Some(port) = self.dynamic_forward {
            tunnels.push(Tunnel::dynamic(port));
        }
        if !tunnels.is_empty() {
            host.tunnels = Some(tunnels);
        }

        host
    }
}

/// SSH config errors
#[derive(Debug, thiserror::Error)]
pub enum SshConfigError {
    #[error("Failed to determine home directory")]
    NoHomeDir,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),
}

/// Get default SSH config path
pub fn default_ssh_config_path() -> Result<PathBuf, SshConfigError> {
    dirs::home_dir()
        .map(|home| home.join(".ssh").join("config"))
        .ok_or(SshConfigError::NoHomeDir)
}

/// Parse an SSH config file. A missing file yields no hosts.
pub async fn parse_ssh_config(path: &Path) -> Result<Vec<SshConfigHost>, SshConfigError> {
    let content = match fs::read_to_string(path).await {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(Vec::new());
        }
        Err(e) => return Err(SshConfigError::Io(e)),
    };

    Ok(parse_ssh_config_content(&content))
}

fn expand_home(value: &str) -> String {
    match (value.strip_prefix("~/"), dirs::home_dir()) {
        (Some(stripped), Some(home)) => home.join(stripped).to_string_lossy().into_owned(),
        _ => value.to_string(),
    }
}

fn is_wildcard(pattern: &str) -> bool {
    pattern.contains('*') || pattern.contains('?') || pattern.starts_with('!')
}

/// Parse SSH config content. Only entries with a HostName are returned.
pub fn parse_ssh_config_content(content: &str) -> Vec<SshConfigHost> {
    let mut hosts = Vec::new();
    let mut current_host: Option<SshConfigHost> = None;

    let finish = |host: Option<SshConfigHost>, hosts: &mut Vec<SshConfigHost>| {
        if let Some(host) = host {
            if host.hostname.is_some() {
                hosts.push(host);
            } else {
                tracing::debug!("ssh config: skipping '{}' without HostName", host.alias);
            }
        }
    };

    for line in content.lines() {
        let line = line.trim();

        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        // "Key Value" or "Key=Value"
        let mut parts = line.splitn(2, |c: char| c == '=' || c.is_whitespace());
        let (key, value) = match (parts.next(), parts.next()) {
            (Some(key), Some(rest)) => (
                key.trim(),
                rest.trim_start_matches(|c: char| c == '=' || c.is_whitespace())
                    .trim(),
            ),
            _ => continue,
        };
        if value.is_empty() {
            continue;
        }

        let key_lower = key.to_lowercase();

        if key_lower == "host" {
            finish(current_host.take(), &mut hosts);

            // "Host foo bar": take the first concrete alias
            current_host = value
                .split_whitespace()
                .find(|alias| !is_wildcard(alias))
                .map(|alias| SshConfigHost {
                    alias: alias.to_string(),
                    ..Default::default()
                });
        } else if key_lower == "match" {
            // Match blocks are conditional; nothing after them belongs to the last Host
            finish(current_host.take(), &mut hosts);
        } else if let Some(ref mut host) = current_host {
            match key_lower.as_str() {
                "hostname" => host.hostname = Some(value.to_string()),
                "user" => host.user = Some(value.to_string()),
                "port" => host.port = value.parse().ok().filter(|p| *p != 0),
                "identityfile" => host.identity_file = Some(expand_home(value)),
                // ProxyJump: comma-separated for multi-hop
                "proxyjump" => {
                    if !value.eq_ignore_ascii_case("none") {
                        host.proxy_jump = value
                            .split(',')
                            .filter_map(|jump| ProxyJumpHost::parse(jump.trim()))
                            .collect();
                    }
                }
                "proxycommand" => {
                    if !value.eq_ignore_ascii_case("none") {
                        host.proxy_command = Some(value.to_string());
                    }
                }
                "localforward" => {
                    if let Some(rule) = PortForwardRule::parse(value) {
                        host.local_forwards.push(rule);
                    }
                }
                "remoteforward" => {
                    if let Some(rule) = PortForwardRule::parse(value) {
                        host.remote_forwards.push(rule);
                    }
                }
                // DynamicForward: [bind_address:]port
                "dynamicforward" => {
                    let port_str = value.rsplit(':').next().unwrap_or(value);
                    host.dynamic_forward = port_str.parse().ok();
                }
                _ => {} // Ignore other directives
            }
        }
    }

    finish(current_host, &mut hosts);

    hosts
}

/// Detach a discovered host from ~/.ssh/config into an independently editable record
pub fn convert_to_host(system_host: &Host) -> Host {
    let mut host = system_host.clone();
    host.id = Uuid::new_v4().to_string();
    host.tags.retain(|t| t != SSH_CONFIG_TAG);
    host.created = Some(Utc::now());
    host.status = None;
    host
}

/// Read-only view of ~/.ssh/config with change watching
pub struct SshConfigBridge {
    path: Option<PathBuf>,
    cache: Arc<RwLock<Option<Vec<Host>>>>,
    watcher: Mutex<Option<RecommendedWatcher>>,
    events: EventEmitter,
}

impl SshConfigBridge {
    /// Bridge over the default ~/.ssh/config
    pub fn new(events: EventEmitter) -> Self {
        let path = match default_ssh_config_path() {
            Ok(path) => Some(path),
            Err(e) => {
                tracing::info!("SSH config unavailable: {}", e);
                None
            }
        };
        Self::with_path(path, events)
    }

    /// Bridge over a custom path; `None` behaves like a platform without ssh config
    pub fn with_path(path: Option<PathBuf>, events: EventEmitter) -> Self {
        Self {
            path,
            cache: Arc::new(RwLock::new(None)),
            watcher: Mutex::new(None),
            events,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// All concrete hosts of the config file, parsed on first use and cached
    pub async fn get_system_hosts(&self) -> Vec<Host> {
        let cached = self.cache.read().clone();
        if let Some(hosts) = cached {
            return hosts;
        }

        let Some(ref path) = self.path else {
            return Vec::new();
        };

        let hosts: Vec<Host> = match parse_ssh_config(path).await {
            Ok(entries) => entries.iter().map(SshConfigHost::to_host).collect(),
            Err(e) => {
                tracing::warn!("Failed to read SSH config {:?}: {}", path, e);
                return Vec::new();
            }
        };

        tracing::debug!("SSH config: {} hosts from {:?}", hosts.len(), path);
        *self.cache.write() = Some(hosts.clone());
        hosts
    }

    /// Look up a discovered host by alias or by its `ssh-config:` id
    pub async fn get_system_host(&self, alias_or_id: &str) -> Option<Host> {
        let alias = alias_or_id
            .strip_prefix(SYSTEM_ID_PREFIX)
            .unwrap_or(alias_or_id);
        self.get_system_hosts()
            .await
            .into_iter()
            .find(|h| h.name == alias)
    }

    /// Drop the cached parse; the next read re-parses the file
    pub fn invalidate(&self) {
        *self.cache.write() = None;
    }

    /// Whether `id` is among the cached hosts; an unloaded cache counts every id as live
    pub fn is_live(&self, id: &str) -> bool {
        match self.cache.read().as_ref() {
            Some(hosts) => hosts.iter().any(|h| h.id == id),
            None => true,
        }
    }

    pub fn is_watching(&self) -> bool {
        self.watcher.lock().is_some()
    }

    /// Watch the config file; changes invalidate the cache and emit `HostsChanged`
    ///
    /// The containing directory is watched so that editors replacing the file
    /// atomically are still seen. Without a config directory this is a no-op.
    pub fn start_watching(&self) -> Result<(), SshConfigError> {
        let mut slot = self.watcher.lock();
        if slot.is_some() {
            return Ok(());
        }

        let Some(ref path) = self.path else {
            return Ok(());
        };
        let Some(dir) = path.parent().filter(|d| d.is_dir()) else {
            tracing::info!("SSH config directory missing, not watching {:?}", path);
            return Ok(());
        };

        let target = path.clone();
        let cache = Arc::clone(&self.cache);
        let events = self.events.clone();

        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            match res {
                Ok(event) => {
                    // only the parent dir is watched, so the file name identifies the target
                    let touches_target = event
                        .paths
                        .iter()
                        .any(|p| p == &target || p.file_name() == target.file_name());
                    if event.kind.is_access() || !touches_target {
                        return;
                    }
                    tracing::debug!("SSH config changed: {:?}", event.kind);
                    *cache.write() = None;
                    events.emit_hosts_changed();
                }
                Err(e) => tracing::warn!("SSH config watch error: {}", e),
            }
        })?;
        watcher.watch(dir, RecursiveMode::NonRecursive)?;

        tracing::info!("Watching SSH config {:?}", path);
        *slot = Some(watcher);
        Ok(())
    }

    pub fn stop_watching(&self) {
        if self.watcher.lock().take().is_some() {
            tracing::info!("Stopped watching SSH config");
        }
    }
}

impl std::fmt::Debug for SshConfigBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshConfigBridge")
            .field("path", &self.path)
            .field("watching", &self.is_watching())
            .finish()
    }
}
