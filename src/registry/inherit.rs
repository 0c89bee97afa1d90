//! Group Inheritance
//!
//! Computes a host's effective configuration from its own record, its group's
//! defaults and built-in fallbacks. Nothing here mutates stored records.

use crate::config::{
    AdvancedConfig, AuthType, ConnectionConfig, CursorStyle, Group, Host, Protocol, SftpConfig,
    TerminalConfig, DEFAULT_ENCODING, DEFAULT_SSH_PORT,
};

pub const DEFAULT_SCROLLBACK: u32 = 10_000;
pub const DEFAULT_CONCURRENT_TRANSFERS: u8 = 3;

/// Field-by-field overlay of partially filled config sections
pub trait Overlay: Sized {
    /// `top`'s set fields win, unset ones fall back to `self`
    fn overlay(&self, top: &Self) -> Self;

    /// Fill whatever is still unset with built-in defaults
    fn with_fallbacks(self) -> Self;
}

fn pick<T: Clone>(top: &Option<T>, base: &Option<T>) -> Option<T> {
    top.as_ref().or(base.as_ref()).cloned()
}

impl Overlay for ConnectionConfig {
    fn overlay(&self, top: &Self) -> Self {
        Self {
            host: pick(&top.host, &self.host),
            port: pick(&top.port, &self.port),
            username: pick(&top.username, &self.username),
            os_icon: pick(&top.os_icon, &self.os_icon),
            protocol: pick(&top.protocol, &self.protocol),
        }
    }

    fn with_fallbacks(mut self) -> Self {
        self.port.get_or_insert(DEFAULT_SSH_PORT);
        self.protocol.get_or_insert(Protocol::Ssh);
        self
    }
}

impl Overlay for AdvancedConfig {
    fn overlay(&self, top: &Self) -> Self {
        Self {
            jump_host_id: pick(&top.jump_host_id, &self.jump_host_id),
            proxy_command: pick(&top.proxy_command, &self.proxy_command),
            keep_alive_interval: pick(&top.keep_alive_interval, &self.keep_alive_interval),
            max_auth_tries: pick(&top.max_auth_tries, &self.max_auth_tries),
            encoding: pick(&top.encoding, &self.encoding),
            post_exec_script: pick(&top.post_exec_script, &self.post_exec_script),
        }
    }

    fn with_fallbacks(mut self) -> Self {
        self.encoding.get_or_insert_with(|| DEFAULT_ENCODING.to_string());
        self
    }
}

impl Overlay for TerminalConfig {
    fn overlay(&self, top: &Self) -> Self {
        Self {
            font_family: pick(&top.font_family, &self.font_family),
            font_size: pick(&top.font_size, &self.font_size),
            cursor_style: pick(&top.cursor_style, &self.cursor_style),
            cursor_blink: pick(&top.cursor_blink, &self.cursor_blink),
            scrollback: pick(&top.scrollback, &self.scrollback),
            copy_on_select: pick(&top.copy_on_select, &self.copy_on_select),
        }
    }

    fn with_fallbacks(mut self) -> Self {
        self.cursor_style.get_or_insert(CursorStyle::Block);
        self.scrollback.get_or_insert(DEFAULT_SCROLLBACK);
        self
    }
}

impl Overlay for SftpConfig {
    fn overlay(&self, top: &Self) -> Self {
        Self {
            default_remote_path: pick(&top.default_remote_path, &self.default_remote_path),
            default_local_path: pick(&top.default_local_path, &self.default_local_path),
            show_hidden_files: pick(&top.show_hidden_files, &self.show_hidden_files),
            preserve_timestamps: pick(&top.preserve_timestamps, &self.preserve_timestamps),
            concurrent_transfers: pick(&top.concurrent_transfers, &self.concurrent_transfers),
        }
    }

    fn with_fallbacks(mut self) -> Self {
        self.show_hidden_files.get_or_insert(false);
        self.concurrent_transfers
            .get_or_insert(DEFAULT_CONCURRENT_TRANSFERS);
        self
    }
}

/// Merge an optional section; absent on both sides stays absent
fn merge_section<T: Overlay + Default + Clone>(base: &Option<T>, top: &Option<T>) -> Option<T> {
    match (base, top) {
        (None, None) => None,
        (base, top) => Some(
            base.as_ref()
                .map(|b| b.overlay(&top.clone().unwrap_or_default()))
                .unwrap_or_else(|| top.clone().unwrap_or_default())
                .with_fallbacks(),
        ),
    }
}

fn merge_list<T: Clone>(base: &Option<Vec<T>>, top: Option<Vec<T>>) -> Option<Vec<T>> {
    match (base, top) {
        (Some(base), Some(top)) => Some(base.iter().cloned().chain(top).collect()),
        (Some(base), None) => Some(base.clone()),
        (None, top) => top,
    }
}

/// Effective configuration of `host` given the current group table
///
/// A host without a group, with a dangling group, or whose group carries no
/// defaults comes back unchanged.
pub fn effective_config(host: &Host, groups: &[Group]) -> Host {
    let Some(defaults) = host
        .group
        .as_deref()
        .and_then(|name| groups.iter().find(|g| g.name == name))
        .and_then(|g| g.defaults.as_ref())
    else {
        return host.clone();
    };

    let mut effective = host.clone();

    effective.connection = defaults
        .connection
        .as_ref()
        .map(|c| c.overlay(&host.connection))
        .unwrap_or_else(|| host.connection.clone())
        .with_fallbacks();

    if host.auth.identity_id.is_none() && host.auth.auth_type == AuthType::Password {
        if let Some(ref auth) = defaults.auth {
            effective.auth = auth.clone();
        }
    }

    effective.advanced = merge_section(&defaults.advanced, &host.advanced);
    effective.terminal = merge_section(&defaults.terminal, &host.terminal);
    effective.sftp = merge_section(&defaults.sftp, &host.sftp);

    effective.tags = match (&defaults.tags, host.tags.is_empty()) {
        (Some(group_tags), false) => {
            let mut seen = std::collections::HashSet::new();
            group_tags
                .iter()
                .chain(&host.tags)
                .filter(|t| seen.insert(*t))
                .cloned()
                .collect()
        }
        // one side only: taken as it is
        (Some(group_tags), true) => group_tags.clone(),
        (None, _) => host.tags.clone(),
    };

    effective.tunnels = merge_list(&defaults.tunnels, host.tunnels.clone());

    effective
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AuthConfig, HostDefaults, Tunnel};

    fn group_with_port(port: u16) -> Group {
        Group::with_defaults(
            "prod",
            HostDefaults {
                connection: Some(ConnectionConfig {
                    port: Some(port),
                    username: Some("deploy".into()),
                    ..Default::default()
                }),
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_host_port_wins() {
        let groups = vec![group_with_port(2222)];
        let mut host = Host::new("web", "web.lan");
        host.group = Some("prod".into());
        host.connection.port = Some(22);

        let effective = effective_config(&host, &groups);
        assert_eq!(effective.connection.port, Some(22));
        assert_eq!(effective.connection.username.as_deref(), Some("deploy"));
    }

    #[test]
    fn test_group_port_inherited() {
        let groups = vec![group_with_port(2222)];
        let mut host = Host::new("web", "web.lan");
        host.group = Some("prod".into());

        let effective = effective_config(&host, &groups);
        assert_eq!(effective.connection.port, Some(2222));
        assert_eq!(effective.connection.protocol, Some(Protocol::Ssh));
        // stored record untouched
        assert_eq!(host.connection.port, None);
    }

    #[test]
    fn test_no_group_or_dangling_group_unchanged() {
        let groups = vec![group_with_port(2222)];
        let host = Host::new("web", "web.lan");
        assert_eq!(effective_config(&host, &groups), host);

        let mut dangling = host.clone();
        dangling.group = Some("deleted".into());
        assert_eq!(effective_config(&dangling, &groups), dangling);

        let mut empty_group = host.clone();
        empty_group.group = Some("bare".into());
        assert_eq!(
            effective_config(&empty_group, &[Group::new("bare")]),
            empty_group
        );
    }

    #[test]
    fn test_tag_union() {
        let group = Group::with_defaults(
            "prod",
            HostDefaults {
                tags: Some(vec!["prod".into()]),
                ..Default::default()
            },
        );
        let mut host = Host::new("web", "web.lan");
        host.group = Some("prod".into());
        host.tags = vec!["web".into()];

        let effective = effective_config(&host, std::slice::from_ref(&group));
        assert_eq!(effective.tags, vec!["prod".to_string(), "web".to_string()]);

        host.tags = vec!["prod".into(), "web".into()];
        let effective = effective_config(&host, std::slice::from_ref(&group));
        assert_eq!(effective.tags.iter().filter(|t| *t == "prod").count(), 1);

        // a single-sided list is not de-duplicated
        let group = Group::with_defaults(
            "prod",
            HostDefaults {
                tags: Some(vec!["prod".into(), "prod".into()]),
                ..Default::default()
            },
        );
        host.tags.clear();
        let effective = effective_config(&host, std::slice::from_ref(&group));
        assert_eq!(effective.tags, vec!["prod".to_string(), "prod".to_string()]);

        let group = Group::with_defaults("prod", HostDefaults::default());
        host.tags = vec!["web".into(), "web".into()];
        let effective = effective_config(&host, &[group]);
        assert_eq!(effective.tags, vec!["web".to_string(), "web".to_string()]);
    }

    #[test]
    fn test_auth_inheritance_rules() {
        let group = Group::with_defaults(
            "prod",
            HostDefaults {
                auth: Some(AuthConfig {
                    auth_type: AuthType::IdentityRef,
                    identity_id: Some("team-key".into()),
                    key_path: None,
                }),
                ..Default::default()
            },
        );

        let mut host = Host::new("web", "web.lan");
        host.group = Some("prod".into());
        let effective = effective_config(&host, std::slice::from_ref(&group));
        assert_eq!(effective.auth.identity_id.as_deref(), Some("team-key"));

        host.auth.auth_type = AuthType::Agent;
        let effective = effective_config(&host, std::slice::from_ref(&group));
        assert_eq!(effective.auth.auth_type, AuthType::Agent);

        host.auth = AuthConfig {
            auth_type: AuthType::Password,
            identity_id: Some("own".into()),
            key_path: None,
        };
        let effective = effective_config(&host, &[group]);
        assert_eq!(effective.auth.identity_id.as_deref(), Some("own"));
    }

    #[test]
    fn test_sections_and_tunnels() {
        let group = Group::with_defaults(
            "prod",
            HostDefaults {
                terminal: Some(TerminalConfig {
                    font_size: Some(13.0),
                    ..Default::default()
                }),
                tunnels: Some(vec![Tunnel::dynamic(1080)]),
                ..Default::default()
            },
        );
        let mut host = Host::new("web", "web.lan");
        host.group = Some("prod".into());
        host.terminal = Some(TerminalConfig {
            cursor_style: Some(CursorStyle::Bar),
            ..Default::default()
        });
        host.tunnels = Some(vec![Tunnel::dynamic(1081)]);
        host.sftp = Some(SftpConfig::default());

        let effective = effective_config(&host, &[group]);

        let terminal = effective.terminal.unwrap();
        assert_eq!(terminal.font_size, Some(13.0));
        assert_eq!(terminal.cursor_style, Some(CursorStyle::Bar));
        assert_eq!(terminal.scrollback, Some(DEFAULT_SCROLLBACK));

        let sftp = effective.sftp.unwrap();
        assert_eq!(sftp.show_hidden_files, Some(false));
        assert_eq!(sftp.concurrent_transfers, Some(DEFAULT_CONCURRENT_TRANSFERS));

        assert!(effective.advanced.is_none());
        assert_eq!(
            effective.tunnels.unwrap(),
            vec![Tunnel::dynamic(1080), Tunnel::dynamic(1081)]
        );
    }
}
