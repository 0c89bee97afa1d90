//! FileZilla site manager reader
//!
//! Best-effort scan of `sitemanager.xml`: only SFTP `<Server>` entries are
//! turned into hosts. Stored passwords are never read.

use std::sync::LazyLock;

use regex::Regex;

use super::ImportResult;
use crate::config::{ConnectionConfig, Host};

/// FileZilla protocol id for SFTP
const PROTOCOL_SFTP: &str = "1";

static SERVER_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<Server\b[^>]*>(.*?)</Server>").expect("valid server regex")
});

static FIELD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?s)<(Host|Port|Protocol|User|Name|Comments)\b[^>/]*>(.*?)</(?:Host|Port|Protocol|User|Name|Comments)>",
    )
    .expect("valid field regex")
});

fn decode_entities(value: &str) -> String {
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[derive(Default)]
struct Site {
    host: Option<String>,
    port: Option<String>,
    protocol: Option<String>,
    user: Option<String>,
    name: Option<String>,
    comments: Option<String>,
}

impl Site {
    fn from_block(block: &str) -> Self {
        let mut site = Site::default();
        for cap in FIELD.captures_iter(block) {
            let value = decode_entities(cap[2].trim());
            if value.is_empty() {
                continue;
            }
            let slot = match &cap[1] {
                "Host" => &mut site.host,
                "Port" => &mut site.port,
                "Protocol" => &mut site.protocol,
                "User" => &mut site.user,
                "Name" => &mut site.name,
                _ => &mut site.comments,
            };
            // nested elements come later; the first hit is the server's own
            slot.get_or_insert(value);
        }
        site
    }

    fn label(&self, index: usize) -> String {
        self.name
            .clone()
            .or_else(|| self.host.clone())
            .unwrap_or_else(|| format!("#{}", index + 1))
    }

    fn into_host(self, index: usize) -> Result<Host, String> {
        let label = self.label(index);

        if self.protocol.as_deref() != Some(PROTOCOL_SFTP) {
            return Err(format!("site '{}': not an SFTP site, skipped", label));
        }

        let Some(address) = self.host else {
            return Err(format!("site '{}': missing Host", label));
        };

        let port = match self.port {
            Some(p) => Some(
                p.parse::<u16>()
                    .map_err(|_| format!("site '{}': invalid port '{}'", label, p))?,
            ),
            None => None,
        };

        Ok(Host {
            name: label,
            connection: ConnectionConfig {
                host: Some(address),
                port,
                username: self.user,
                ..Default::default()
            },
            notes: self.comments,
            ..Default::default()
        })
    }
}

pub(super) fn parse(data: &str) -> ImportResult {
    let mut result = ImportResult::default();

    for (index, cap) in SERVER_BLOCK.captures_iter(data).enumerate() {
        match Site::from_block(&cap[1]).into_host(index) {
            Ok(host) => result.hosts.push(host),
            Err(e) => result.errors.push(e),
        }
    }

    if result.hosts.is_empty() && result.errors.is_empty() {
        result
            .errors
            .push("no <Server> entries found".to_string());
    }

    result
}
