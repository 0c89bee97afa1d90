//! Import/Export Bridge
//!
//! Best-effort converters between Labonair's own JSON export and other
//! tools' host lists. Every imported record is detached from its source:
//! fresh id, fresh creation time, `imported` tag, no cached status.

pub mod filezilla;
pub mod native;

use std::fmt;
use std::str::FromStr;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::{
    convert_to_host, parse_ssh_config_content, Host, IMPORTED_TAG, SSH_CONFIG_TAG,
};

pub use native::{ExportFile, EXPORT_VERSION};

/// Import/export errors
#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    #[error("Not supported: {0}")]
    Unsupported(String),

    #[error("Unknown import source: {0}")]
    UnknownSource(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Malformed input: {0}")]
    Malformed(String),
}

/// Formats the importer understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ImportSource {
    /// Labonair export document or bare host array
    Labonair,
    /// OpenSSH client config text
    SshConfig,
    /// FileZilla sitemanager.xml
    #[serde(rename = "filezilla")]
    FileZilla,
    Termius,
    #[serde(rename = "mobaxterm")]
    MobaXterm,
}

impl ImportSource {
    pub fn as_str(self) -> &'static str {
        match self {
            ImportSource::Labonair => "labonair",
            ImportSource::SshConfig => "ssh-config",
            ImportSource::FileZilla => "filezilla",
            ImportSource::Termius => "termius",
            ImportSource::MobaXterm => "mobaxterm",
        }
    }
}

impl fmt::Display for ImportSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImportSource {
    type Err = ExchangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "labonair" | "json" => Ok(ImportSource::Labonair),
            "ssh-config" | "ssh_config" | "openssh" => Ok(ImportSource::SshConfig),
            "filezilla" => Ok(ImportSource::FileZilla),
            "termius" => Ok(ImportSource::Termius),
            "mobaxterm" => Ok(ImportSource::MobaXterm),
            other => Err(ExchangeError::UnknownSource(other.to_string())),
        }
    }
}

/// Result of an import
#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportResult {
    /// Hosts added to the registry
    pub hosts: Vec<Host>,
    /// One message per entry that could not be imported
    pub errors: Vec<String>,
}

impl ImportResult {
    pub fn imported(&self) -> usize {
        self.hosts.len()
    }
}

/// Stamp provenance on a freshly parsed record
///
/// An imported host is never an ~/.ssh/config host, whatever its source.
pub fn detach(mut host: Host) -> Host {
    host.id = Uuid::new_v4().to_string();
    host.created = Some(Utc::now());
    host.status = None;
    host.tags.retain(|t| t != SSH_CONFIG_TAG);
    if !host.has_tag(IMPORTED_TAG) {
        host.tags.push(IMPORTED_TAG.to_string());
    }
    host
}

/// Parse `data` in the given format into detached host records
///
/// Per-entry problems are collected into `errors`; only an unreadable
/// document or an unsupported format fails the whole call.
pub fn parse(source: ImportSource, data: &str) -> Result<ImportResult, ExchangeError> {
    let mut result = match source {
        ImportSource::Labonair => native::parse(data)?,
        ImportSource::SshConfig => ImportResult {
            hosts: parse_ssh_config_content(data)
                .iter()
                .map(|entry| convert_to_host(&entry.to_host()))
                .collect(),
            errors: Vec::new(),
        },
        ImportSource::FileZilla => filezilla::parse(data),
        ImportSource::Termius | ImportSource::MobaXterm => {
            return Err(ExchangeError::Unsupported(format!("{} import", source)));
        }
    };

    let mut valid = Vec::with_capacity(result.hosts.len());
    for host in result.hosts.drain(..) {
        match host.validate() {
            Ok(()) => valid.push(detach(host)),
            Err(e) => result.errors.push(e),
        }
    }
    result.hosts = valid;

    tracing::info!(
        "Parsed {} hosts from {} ({} errors)",
        result.hosts.len(),
        source,
        result.errors.len()
    );
    Ok(result)
}

/// Serialize hosts into the Labonair export document
///
/// Encrypted export is declared but not available.
pub fn export(hosts: &[Host], encrypt: bool) -> Result<String, ExchangeError> {
    if encrypt {
        return Err(ExchangeError::Unsupported("encrypted export".to_string()));
    }
    native::export(hosts)
}
