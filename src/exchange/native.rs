//! Labonair JSON export format

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{ExchangeError, ImportResult};
use crate::config::Host;

/// Current export document version
pub const EXPORT_VERSION: u32 = 1;

/// Export document
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportFile {
    pub version: u32,
    pub exported_at: DateTime<Utc>,
    pub hosts: Vec<Host>,
}

/// Either shape accepted on import; entries stay raw so one bad record
/// doesn't reject the rest
#[derive(Deserialize)]
#[serde(untagged)]
enum Document {
    File {
        #[serde(default)]
        version: Option<u32>,
        hosts: Vec<Value>,
    },
    Bare(Vec<Value>),
}

pub(super) fn parse(data: &str) -> Result<ImportResult, ExchangeError> {
    let entries = match serde_json::from_str::<Document>(data) {
        Ok(Document::File { version, hosts }) => {
            if let Some(v) = version.filter(|v| *v > EXPORT_VERSION) {
                tracing::warn!(
                    "Export version {} is newer than {}, importing best-effort",
                    v,
                    EXPORT_VERSION
                );
            }
            hosts
        }
        Ok(Document::Bare(hosts)) => hosts,
        Err(_) => {
            // surface the real parse error rather than the untagged mismatch
            serde_json::from_str::<Value>(data)?;
            return Err(ExchangeError::Malformed(
                "expected an export document or a host array".to_string(),
            ));
        }
    };

    let mut result = ImportResult::default();
    for (i, entry) in entries.into_iter().enumerate() {
        match serde_json::from_value::<Host>(entry) {
            Ok(host) => result.hosts.push(host),
            Err(e) => result.errors.push(format!("host #{}: {}", i + 1, e)),
        }
    }
    Ok(result)
}

pub(super) fn export(hosts: &[Host]) -> Result<String, ExchangeError> {
    let file = ExportFile {
        version: EXPORT_VERSION,
        exported_at: Utc::now(),
        hosts: hosts
            .iter()
            .cloned()
            .map(|mut h| {
                h.status = None;
                h
            })
            .collect(),
    };
    Ok(serde_json::to_string_pretty(&file)?)
}
