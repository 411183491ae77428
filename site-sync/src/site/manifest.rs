//! The per-site provenance record (`.cw/meta.json`).
//!
//! Fields this version does not know are kept and written back unchanged.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::SiteLayout;
use crate::fs::atomic_write;
use crate::resolver::Identity;
use crate::transport::{TransferMethod, TransferOutcome};
use crate::utils::{Result, SyncError};

/// Identifiers may have been written as JSON numbers.
fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppRef {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerRef {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub ip: Option<String>,
}

/// Where and how the files were fetched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRecord {
    pub remote_path: String,
    pub identity: Identity,
    pub method: TransferMethod,
}

impl From<&TransferOutcome> for TransferRecord {
    fn from(outcome: &TransferOutcome) -> Self {
        Self {
            remote_path: outcome.candidate.remote_path.clone(),
            identity: outcome.candidate.identity.clone(),
            method: outcome.method,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteManifest {
    #[serde(alias = "sourceApplication")]
    pub source_app: AppRef,
    pub server: ServerRef,
    pub site_slug: String,
    #[serde(default, alias = "fromLiveSource")]
    pub from_live: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transfer: Option<TransferRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pulled_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl SiteManifest {
    /// Read the manifest of `site_dir`; refuses to guess when it is absent.
    pub fn load(site_dir: &Path) -> Result<Self> {
        let path = SiteLayout::new(site_dir).manifest_path();
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SyncError::ManifestMissing(path))
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_str(&text)?)
    }

    pub fn save(&self, site_dir: &Path) -> Result<()> {
        let layout = SiteLayout::new(site_dir);
        std::fs::create_dir_all(layout.state_dir())?;
        let mut json = serde_json::to_vec_pretty(self)?;
        json.push(b'\n');
        atomic_write(&layout.manifest_path(), &json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::{IdentityKind, PathCandidate};
    use app_directory::Secret;
    use tempfile::TempDir;

    #[test]
    fn test_missing_manifest_is_refused() {
        let dir = TempDir::new().unwrap();
        let err = SiteManifest::load(dir.path()).unwrap_err();
        assert!(matches!(err, SyncError::ManifestMissing(p) if p.ends_with(".cw/meta.json")));
    }

    #[test]
    fn test_older_manifest_with_numeric_ids_and_unknown_fields() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".cw")).unwrap();
        std::fs::write(
            dir.path().join(".cw/meta.json"),
            r#"{
              "sourceApp": {"id": 4021, "label": "Shop"},
              "server": {"id": 55, "label": "eu-1", "ip": "203.0.113.9"},
              "siteSlug": "shop",
              "fromLive": true,
              "dockerProfile": {"php": "8.2"}
            }"#,
        )
        .unwrap();

        let mut manifest = SiteManifest::load(dir.path()).unwrap();
        assert_eq!(manifest.source_app.id, "4021");
        assert_eq!(manifest.server.id, "55");
        assert!(manifest.from_live);
        assert!(manifest.transfer.is_none());

        manifest.database_name = Some("shopdb".into());
        manifest.save(dir.path()).unwrap();

        let raw: Value =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join(".cw/meta.json")).unwrap())
                .unwrap();
        assert_eq!(raw["dockerProfile"]["php"], "8.2");
        assert_eq!(raw["databaseName"], "shopdb");
        assert_eq!(raw["sourceApp"]["id"], "4021");
    }

    #[test]
    fn test_transfer_record_never_stores_password() {
        let outcome = TransferOutcome {
            method: TransferMethod::SecureCopy,
            candidate: PathCandidate {
                identity: Identity {
                    user: "acme".into(),
                    kind: IdentityKind::Application,
                    password: Some(Secret::new("hunter2")),
                },
                remote_path: "~/public_html/".into(),
            },
        };

        let json = serde_json::to_string(&TransferRecord::from(&outcome)).unwrap();
        assert!(!json.contains("hunter2"));
        assert!(json.contains(r#""method":"secureCopy""#));
        assert!(json.contains(r#""kind":"application""#));
        assert!(json.contains(r#""remotePath":"~/public_html/""#));
    }
}
