//! Normalization of directory responses.
//!
//! The control plane answers the same question in several JSON shapes. Each
//! listing is parsed once into one of the known shapes below and converted to
//! the canonical descriptors; nothing past this module sees raw JSON.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;

use crate::error::{DirectoryError, Result};
use crate::models::{ApplicationDescriptor, CredentialBundle, Secret, ServerDescriptor};

/// Known shapes of the server listing.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ServerListing {
    // Must precede `Wrapped`: struct variants also accept sequences.
    Bare(Vec<Value>),
    Wrapped { servers: Collection },
}

/// Known shapes of an application listing.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ApplicationListing {
    Bare(Vec<Value>),
    Apps { apps: Collection },
    Applications { applications: Collection },
    Data { data: Collection },
    Results { result: Collection },
    Items { items: Collection },
    Keyed(BTreeMap<String, Value>),
}

/// A list of objects, or a map whose values are objects (or lists of them).
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum Collection {
    List(Vec<Value>),
    Keyed(BTreeMap<String, Value>),
}

impl Collection {
    fn into_objects(self) -> Vec<Value> {
        match self {
            Collection::List(items) => items.into_iter().filter(Value::is_object).collect(),
            Collection::Keyed(map) => flatten_values(map),
        }
    }
}

impl ServerListing {
    fn into_objects(self) -> Vec<Value> {
        match self {
            ServerListing::Bare(items) => items.into_iter().filter(Value::is_object).collect(),
            ServerListing::Wrapped { servers } => servers.into_objects(),
        }
    }
}

impl ApplicationListing {
    fn into_objects(self) -> Vec<Value> {
        match self {
            ApplicationListing::Bare(items) => {
                items.into_iter().filter(Value::is_object).collect()
            }
            ApplicationListing::Apps { apps: c }
            | ApplicationListing::Applications { applications: c }
            | ApplicationListing::Data { data: c }
            | ApplicationListing::Results { result: c }
            | ApplicationListing::Items { items: c } => c.into_objects(),
            ApplicationListing::Keyed(map) => flatten_values(map),
        }
    }
}

fn flatten_values(map: BTreeMap<String, Value>) -> Vec<Value> {
    map.into_values()
        .flat_map(|v| match v {
            Value::Array(items) => items,
            other => vec![other],
        })
        .filter(Value::is_object)
        .collect()
}

/// A server plus any applications embedded in the listing entry.
#[derive(Debug, Clone)]
pub struct ServerEntry {
    pub server: ServerDescriptor,
    pub embedded_apps: Vec<ApplicationDescriptor>,
}

pub fn parse_servers(path: &str, body: Value) -> Result<Vec<ServerEntry>> {
    let listing: ServerListing = serde_json::from_value(body).map_err(|e| shape_error(path, e))?;
    Ok(listing.into_objects().iter().filter_map(server_entry).collect())
}

pub fn parse_applications(path: &str, body: Value) -> Result<Vec<ApplicationDescriptor>> {
    let listing: ApplicationListing =
        serde_json::from_value(body).map_err(|e| shape_error(path, e))?;
    Ok(listing
        .into_objects()
        .iter()
        .filter_map(application_from_value)
        .collect())
}

fn server_entry(value: &Value) -> Option<ServerEntry> {
    let id = str_field(value, &["id", "server_id"])?;
    let mut server = ServerDescriptor::new(id);
    if let Some(label) = str_field(value, &["label", "name"]) {
        server.label = label;
    }
    server.public_ip = str_field(value, &["public_ip", "ip"]);
    server.master_user = str_field(value, &["master_user"]);
    server.master_password = str_field(value, &["master_password"]).map(Secret::new);

    let embedded_apps = ["apps", "applications"]
        .iter()
        .find_map(|key| value.get(*key).and_then(Value::as_array))
        .map(|apps| apps.iter().filter_map(application_from_value).collect())
        .unwrap_or_default();

    Some(ServerEntry { server, embedded_apps })
}

/// Entries without any recognizable identifier are dropped.
pub fn application_from_value(value: &Value) -> Option<ApplicationDescriptor> {
    let id = str_field(value, &["id", "application_id", "app_id"])?;
    let label = str_field(value, &["label", "name"]).unwrap_or_else(|| id.clone());
    Some(ApplicationDescriptor {
        id,
        label,
        symlink: str_field(value, &["symlink"]),
        sys_user: str_field(value, &["sys_user"]),
        application_path: str_field(value, &["application_path", "app_path", "path"]),
        database_name: str_field(value, &["database_name", "mysql_db_name"]),
    })
}

/// Credentials may come from a dedicated endpoint (`sftp` / `mysql` sections)
/// or from an application detail body, optionally wrapped in `app`.
pub fn credentials_from_value(value: &Value) -> CredentialBundle {
    let app = value.get("app").filter(|v| v.is_object());
    let section = |name: &str, keys: &[&str]| value.get(name).and_then(|s| str_field(s, keys));
    let app_field =
        |keys: &[&str]| str_field(value, keys).or_else(|| app.and_then(|a| str_field(a, keys)));

    CredentialBundle {
        sftp_username: section("sftp", &["username"]).or_else(|| app_field(&["sys_user"])),
        sftp_password: section("sftp", &["password"])
            .or_else(|| app_field(&["sys_password"]))
            .map(Secret::new),
        db_username: section("mysql", &["username"])
            .or_else(|| app_field(&["database_user", "mysql_user"])),
        db_password: section("mysql", &["password"])
            .or_else(|| app_field(&["database_password", "mysql_password"]))
            .map(Secret::new),
        db_name: section("mysql", &["db_name"])
            .or_else(|| app_field(&["database_name", "mysql_db_name"])),
        application_path: app_field(&["application_path"]),
    }
}

pub fn clone_id_from_value(value: &Value) -> Option<String> {
    str_field(value, &["app_id", "id"])
        .or_else(|| value.get("app").and_then(|a| str_field(a, &["id"])))
}

/// First present key, accepting strings and numbers.
fn str_field(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match value.get(*key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn shape_error(path: &str, err: serde_json::Error) -> DirectoryError {
    DirectoryError::UnexpectedShape {
        path: path.to_string(),
        reason: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_servers_wrapped_with_embedded_apps() {
        let body = json!({
            "status": true,
            "servers": [{
                "id": "55",
                "label": "prod",
                "public_ip": "203.0.113.7",
                "master_user": "master_abc",
                "master_password": "pw",
                "apps": [{ "id": "101", "label": "Shop", "sys_user": "acme" }]
            }]
        });

        let entries = parse_servers("/server", body).unwrap();
        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert_eq!(entry.server.id, "55");
        assert_eq!(entry.server.public_ip.as_deref(), Some("203.0.113.7"));
        assert_eq!(entry.server.master_user.as_deref(), Some("master_abc"));
        assert_eq!(entry.embedded_apps.len(), 1);
        assert_eq!(entry.embedded_apps[0].sys_user.as_deref(), Some("acme"));
    }

    #[test]
    fn test_servers_bare_and_keyed() {
        let bare = parse_servers("/server", json!([{ "id": 1 }, { "id": 2 }])).unwrap();
        assert_eq!(bare.len(), 2);
        assert_eq!(bare[0].server.id, "1");
        assert_eq!(bare[0].server.label, "1");

        let keyed = parse_servers("/server", json!({ "servers": { "a": { "id": 9 } } })).unwrap();
        assert_eq!(keyed.len(), 1);
        assert_eq!(keyed[0].server.id, "9");
    }

    #[test]
    fn test_application_listing_shapes() {
        let shapes = [
            json!([{ "id": 1 }]),
            json!({ "apps": [{ "application_id": 1 }] }),
            json!({ "applications": [{ "app_id": "1" }] }),
            json!({ "data": [{ "id": 1 }] }),
            json!({ "result": [{ "id": 1 }] }),
            json!({ "items": [{ "id": 1 }] }),
            json!({ "first": { "id": 1 }, "status": true }),
        ];
        for body in shapes {
            let apps = parse_applications("/apps", body.clone()).unwrap();
            assert_eq!(apps.len(), 1, "shape {body}");
            assert_eq!(apps[0].id, "1");
        }
    }

    #[test]
    fn test_entries_without_id_are_dropped() {
        let apps = parse_applications("/apps", json!([{ "label": "nope" }, { "id": 3 }])).unwrap();
        assert_eq!(apps.len(), 1);
        assert_eq!(apps[0].id, "3");
    }

    #[test]
    fn test_scalar_body_is_unexpected_shape() {
        let err = parse_servers("/server", json!("maintenance")).unwrap_err();
        assert!(matches!(err, DirectoryError::UnexpectedShape { .. }));
    }

    #[test]
    fn test_credentials_from_dedicated_endpoint() {
        let bundle = credentials_from_value(&json!({
            "sftp": { "username": "acme", "password": "s3cret" },
            "mysql": { "username": "dbu", "password": "dbp", "db_name": "shopdb" },
            "application_path": "applications/abc"
        }));
        assert_eq!(bundle.sftp_username.as_deref(), Some("acme"));
        assert_eq!(bundle.sftp_password.as_ref().map(Secret::expose), Some("s3cret"));
        assert_eq!(bundle.db_name.as_deref(), Some("shopdb"));
        assert_eq!(bundle.application_path.as_deref(), Some("applications/abc"));
        assert!(bundle.has_database());
    }

    #[test]
    fn test_credentials_from_wrapped_app_body() {
        let bundle = credentials_from_value(&json!({
            "app": {
                "sys_user": "acme",
                "mysql_user": "dbu",
                "mysql_password": "dbp",
                "mysql_db_name": "shopdb",
                "application_path": "/applications/xyz"
            }
        }));
        assert_eq!(bundle.sftp_username.as_deref(), Some("acme"));
        assert_eq!(bundle.db_username.as_deref(), Some("dbu"));
        assert_eq!(bundle.application_path.as_deref(), Some("/applications/xyz"));
        assert!(bundle.has_database());
    }

    #[test]
    fn test_empty_credentials() {
        let bundle = credentials_from_value(&json!({ "status": true }));
        assert!(bundle.is_empty());
        assert!(!bundle.has_database());
    }

    #[test]
    fn test_clone_id_variants() {
        assert_eq!(clone_id_from_value(&json!({ "app_id": 77 })).as_deref(), Some("77"));
        assert_eq!(clone_id_from_value(&json!({ "id": "78" })).as_deref(), Some("78"));
        assert_eq!(clone_id_from_value(&json!({ "app": { "id": 79 } })).as_deref(), Some("79"));
        assert_eq!(clone_id_from_value(&json!({ "status": true })), None);
    }
}
