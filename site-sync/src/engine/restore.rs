//! Restoring a pulled dump into the site's local database.

use std::path::{Path, PathBuf};

use crate::config::DatabaseConfig;
use crate::database::{DatabaseDump, LocalDatabase};
use crate::site::{read_env_file, SiteLayout, SiteManifest};
use crate::utils::{Result, SyncError};

const DEFAULT_WP_PORT: &str = "8080";

#[derive(Debug, Clone)]
pub struct RestoreReport {
    pub db_name: String,
    pub dump: PathBuf,
    /// Site URL replaced by the local one, when a rewrite happened.
    pub rewritten_from: Option<String>,
    pub warnings: Vec<String>,
}

/// Database name for the local copy: manifest, then `.env`, then config.
pub fn local_database_name(
    manifest: Option<&SiteManifest>,
    layout: &SiteLayout,
    settings: &DatabaseConfig,
) -> String {
    manifest
        .and_then(|m| m.database_name.clone())
        .or_else(|| read_env_file(&layout.env_path()).remove("DB_NAME"))
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| settings.default_name.clone())
}

/// `http://localhost:<WP_PORT>` from the site's `.env`.
pub fn local_site_url(layout: &SiteLayout) -> String {
    let port = read_env_file(&layout.env_path())
        .remove("WP_PORT")
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| DEFAULT_WP_PORT.to_string());
    format!("http://localhost:{port}")
}

/// The manifest if present. Any other read error is still an error.
pub fn optional_manifest(site_dir: &Path) -> Result<Option<SiteManifest>> {
    match SiteManifest::load(site_dir) {
        Ok(manifest) => Ok(Some(manifest)),
        Err(SyncError::ManifestMissing(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Wait for the local database, import the site's dump and point the
/// site at its local URL. A failed URL rewrite is only a warning.
pub async fn restore_local_database(
    site_dir: &Path,
    settings: &DatabaseConfig,
) -> Result<RestoreReport> {
    let layout = SiteLayout::new(site_dir);
    let manifest = optional_manifest(site_dir)?;
    let db_name = local_database_name(manifest.as_ref(), &layout, settings);

    let dump = DatabaseDump::locate(&layout.state_dir(), &db_name).ok_or_else(|| {
        SyncError::NotFound(format!(
            "no database dump in {}",
            layout.state_dir().display()
        ))
    })?;

    let local = LocalDatabase::new(site_dir, settings.clone());
    local.wait_until_ready().await?;
    local.import(&dump).await?;

    let mut warnings = Vec::new();
    let rewritten_from = match local.rewrite_site_url(&local_site_url(&layout)).await {
        Ok(previous) => previous,
        Err(e) => {
            let warning = format!("URL rewrite skipped: {e}");
            tracing::warn!("{warning}");
            warnings.push(warning);
            None
        }
    };

    Ok(RestoreReport {
        db_name,
        dump: dump.path,
        rewritten_from,
        warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_database_name_precedence() -> std::io::Result<()> {
        let dir = TempDir::new()?;
        let layout = SiteLayout::new(dir.path());
        let settings = DatabaseConfig::default();

        assert_eq!(local_database_name(None, &layout, &settings), settings.default_name);

        std::fs::write(layout.env_path(), "WP_PORT=8099\nDB_NAME=from_env\n")?;
        assert_eq!(local_database_name(None, &layout, &settings), "from_env");
        assert_eq!(local_site_url(&layout), "http://localhost:8099");

        let manifest: SiteManifest = serde_json::from_str(
            r#"{"sourceApp":{"id":"1","label":"a"},"server":{"id":"2","label":"b"},
                "siteSlug":"a","databaseName":"from_manifest"}"#,
        )?;
        assert_eq!(
            local_database_name(Some(&manifest), &layout, &settings),
            "from_manifest"
        );
        Ok(())
    }

    #[test]
    fn test_default_local_url() {
        let dir = TempDir::new().unwrap();
        assert_eq!(
            local_site_url(&SiteLayout::new(dir.path())),
            "http://localhost:8080"
        );
    }

    #[tokio::test]
    async fn test_restore_without_dump_is_not_found() {
        let dir = TempDir::new().unwrap();
        let err = restore_local_database(dir.path(), &DatabaseConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::NotFound(_)));
    }
}
