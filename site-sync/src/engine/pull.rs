use std::collections::BTreeMap;

use chrono::Utc;

use super::{PullOptions, PullReport, SyncEngine};
use crate::database::DbCredentials;
use crate::resolver::resolve;
use crate::site::{site_slug, AppRef, ServerRef, SiteLayout, SiteManifest, TransferRecord};
use crate::transport::{Direction, ExclusionSet, TransferJob};
use crate::utils::{Result, SyncError};

impl SyncEngine {
    /// Materialize application `app_id` in a local site directory.
    ///
    /// Files first, then the database. The manifest is written only after
    /// both succeeded; missing database credentials skip the dump with a
    /// warning instead of failing.
    pub async fn synchronize_pull(&self, app_id: &str, options: PullOptions) -> Result<PullReport> {
        let deployed = self.directory.find_application(app_id).await?;
        let bundle = self.directory.application_credentials(&deployed.app.id).await?;
        let endpoint = self.endpoint(&deployed)?;

        let slug = site_slug(&deployed.app.label, &deployed.app.id);
        let site_dir = options
            .directory
            .clone()
            .unwrap_or_else(|| self.config.sites.root.join(&slug));
        let layout = SiteLayout::new(&site_dir);
        layout.ensure()?;

        tracing::info!(
            app = %deployed.app.label,
            id = %deployed.app.id,
            host = %endpoint.host,
            dir = %site_dir.display(),
            live = options.live_source,
            "Pulling application"
        );

        let plan = resolve(
            &deployed.app,
            &deployed.server,
            &bundle,
            &self.config.remote.hosting_domain,
        );
        let job = TransferJob {
            endpoint: endpoint.clone(),
            direction: Direction::Pull,
            local_root: layout.files_dir(),
            staging_dir: layout.state_dir(),
            exclusions: ExclusionSet::default(),
        };
        let outcome = self.chain().run(&job, &plan, options.archive).await?;

        let mut warnings = Vec::new();
        let resolved_database_name = match DbCredentials::from_bundle(&bundle, &deployed.app) {
            Some(creds) => {
                let dump = self
                    .database
                    .export(&endpoint, &outcome.candidate.identity, &creds, &layout.state_dir())
                    .await?;
                tracing::info!(path = %dump.path.display(), "Database dump written");
                Some(dump.db_name)
            }
            None => {
                let warning = SyncError::CredentialMissing(format!(
                    "no database credentials for application {}; skipped database dump",
                    deployed.app.id
                ))
                .to_string();
                tracing::warn!("{warning}");
                warnings.push(warning);
                None
            }
        };

        let extra = match SiteManifest::load(&site_dir) {
            Ok(previous) => previous.extra,
            Err(SyncError::ManifestMissing(_)) => BTreeMap::new(),
            Err(e) => {
                tracing::debug!(error = %e, "Ignoring unreadable previous manifest");
                BTreeMap::new()
            }
        };
        let manifest = SiteManifest {
            source_app: AppRef {
                id: deployed.app.id.clone(),
                label: deployed.app.label.clone(),
            },
            server: ServerRef {
                id: deployed.server.id.clone(),
                label: deployed.server.label.clone(),
                ip: deployed.server.public_ip.clone(),
            },
            site_slug: slug,
            from_live: options.live_source,
            transfer: Some(TransferRecord::from(&outcome)),
            database_name: resolved_database_name.clone(),
            pulled_at: Some(Utc::now()),
            extra,
        };
        manifest.save(&site_dir)?;

        tracing::info!(dir = %site_dir.display(), "Pull complete");
        Ok(PullReport {
            local_directory: site_dir,
            resolved_database_name,
            outcome,
            warnings,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tempfile::TempDir;

    use super::*;
    use crate::engine::testing::*;
    use crate::resolver::IdentityKind;
    use crate::transport::TransferMethod;

    #[tokio::test]
    async fn test_pull_without_database_credentials() {
        let root = TempDir::new().unwrap();
        let transport = Arc::new(RecordingTransport::default());
        let database = Arc::new(MemoryDatabase::default());
        let engine = engine(
            MemoryDirectory::with_app(shop()),
            transport.clone(),
            database.clone(),
            root.path(),
        );

        let report = engine
            .synchronize_pull("4021", PullOptions::default())
            .await
            .unwrap();

        assert_eq!(report.local_directory, root.path().join("shop"));
        assert!(report.resolved_database_name.is_none());
        assert_eq!(report.warnings.len(), 1);
        assert!(report.local_directory.join("wp/index.php").is_file());
        assert!(database.exports.lock().unwrap().is_empty());

        let manifest = SiteManifest::load(&report.local_directory).unwrap();
        assert_eq!(manifest.source_app.id, "4021");
        assert_eq!(manifest.server.ip.as_deref(), Some("203.0.113.9"));
        assert!(!manifest.from_live);
        let transfer = manifest.transfer.unwrap();
        assert_eq!(transfer.method, TransferMethod::Sync);
        assert_eq!(transfer.remote_path, "~/public_html/");
        assert_eq!(transfer.identity.kind, IdentityKind::Application);
    }

    #[tokio::test]
    async fn test_pull_with_database_keeps_manifest_extras() {
        let root = TempDir::new().unwrap();
        let site = root.path().join("custom");
        std::fs::create_dir_all(site.join(".cw")).unwrap();
        std::fs::write(
            site.join(".cw/meta.json"),
            r#"{"sourceApp":{"id":"1","label":"Old"},"server":{"id":"2","label":"s"},
                "siteSlug":"old","wpPort":8088}"#,
        )
        .unwrap();

        let mut directory = MemoryDirectory::with_app(shop());
        directory.credentials.insert("4021".into(), db_bundle());
        let database = Arc::new(MemoryDatabase::default());
        let engine = engine(
            directory,
            Arc::new(RecordingTransport::default()),
            database.clone(),
            root.path(),
        );

        let report = engine
            .synchronize_pull(
                "4021",
                PullOptions {
                    directory: Some(site.clone()),
                    live_source: true,
                    ..PullOptions::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(report.resolved_database_name.as_deref(), Some("shopdb"));
        assert!(report.warnings.is_empty());
        assert_eq!(database.exports.lock().unwrap().as_slice(), ["shopdb"]);
        assert!(site.join(".cw/db.sql").is_file());

        let manifest = SiteManifest::load(&site).unwrap();
        assert_eq!(manifest.source_app.label, "Shop");
        assert!(manifest.from_live);
        assert_eq!(manifest.database_name.as_deref(), Some("shopdb"));
        assert_eq!(manifest.extra["wpPort"], 8088);
    }

    #[tokio::test]
    async fn test_exhausted_pull_writes_no_manifest() {
        let root = TempDir::new().unwrap();
        let transport = Arc::new(RecordingTransport {
            fail_all: true,
            ..RecordingTransport::default()
        });
        let engine = engine(
            MemoryDirectory::with_app(shop()),
            transport.clone(),
            Arc::new(MemoryDatabase::default()),
            root.path(),
        );

        let err = engine
            .synchronize_pull("4021", PullOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::TransportExhausted { .. }));
        assert!(!root.path().join("shop/.cw/meta.json").exists());
        // Application tier (2 paths) then master tier (2 paths).
        assert_eq!(transport.seen.lock().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_label_without_latin_characters_gets_own_directory() {
        let root = TempDir::new().unwrap();
        let mut app = shop();
        app.app.label = "日本のショップ".into();
        let engine = engine(
            MemoryDirectory::with_app(app),
            Arc::new(RecordingTransport::default()),
            Arc::new(MemoryDatabase::default()),
            root.path(),
        );

        let report = engine
            .synchronize_pull("4021", PullOptions::default())
            .await
            .unwrap();

        assert_ne!(report.local_directory, root.path());
        assert_eq!(report.local_directory, root.path().join("app-4021"));
        assert!(!root.path().join(".cw").exists());
        let manifest = SiteManifest::load(&report.local_directory).unwrap();
        assert_eq!(manifest.site_slug, "app-4021");
    }

    #[tokio::test]
    async fn test_unknown_application() {
        let root = TempDir::new().unwrap();
        let engine = engine(
            MemoryDirectory::with_app(shop()),
            Arc::new(RecordingTransport::default()),
            Arc::new(MemoryDatabase::default()),
            root.path(),
        );

        let err = engine
            .synchronize_pull("999", PullOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Directory(_)));
    }
}
