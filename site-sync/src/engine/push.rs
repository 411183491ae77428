use std::path::Path;

use chrono::Utc;

use super::restore::{local_database_name, local_site_url};
use super::{PushOptions, PushReport, SyncEngine};
use crate::database::{DbCredentials, LocalDatabase};
use crate::guard::resolve_push_target;
use crate::resolver::resolve;
use crate::site::{SiteLayout, SiteManifest};
use crate::transport::{Direction, ExclusionSet, TransferJob};
use crate::utils::{Result, SyncError};

impl SyncEngine {
    /// Write a local site back to the hosting platform.
    ///
    /// The manifest must exist. The target goes through the push guard
    /// before anything is written, and every credential is resolved for
    /// that target, never for the source.
    pub async fn synchronize_push(&self, site_dir: &Path, options: PushOptions) -> Result<PushReport> {
        if options.files_only && options.db_only {
            return Err(SyncError::Config(
                "files-only and db-only cannot be combined".into(),
            ));
        }

        let manifest = SiteManifest::load(site_dir)?;
        let layout = SiteLayout::new(site_dir);
        if !options.db_only && !layout.files_dir().is_dir() {
            return Err(SyncError::NotFound(format!(
                "local file tree {}",
                layout.files_dir().display()
            )));
        }

        let target = resolve_push_target(
            self.directory.as_ref(),
            &manifest,
            options.target_app_id.as_deref(),
            options.new_label.as_deref(),
            Utc::now(),
        )
        .await?;

        let deployed = self.directory.find_application(&target.app_id).await?;
        let bundle = self.directory.application_credentials(&deployed.app.id).await?;
        let endpoint = self.endpoint(&deployed)?;
        let plan = resolve(
            &deployed.app,
            &deployed.server,
            &bundle,
            &self.config.remote.hosting_domain,
        );

        tracing::info!(
            target = %deployed.app.label,
            id = %deployed.app.id,
            host = %endpoint.host,
            cloned = target.cloned,
            "Pushing site"
        );

        let outcome = if options.db_only {
            self.probe.probe(&endpoint.host, endpoint.port()).await?;
            None
        } else {
            let job = TransferJob {
                endpoint: endpoint.clone(),
                direction: Direction::Push,
                local_root: layout.files_dir(),
                staging_dir: layout.state_dir(),
                exclusions: ExclusionSet::default(),
            };
            Some(self.chain().run(&job, &plan, false).await?)
        };

        let mut warnings = Vec::new();
        let mut database_pushed = false;

        if !options.files_only {
            match DbCredentials::from_bundle(&bundle, &deployed.app) {
                None if options.db_only => {
                    return Err(SyncError::CredentialMissing(format!(
                        "no database credentials for application {}",
                        deployed.app.id
                    )));
                }
                None => {
                    let warning = SyncError::CredentialMissing(format!(
                        "no database credentials for application {}; skipped database push",
                        deployed.app.id
                    ))
                    .to_string();
                    tracing::warn!("{warning}");
                    warnings.push(warning);
                }
                Some(creds) => {
                    let anchor = outcome
                        .as_ref()
                        .map(|o| &o.candidate)
                        .or_else(|| plan.first())
                        .ok_or_else(|| {
                            SyncError::NotFound(format!(
                                "no remote account for application {}",
                                deployed.app.id
                            ))
                        })?;

                    let local_name =
                        local_database_name(Some(&manifest), &layout, &self.config.database);
                    let dump = layout.push_dump_path();
                    let local = LocalDatabase::new(site_dir, self.config.database.clone());
                    local.wait_until_ready().await?;
                    local.export(&local_name, &dump).await?;

                    let imported = self
                        .database
                        .import(&endpoint, &anchor.identity, &creds, &dump)
                        .await;
                    if let Err(e) = tokio::fs::remove_file(&dump).await {
                        tracing::debug!(error = %e, "Could not remove temporary dump");
                    }
                    imported?;
                    database_pushed = true;

                    if let Err(e) = self
                        .database
                        .rewrite_urls(
                            &endpoint,
                            &anchor.identity,
                            &anchor.remote_path,
                            &local_site_url(&layout),
                            options.target_url.as_deref(),
                        )
                        .await
                    {
                        let warning = format!("URL rewrite on target skipped: {e}");
                        tracing::warn!("{warning}");
                        warnings.push(warning);
                    }
                }
            }
        }

        tracing::info!(target = %target.app_id, "Push complete");
        Ok(PushReport {
            target_app_id: target.app_id,
            cloned: target.cloned,
            outcome,
            database_pushed,
            warnings,
        })
    }
}
