//! Push target selection.
//!
//! A push never writes into the application a site was pulled from. When
//! the requested target is missing, equals the recorded source, or the site
//! came from a live application, a clone of the source is created on the
//! source's server and used instead.

use app_directory::ApplicationDirectory;
use chrono::{DateTime, Utc};

use crate::site::SiteManifest;
use crate::utils::{Result, SyncError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushTarget {
    pub app_id: String,
    /// True when `app_id` was created by this push.
    pub cloned: bool,
}

/// Label for an automatically created clone.
pub fn clone_label(source_label: &str, now: DateTime<Utc>) -> String {
    format!("{source_label}-from-local-{}", now.timestamp_millis())
}

/// Whether `requested` may not be written to directly.
pub fn needs_clone(manifest: &SiteManifest, requested: Option<&str>) -> bool {
    match requested.map(str::trim).filter(|id| !id.is_empty()) {
        None => true,
        Some(id) => id == manifest.source_app.id || manifest.from_live,
    }
}

pub async fn resolve_push_target(
    directory: &dyn ApplicationDirectory,
    manifest: &SiteManifest,
    requested: Option<&str>,
    new_label: Option<&str>,
    now: DateTime<Utc>,
) -> Result<PushTarget> {
    if !needs_clone(manifest, requested) {
        let app_id = requested.map(str::trim).unwrap_or_default().to_string();
        return Ok(PushTarget {
            app_id,
            cloned: false,
        });
    }

    let source = &manifest.source_app;
    let label = new_label
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| clone_label(&source.label, now));

    tracing::info!(
        source = %source.id,
        server = %manifest.server.id,
        label = %label,
        "Creating a clone to push into"
    );

    let app_id = directory
        .clone_application(&source.id, &manifest.server.id, &label)
        .await
        .map_err(|e| {
            SyncError::PushSafetyViolation(format!(
                "refusing to push into application {}; creating a clone failed: {e}",
                source.id
            ))
        })?;

    if app_id == source.id {
        return Err(SyncError::PushSafetyViolation(format!(
            "clone request returned the source application {app_id}"
        )));
    }

    tracing::info!(app_id = %app_id, "Pushing into new clone");
    Ok(PushTarget {
        app_id,
        cloned: true,
    })
}
