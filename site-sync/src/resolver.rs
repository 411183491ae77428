//! Identity and path candidate resolution.
//!
//! The control plane does not say where an application's document root
//! lives, nor which account can read it. [`resolve`] turns the descriptors
//! into two ordered tiers of `(identity, path)` guesses: the least-privileged
//! application account first, the server-wide master account second.
//! Nothing here touches the network.

use app_directory::{ApplicationDescriptor, CredentialBundle, Secret, ServerDescriptor};
use serde::{Deserialize, Serialize};

/// Login used when the directory does not name the server's master account.
pub const DEFAULT_MASTER_USER: &str = "master";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityKind {
    Application,
    Master,
}

/// A remote account. The password is never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user: String,
    pub kind: IdentityKind,
    #[serde(skip)]
    pub password: Option<Secret>,
}

impl Identity {
    pub fn is_master(&self) -> bool {
        self.kind == IdentityKind::Master
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathCandidate {
    pub identity: Identity,
    pub remote_path: String,
}

/// Candidates grouped by tier, each in trial order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CandidatePlan {
    pub application: Vec<PathCandidate>,
    pub master: Vec<PathCandidate>,
}

impl CandidatePlan {
    /// First candidate of the application tier, else of the master tier.
    pub fn first(&self) -> Option<&PathCandidate> {
        self.application.first().or_else(|| self.master.first())
    }

    pub fn is_empty(&self) -> bool {
        self.application.is_empty() && self.master.is_empty()
    }
}

/// Server-wide directory holding every application: `/home/<id>.<domain>`.
pub fn server_apps_root(server: &ServerDescriptor, hosting_domain: &str) -> String {
    format!("/home/{}.{}", server.id, hosting_domain)
}

pub fn master_identity(server: &ServerDescriptor) -> Identity {
    Identity {
        user: server
            .master_user
            .clone()
            .unwrap_or_else(|| DEFAULT_MASTER_USER.to_string()),
        kind: IdentityKind::Master,
        password: server.master_password.clone(),
    }
}

/// The per-application account, if any source names one.
pub fn application_identity(
    app: &ApplicationDescriptor,
    bundle: &CredentialBundle,
) -> Option<Identity> {
    let user = bundle
        .sftp_username
        .clone()
        .or_else(|| app.sys_user.clone())?;
    Some(Identity {
        user,
        kind: IdentityKind::Application,
        password: bundle.sftp_password.clone(),
    })
}

/// Build the ordered candidate plan.
///
/// Application tier: the explicit SFTP account and path from the bundle,
/// then the conventional home-directory roots. Master tier: symlink alias,
/// system user, declared application path, numeric id.
pub fn resolve(
    app: &ApplicationDescriptor,
    server: &ServerDescriptor,
    bundle: &CredentialBundle,
    hosting_domain: &str,
) -> CandidatePlan {
    let mut plan = CandidatePlan::default();

    if let Some(identity) = application_identity(app, bundle) {
        let mut paths = Vec::new();

        if let (Some(_), Some(app_path)) = (&bundle.sftp_username, &bundle.application_path) {
            paths.push(explicit_app_path(app_path));
        }

        let sys_user = app.sys_user.as_deref().unwrap_or(&identity.user);
        paths.push("~/public_html/".to_string());
        paths.push(format!("/home/{sys_user}/public_html/"));

        plan.application = candidates(&identity, paths);
    }

    let root = server_apps_root(server, hosting_domain);
    let mut paths = Vec::new();
    if let Some(symlink) = &app.symlink {
        paths.push(format!("{root}/{symlink}/public_html/"));
    }
    if let Some(sys_user) = &app.sys_user {
        paths.push(format!("{root}/{sys_user}/public_html/"));
    }
    let declared = bundle
        .application_path
        .as_deref()
        .or(app.application_path.as_deref())
        .map(|p| p.trim_matches('/'))
        .filter(|p| !p.is_empty());
    if let Some(declared) = declared {
        paths.push(format!("{root}/{declared}/public_html/"));
    }
    paths.push(format!("{root}/applications/{}/public_html/", app.id));

    plan.master = candidates(&master_identity(server), paths);
    plan
}

/// An absolute path is taken as-is; a relative one hangs off the login's home.
fn explicit_app_path(app_path: &str) -> String {
    let trimmed = app_path.trim_end_matches('/');
    if trimmed.starts_with('/') {
        format!("{trimmed}/public_html/")
    } else {
        format!("~/{}/public_html/", trimmed.trim_start_matches('/'))
    }
}

/// Pair each path with `identity`, dropping repeats but keeping first-seen order.
fn candidates(identity: &Identity, paths: Vec<String>) -> Vec<PathCandidate> {
    let mut out: Vec<PathCandidate> = Vec::with_capacity(paths.len());
    for path in paths {
        if out.iter().any(|c| c.remote_path == path) {
            continue;
        }
        out.push(PathCandidate {
            identity: identity.clone(),
            remote_path: path,
        });
    }
    out
}
