//! Site directory naming and resolution.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::LazyLock;

use regex::Regex;
use tokio::process::Command;

use super::{DUMP_FILE, DUMP_GZ_FILE, ENV_FILE, FILES_DIR, MANIFEST_FILE, PUSH_DUMP_FILE, STATE_DIR};
use crate::utils::{Result, SyncError};

static NON_SLUG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9]+").expect("slug regex is valid"));

static ENV_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Z_][A-Z0-9_]*)=(.*)$").expect("env line regex is valid"));

/// `"My Shop (Staging)"` becomes `"my-shop-staging"`.
pub fn slugify(label: &str) -> String {
    NON_SLUG
        .replace_all(&label.to_lowercase(), "-")
        .trim_matches('-')
        .to_string()
}

/// Directory name for an application. Labels with nothing slug-worthy
/// (e.g. only non-Latin characters) fall back to `app-<id>`.
pub fn site_slug(label: &str, app_id: &str) -> String {
    let slug = slugify(label);
    if !slug.is_empty() {
        return slug;
    }
    match slugify(app_id) {
        id if id.is_empty() => "app".to_string(),
        id => format!("app-{id}"),
    }
}

/// Paths inside one site directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteLayout {
    root: PathBuf,
}

impl SiteLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn files_dir(&self) -> PathBuf {
        self.root.join(FILES_DIR)
    }

    pub fn state_dir(&self) -> PathBuf {
        self.root.join(STATE_DIR)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.state_dir().join(MANIFEST_FILE)
    }

    pub fn dump_path(&self) -> PathBuf {
        self.state_dir().join(DUMP_FILE)
    }

    pub fn dump_gz_path(&self) -> PathBuf {
        self.state_dir().join(DUMP_GZ_FILE)
    }

    pub fn push_dump_path(&self) -> PathBuf {
        self.state_dir().join(PUSH_DUMP_FILE)
    }

    pub fn env_path(&self) -> PathBuf {
        self.root.join(ENV_FILE)
    }

    pub fn ensure(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.files_dir())?;
        std::fs::create_dir_all(self.state_dir())
    }

    /// Whether `dir` looks like a pulled site.
    pub fn is_site(dir: &Path) -> bool {
        dir.is_dir()
            && [
                dir.join("docker-compose.yml"),
                dir.join("docker-compose.yaml"),
                dir.join(FILES_DIR),
                dir.join(STATE_DIR),
            ]
            .iter()
            .any(|p| p.exists())
    }
}

/// `KEY=value` pairs of a site's `.env`. A missing file is an empty map.
pub fn read_env_file(path: &Path) -> BTreeMap<String, String> {
    let Ok(text) = std::fs::read_to_string(path) else {
        return BTreeMap::new();
    };
    text.lines()
        .filter_map(|line| ENV_LINE.captures(line.trim_end_matches('\r')))
        .map(|caps| (caps[1].to_string(), caps[2].trim().to_string()))
        .collect()
}

fn expand_home(arg: &str) -> PathBuf {
    let home = || std::env::var("HOME").or_else(|_| std::env::var("USERPROFILE")).ok();
    if arg == "~" {
        if let Some(home) = home() {
            return PathBuf::from(home);
        }
    } else if let Some(rest) = arg.strip_prefix("~/") {
        if let Some(home) = home() {
            return Path::new(&home).join(rest);
        }
    }
    PathBuf::from(arg)
}

/// Turn a site argument into a directory.
///
/// Paths are used as given. A bare name resolves under `sites_root`, or to a
/// same-named directory in `cwd` when only that exists. Without an argument,
/// `cwd` must itself be a site.
pub fn resolve_site_arg(arg: Option<&str>, sites_root: &Path, cwd: &Path) -> Result<PathBuf> {
    let Some(arg) = arg.map(str::trim).filter(|a| !a.is_empty()) else {
        if SiteLayout::is_site(cwd) {
            return Ok(cwd.to_path_buf());
        }
        return Err(SyncError::NotFound(
            "no site given and the current directory is not a site".into(),
        ));
    };

    let looks_like_path =
        arg.starts_with('.') || arg.starts_with('/') || arg.starts_with('~') || arg.contains('/');
    if looks_like_path {
        let path = expand_home(arg);
        return Ok(if path.is_absolute() { path } else { cwd.join(path) });
    }

    let in_root = sites_root.join(arg);
    if in_root.exists() {
        return Ok(in_root);
    }
    let in_cwd = cwd.join(arg);
    if in_cwd.exists() {
        return Ok(in_cwd);
    }
    Ok(in_root)
}

/// Stop the site's containers (best effort) and delete the directory.
pub async fn remove_site(dir: &Path) -> Result<()> {
    if !dir.is_dir() {
        return Err(SyncError::NotFound(format!("site directory {}", dir.display())));
    }

    match Command::new("docker")
        .args(["compose", "down", "--remove-orphans", "--volumes"])
        .current_dir(dir)
        .stdin(Stdio::null())
        .status()
        .await
    {
        Ok(status) if status.success() => tracing::info!("Stopped site containers"),
        Ok(status) => tracing::debug!(?status, "docker compose down failed"),
        Err(e) => tracing::debug!(error = %e, "docker not available"),
    }

    tokio::fs::remove_dir_all(dir).await?;
    tracing::info!(path = %dir.display(), "Removed site");
    Ok(())
}
