//! Configuration management for the sync engine.
//!
//! Loads configuration from a TOML file, then applies environment variable
//! overrides (including a `.env` file in the working directory).

use std::path::{Path, PathBuf};
use std::time::Duration;

use app_directory::{config::DEFAULT_BASE_URL, DirectoryConfig, Secret};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub sites: SitesConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default)]
    pub email: Option<String>,

    /// Never logged; converted to a `Secret` on the way to the client.
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SitesConfig {
    /// Directory holding one sub-directory per pulled site
    #[serde(default = "default_sites_root")]
    pub root: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Suffix of the per-server applications root (`/home/<server-id>.<domain>`)
    #[serde(default = "default_hosting_domain")]
    pub hosting_domain: String,

    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,

    /// Reachability probe timeout
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_server_alive_interval_secs")]
    pub server_alive_interval_secs: u64,

    #[serde(default = "default_server_alive_count_max")]
    pub server_alive_count_max: u32,

    /// Blocking timeout applied to every libssh2 call
    #[serde(default = "default_session_timeout_secs")]
    pub session_timeout_secs: u64,

    #[serde(default = "default_keepalive_interval_secs")]
    pub keepalive_interval_secs: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Upper bound of the local readiness poll
    #[serde(default = "default_ready_attempts")]
    pub ready_attempts: u32,

    #[serde(default = "default_ready_delay_ms")]
    pub ready_delay_ms: u64,

    #[serde(default = "default_local_root_password", skip_serializing)]
    pub local_root_password: String,

    /// Local database name used when neither the manifest nor `.env` names one
    #[serde(default = "default_database_name")]
    pub default_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values
fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_sites_root() -> PathBuf {
    PathBuf::from("./sites")
}

fn default_hosting_domain() -> String {
    "cloudwaysapps.com".to_string()
}

fn default_ssh_port() -> u16 {
    22
}

fn default_probe_timeout_secs() -> u64 {
    5
}

fn default_connect_timeout_secs() -> u64 {
    15
}

fn default_server_alive_interval_secs() -> u64 {
    30
}

fn default_server_alive_count_max() -> u32 {
    10
}

fn default_session_timeout_secs() -> u64 {
    60
}

fn default_keepalive_interval_secs() -> u32 {
    15
}

fn default_ready_attempts() -> u32 {
    60
}

fn default_ready_delay_ms() -> u64 {
    1000
}

fn default_local_root_password() -> String {
    "root".to_string()
}

fn default_database_name() -> String {
    "wordpress".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            email: None,
            api_key: None,
        }
    }
}

impl Default for SitesConfig {
    fn default() -> Self {
        Self {
            root: default_sites_root(),
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            hosting_domain: default_hosting_domain(),
            ssh_port: default_ssh_port(),
            probe_timeout_secs: default_probe_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            server_alive_interval_secs: default_server_alive_interval_secs(),
            server_alive_count_max: default_server_alive_count_max(),
            session_timeout_secs: default_session_timeout_secs(),
            keepalive_interval_secs: default_keepalive_interval_secs(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            ready_attempts: default_ready_attempts(),
            ready_delay_ms: default_ready_delay_ms(),
            local_root_password: default_local_root_password(),
            default_name: default_database_name(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl RemoteConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }
}

impl DatabaseConfig {
    pub fn ready_delay(&self) -> Duration {
        Duration::from_millis(self.ready_delay_ms)
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// File (if given) or defaults, then environment overrides.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        let _ = dotenvy::dotenv();
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Apply `CW_*` / `CWL_*` overrides read through `lookup`. Blank values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(email) = var("CW_EMAIL") {
            self.api.email = Some(email);
        }
        if let Some(key) = var("CW_API_KEY") {
            self.api.api_key = Some(key);
        }
        if let Some(base) = var("CW_API_BASE") {
            self.api.base_url = base;
        }
        if let Some(root) = var("CWL_SITES_ROOT") {
            self.sites.root = PathBuf::from(root);
        }
        if let Some(level) = var("CWL_LOG_LEVEL") {
            self.log.level = level;
        }
    }

    pub fn directory_config(&self) -> DirectoryConfig {
        DirectoryConfig {
            base_url: self.api.base_url.clone(),
            email: self.api.email.clone(),
            api_key: self.api.api_key.clone().map(Secret::new),
            ..DirectoryConfig::default()
        }
    }
}
