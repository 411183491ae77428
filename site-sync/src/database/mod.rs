//! Database dump and restore.
//!
//! Dumps are always full and always scoped to an explicit database name;
//! the name is never read back out of a dump.

pub mod capabilities;
pub mod local;
pub mod remote;

use std::path::{Path, PathBuf};

use app_directory::{ApplicationDescriptor, CredentialBundle, Secret};
use async_trait::async_trait;

use crate::remote::Endpoint;
use crate::resolver::Identity;
use crate::utils::Result;

pub use capabilities::DumpCapabilities;
pub use local::LocalDatabase;
pub use remote::MysqlOverSsh;

/// Complete database login. Built only when all three parts are known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbCredentials {
    pub user: String,
    pub password: Secret,
    pub name: String,
}

impl DbCredentials {
    pub fn from_bundle(bundle: &CredentialBundle, app: &ApplicationDescriptor) -> Option<Self> {
        Some(Self {
            user: bundle.db_username.clone()?,
            password: bundle.db_password.clone()?,
            name: bundle
                .db_name
                .clone()
                .or_else(|| app.database_name.clone())?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpEncoding {
    Plain,
    Gzip,
}

/// A dump file on local disk and the database it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseDump {
    pub path: PathBuf,
    pub encoding: DumpEncoding,
    pub db_name: String,
}

impl DatabaseDump {
    /// The dump artifact present in a state directory, compressed first.
    pub fn locate(state_dir: &Path, db_name: &str) -> Option<Self> {
        [
            (crate::site::DUMP_GZ_FILE, DumpEncoding::Gzip),
            (crate::site::DUMP_FILE, DumpEncoding::Plain),
        ]
        .into_iter()
        .map(|(file, encoding)| (state_dir.join(file), encoding))
        .find(|(path, _)| path.is_file())
        .map(|(path, encoding)| Self {
            path,
            encoding,
            db_name: db_name.to_string(),
        })
    }
}

/// Dump and restore over the identity that won the file transfer.
#[async_trait]
pub trait RemoteDatabase: Send + Sync {
    /// Write a dump into `state_dir`. A non-zero remote exit is an error.
    async fn export(
        &self,
        endpoint: &Endpoint,
        identity: &Identity,
        creds: &DbCredentials,
        state_dir: &Path,
    ) -> Result<DatabaseDump>;

    /// Feed a plain SQL file into the remote database.
    async fn import(
        &self,
        endpoint: &Endpoint,
        identity: &Identity,
        creds: &DbCredentials,
        dump: &Path,
    ) -> Result<()>;

    /// Rewrite URLs inside the application at `remote_path` with wp-cli.
    /// A `None` target means "the site's own `siteurl`".
    async fn rewrite_urls(
        &self,
        endpoint: &Endpoint,
        identity: &Identity,
        remote_path: &str,
        from: &str,
        to: Option<&str>,
    ) -> Result<()>;
}
