//! Pull and push orchestration.
//!
//! [`SyncEngine`] wires the application directory, the candidate resolver,
//! the transport chain and the database transfer together. Every external
//! collaborator sits behind a trait so tests can swap it out.

pub mod diagnose;
pub mod pull;
pub mod push;
pub mod restore;

use std::path::PathBuf;
use std::sync::Arc;

use app_directory::{ApplicationDirectory, DeployedApplication};

use crate::config::Config;
use crate::database::{MysqlOverSsh, RemoteDatabase};
use crate::remote::{Endpoint, Reachability, TcpProbe};
use crate::transport::{
    ArchiveTransport, MirrorTransport, SecureCopyTransport, TransferOutcome, Transport,
    TransportChain,
};
use crate::utils::{Result, SyncError};

pub use diagnose::{CheckResult, DiagnosticReport};
pub use restore::{restore_local_database, RestoreReport};

#[derive(Debug, Clone, Default)]
pub struct PullOptions {
    /// Explicit site directory; defaults to `<sites-root>/<slug>`.
    pub directory: Option<PathBuf>,
    /// Try a single tar stream before rsync.
    pub archive: bool,
    /// The source is a live application; later pushes always clone.
    pub live_source: bool,
}

#[derive(Debug, Clone)]
pub struct PullReport {
    pub local_directory: PathBuf,
    pub resolved_database_name: Option<String>,
    pub outcome: TransferOutcome,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PushOptions {
    pub target_app_id: Option<String>,
    /// Label for a clone created by the push guard.
    pub new_label: Option<String>,
    pub files_only: bool,
    pub db_only: bool,
    /// URL to rewrite the local URL to on the target. Defaults to the
    /// target's own `siteurl`.
    pub target_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PushReport {
    pub target_app_id: String,
    pub cloned: bool,
    /// `None` for database-only pushes.
    pub outcome: Option<TransferOutcome>,
    pub database_pushed: bool,
    pub warnings: Vec<String>,
}

pub struct SyncEngine {
    directory: Arc<dyn ApplicationDirectory>,
    probe: Arc<dyn Reachability>,
    transports: Vec<Arc<dyn Transport>>,
    database: Arc<dyn RemoteDatabase>,
    config: Config,
}

impl SyncEngine {
    pub fn new(directory: Arc<dyn ApplicationDirectory>, config: Config) -> Self {
        let transports: Vec<Arc<dyn Transport>> = vec![
            Arc::new(ArchiveTransport::new()),
            Arc::new(MirrorTransport::new()),
            Arc::new(SecureCopyTransport::new()),
        ];
        Self {
            directory,
            probe: Arc::new(TcpProbe::new(config.remote.probe_timeout())),
            transports,
            database: Arc::new(MysqlOverSsh::new()),
            config,
        }
    }

    pub fn with_probe(mut self, probe: Arc<dyn Reachability>) -> Self {
        self.probe = probe;
        self
    }

    pub fn with_transports(mut self, transports: Vec<Arc<dyn Transport>>) -> Self {
        self.transports = transports;
        self
    }

    pub fn with_database(mut self, database: Arc<dyn RemoteDatabase>) -> Self {
        self.database = database;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn directory(&self) -> &dyn ApplicationDirectory {
        self.directory.as_ref()
    }

    fn chain(&self) -> TransportChain {
        TransportChain::new(self.probe.clone(), self.transports.clone())
    }

    /// SSH endpoint of the server hosting `deployed`.
    fn endpoint(&self, deployed: &DeployedApplication) -> Result<Endpoint> {
        let host = deployed
            .server
            .public_ip
            .as_deref()
            .map(str::trim)
            .filter(|ip| !ip.is_empty())
            .ok_or_else(|| {
                SyncError::Config(format!(
                    "server {} has no public IP in the application directory",
                    deployed.server.id
                ))
            })?;
        Ok(Endpoint::new(host, self.config.remote.clone()))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory collaborators shared by the engine tests.

    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::Mutex;

    use app_directory::{
        ApplicationDescriptor, CredentialBundle, DeployedApplication, DirectoryError, Secret,
        ServerDescriptor,
    };
    use async_trait::async_trait;

    use super::*;
    use crate::database::{DatabaseDump, DbCredentials, DumpEncoding};
    use crate::resolver::{Identity, PathCandidate};
    use crate::transport::{AttemptFailure, FailureKind, TransferJob, TransferMethod};

    #[derive(Default)]
    pub struct MemoryDirectory {
        pub apps: Mutex<Vec<DeployedApplication>>,
        pub credentials: HashMap<String, CredentialBundle>,
        pub clones: Mutex<Vec<(String, String, String)>>,
    }

    impl MemoryDirectory {
        pub fn with_app(app: DeployedApplication) -> Self {
            Self {
                apps: Mutex::new(vec![app]),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl ApplicationDirectory for MemoryDirectory {
        async fn list_servers(&self) -> app_directory::Result<Vec<ServerDescriptor>> {
            let apps = self.apps.lock().unwrap();
            Ok(apps.iter().map(|d| d.server.clone()).collect())
        }

        async fn list_applications(&self) -> app_directory::Result<Vec<DeployedApplication>> {
            Ok(self.apps.lock().unwrap().clone())
        }

        async fn application_credentials(
            &self,
            app_id: &str,
        ) -> app_directory::Result<CredentialBundle> {
            Ok(self.credentials.get(app_id).cloned().unwrap_or_default())
        }

        async fn clone_application(
            &self,
            app_id: &str,
            target_server_id: &str,
            label: &str,
        ) -> app_directory::Result<String> {
            let mut apps = self.apps.lock().unwrap();
            let source = apps
                .iter()
                .find(|d| d.app.id == app_id)
                .cloned()
                .ok_or_else(|| DirectoryError::ApplicationNotFound(app_id.to_string()))?;

            let new_id = format!("{app_id}-clone");
            let mut clone = source;
            clone.app.id = new_id.clone();
            clone.app.label = label.to_string();
            apps.push(clone);

            self.clones.lock().unwrap().push((
                app_id.to_string(),
                target_server_id.to_string(),
                label.to_string(),
            ));
            Ok(new_id)
        }
    }

    pub struct OpenProbe;

    #[async_trait]
    impl Reachability for OpenProbe {
        async fn probe(&self, _host: &str, _port: u16) -> Result<()> {
            Ok(())
        }
    }

    /// Succeeds on the first candidate, writing a file into the local tree
    /// on pulls. Records each candidate it was handed.
    #[derive(Default)]
    pub struct RecordingTransport {
        pub seen: Mutex<Vec<PathCandidate>>,
        pub fail_all: bool,
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        fn method(&self) -> TransferMethod {
            TransferMethod::Sync
        }

        async fn transfer(
            &self,
            job: &TransferJob,
            candidate: &PathCandidate,
        ) -> std::result::Result<(), AttemptFailure> {
            self.seen.lock().unwrap().push(candidate.clone());
            if self.fail_all {
                return Err(AttemptFailure::new(FailureKind::Missing, "no such file"));
            }
            if job.direction == crate::transport::Direction::Pull {
                std::fs::write(job.local_root.join("index.php"), b"<?php")?;
            }
            Ok(())
        }
    }

    #[derive(Default)]
    pub struct MemoryDatabase {
        pub exports: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl RemoteDatabase for MemoryDatabase {
        async fn export(
            &self,
            _endpoint: &Endpoint,
            _identity: &Identity,
            creds: &DbCredentials,
            state_dir: &Path,
        ) -> Result<DatabaseDump> {
            self.exports.lock().unwrap().push(creds.name.clone());
            let path = state_dir.join(crate::site::DUMP_FILE);
            std::fs::write(&path, b"-- dump")?;
            Ok(DatabaseDump {
                path,
                encoding: DumpEncoding::Plain,
                db_name: creds.name.clone(),
            })
        }

        async fn import(
            &self,
            _endpoint: &Endpoint,
            _identity: &Identity,
            _creds: &DbCredentials,
            _dump: &Path,
        ) -> Result<()> {
            Ok(())
        }

        async fn rewrite_urls(
            &self,
            _endpoint: &Endpoint,
            _identity: &Identity,
            _remote_path: &str,
            _from: &str,
            _to: Option<&str>,
        ) -> Result<()> {
            Ok(())
        }
    }

    pub fn shop() -> DeployedApplication {
        DeployedApplication {
            server: ServerDescriptor::new("55")
                .with_label("eu-1")
                .with_public_ip("203.0.113.9")
                .with_master("master", Some(Secret::new("m-pass"))),
            app: ApplicationDescriptor::new("4021", "Shop").with_sys_user("acme"),
        }
    }

    pub fn db_bundle() -> CredentialBundle {
        CredentialBundle {
            db_username: Some("shop".into()),
            db_password: Some(Secret::new("db-pass")),
            db_name: Some("shopdb".into()),
            ..CredentialBundle::default()
        }
    }

    pub fn engine(
        directory: MemoryDirectory,
        transport: Arc<RecordingTransport>,
        database: Arc<MemoryDatabase>,
        sites_root: &Path,
    ) -> SyncEngine {
        let mut config = Config::default();
        config.sites.root = sites_root.to_path_buf();
        SyncEngine::new(Arc::new(directory), config)
            .with_probe(Arc::new(OpenProbe))
            .with_transports(vec![transport as Arc<dyn Transport>])
            .with_database(database)
    }
}
