//! Error types for the synchronization engine.

use std::path::PathBuf;

use app_directory::DirectoryError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Cannot reach SSH on {host}:{port}. Whitelist your IP in the server's security settings.")]
    Connectivity { host: String, port: u16 },

    #[error("Failed to sync files after {attempts} attempt(s): {summary}")]
    TransportExhausted { attempts: usize, summary: String },

    #[error("Credentials missing: {0}")]
    CredentialMissing(String),

    #[error("Database did not become ready after {attempts} attempt(s)")]
    DatabaseNotReady { attempts: u32 },

    #[error("Push safety violation: {0}")]
    PushSafetyViolation(String),

    #[error("Missing site manifest at {0}. Run `cwl pull` first for this site.")]
    ManifestMissing(PathBuf),

    /// `program` names the tool, never the full command line (which may
    /// carry credentials).
    #[error("Remote {program} exited with code {code}: {stderr}")]
    RemoteCommand {
        program: String,
        code: i32,
        stderr: String,
    },

    #[error("Local {program} failed: {detail}")]
    LocalCommand { program: String, detail: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Directory(#[from] DirectoryError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("SSH error: {0}")]
    Ssh(#[from] ssh2::Error),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, SyncError>;
