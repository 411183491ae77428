//! Application directory client.
//!
//! Lists servers and deployed applications, fetches per-application
//! credentials and requests server-side clones from the hosting control
//! plane. Responses are normalized here into the descriptor types; callers
//! never see raw API JSON.

pub mod client;
pub mod config;
pub mod error;
pub mod models;
pub mod shapes;

use async_trait::async_trait;

pub use client::CloudwaysClient;
pub use config::DirectoryConfig;
pub use error::{DirectoryError, Result};
pub use models::{
    ApplicationDescriptor, CredentialBundle, DeployedApplication, Secret, ServerDescriptor,
};

/// The control-plane operations the sync engine consumes.
#[async_trait]
pub trait ApplicationDirectory: Send + Sync {
    async fn list_servers(&self) -> Result<Vec<ServerDescriptor>>;

    async fn list_applications(&self) -> Result<Vec<DeployedApplication>>;

    /// Never fails for a merely sparse answer: absent fields stay `None`.
    async fn application_credentials(&self, app_id: &str) -> Result<CredentialBundle>;

    /// Returns the identifier of the newly created application.
    async fn clone_application(
        &self,
        app_id: &str,
        target_server_id: &str,
        label: &str,
    ) -> Result<String>;

    async fn find_application(&self, app_id: &str) -> Result<DeployedApplication> {
        self.list_applications()
            .await?
            .into_iter()
            .find(|d| d.app.id == app_id)
            .ok_or_else(|| DirectoryError::ApplicationNotFound(app_id.to_string()))
    }
}
