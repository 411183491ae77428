mod application;
mod credentials;
mod secret;
mod server;

pub use application::{ApplicationDescriptor, DeployedApplication};
pub use credentials::CredentialBundle;
pub use secret::Secret;
pub use server::ServerDescriptor;
