#[derive(thiserror::Error, Debug)]
pub enum DirectoryError {
    #[error("Not authenticated: set CW_EMAIL and CW_API_KEY (or [api] email/api_key in the config file)")]
    NotAuthenticated,

    #[error("Request to {path} failed with status {status}")]
    Status { path: String, status: u16 },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected response shape from {path}: {reason}")]
    UnexpectedShape { path: String, reason: String },

    #[error("Application {0} not found")]
    ApplicationNotFound(String),

    #[error("Clone request for application {0} returned no application id")]
    CloneIdMissing(String),
}

impl DirectoryError {
    /// True for responses that mean the bearer token was rejected.
    pub fn is_auth_rejection(&self) -> bool {
        matches!(self, DirectoryError::Status { status: 401 | 403, .. })
    }
}

pub type Result<T> = std::result::Result<T, DirectoryError>;
