use super::Secret;

/// Per-application credentials. Any field may be absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialBundle {
    pub sftp_username: Option<String>,
    pub sftp_password: Option<Secret>,
    pub db_username: Option<String>,
    pub db_password: Option<Secret>,
    pub db_name: Option<String>,
    pub application_path: Option<String>,
}

impl CredentialBundle {
    pub fn is_empty(&self) -> bool {
        self == &CredentialBundle::default()
    }

    /// True when user, password and database name are all present.
    pub fn has_database(&self) -> bool {
        self.db_username.is_some() && self.db_password.is_some() && self.db_name.is_some()
    }
}
