use super::Secret;

/// A physical or virtual host as reported by the directory.
///
/// Every field except `id` may be missing upstream; callers fall back to
/// conventions (for example the `master` login) when a field is absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerDescriptor {
    pub id: String,
    pub label: String,
    pub public_ip: Option<String>,
    pub master_user: Option<String>,
    pub master_password: Option<Secret>,
}

impl ServerDescriptor {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            label: id.clone(),
            id,
            public_ip: None,
            master_user: None,
            master_password: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_public_ip(mut self, ip: impl Into<String>) -> Self {
        self.public_ip = Some(ip.into());
        self
    }

    pub fn with_master(mut self, user: impl Into<String>, password: Option<Secret>) -> Self {
        self.master_user = Some(user.into());
        self.master_password = password;
        self
    }
}
