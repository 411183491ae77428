use super::ServerDescriptor;

/// One deployed application on a server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationDescriptor {
    pub id: String,
    pub label: String,
    pub symlink: Option<String>,
    pub sys_user: Option<String>,
    pub application_path: Option<String>,
    pub database_name: Option<String>,
}

impl ApplicationDescriptor {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            symlink: None,
            sys_user: None,
            application_path: None,
            database_name: None,
        }
    }

    pub fn with_symlink(mut self, symlink: impl Into<String>) -> Self {
        self.symlink = Some(symlink.into());
        self
    }

    pub fn with_sys_user(mut self, user: impl Into<String>) -> Self {
        self.sys_user = Some(user.into());
        self
    }

    pub fn with_application_path(mut self, path: impl Into<String>) -> Self {
        self.application_path = Some(path.into());
        self
    }

    pub fn with_database_name(mut self, name: impl Into<String>) -> Self {
        self.database_name = Some(name.into());
        self
    }
}

/// An application together with the server hosting it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployedApplication {
    pub server: ServerDescriptor,
    pub app: ApplicationDescriptor,
}
