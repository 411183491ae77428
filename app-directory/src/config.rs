use crate::models::Secret;

pub const DEFAULT_BASE_URL: &str = "https://api.cloudways.com/api/v1";

#[derive(Debug, Clone)]
pub struct DirectoryConfig {
    pub base_url: String,
    pub email: Option<String>,
    pub api_key: Option<Secret>,
    pub timeout_secs: u64,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.into(),
            email: None,
            api_key: None,
            timeout_secs: 30,
        }
    }
}

impl DirectoryConfig {
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();

        Self {
            base_url: std::env::var("CW_API_BASE").unwrap_or_else(|_| DEFAULT_BASE_URL.into()),
            email: non_empty_var("CW_EMAIL"),
            api_key: non_empty_var("CW_API_KEY").map(Secret::new),
            timeout_secs: std::env::var("CW_API_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
        }
    }

    pub fn has_credentials(&self) -> bool {
        self.email.is_some() && self.api_key.is_some()
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}
