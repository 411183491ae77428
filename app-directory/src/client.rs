use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::config::DirectoryConfig;
use crate::error::{DirectoryError, Result};
use crate::models::{CredentialBundle, DeployedApplication, Secret, ServerDescriptor};
use crate::shapes;
use crate::ApplicationDirectory;

/// Tokens are renewed this long before the server-side expiry.
const TOKEN_RENEW_MARGIN_SECS: i64 = 60;
const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3600;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<i64>,
}

#[derive(Debug, Clone)]
struct AccessToken {
    value: Secret,
    expires_at: DateTime<Utc>,
}

impl AccessToken {
    fn from_response(resp: TokenResponse, now: DateTime<Utc>) -> Self {
        let lifetime = resp.expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS);
        Self {
            value: Secret::new(resp.access_token),
            expires_at: now + chrono::Duration::seconds(lifetime),
        }
    }

    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at - chrono::Duration::seconds(TOKEN_RENEW_MARGIN_SECS)
    }
}

/// HTTP client for the hosting control plane.
///
/// The bearer token is cached on the instance, so two clients never share
/// authentication state.
pub struct CloudwaysClient {
    http: reqwest::Client,
    config: DirectoryConfig,
    token: Mutex<Option<AccessToken>>,
}

impl CloudwaysClient {
    pub fn new(config: DirectoryConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            config,
            token: Mutex::new(None),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn access_token(&self) -> Result<Secret> {
        let mut cached = self.token.lock().await;
        let now = Utc::now();
        if let Some(token) = cached.as_ref().filter(|t| t.is_fresh(now)) {
            return Ok(token.value.clone());
        }

        let (email, api_key) = match (&self.config.email, &self.config.api_key) {
            (Some(email), Some(key)) => (email, key),
            _ => return Err(DirectoryError::NotAuthenticated),
        };

        tracing::debug!("Requesting new API access token");
        let resp = self
            .http
            .post(self.url("/oauth/access_token"))
            .json(&json!({ "email": email, "api_key": api_key.expose() }))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(DirectoryError::Status {
                path: "/oauth/access_token".into(),
                status: resp.status().as_u16(),
            });
        }
        let token = AccessToken::from_response(resp.json::<TokenResponse>().await?, now);
        let value = token.value.clone();
        *cached = Some(token);
        Ok(value)
    }

    async fn invalidate_token(&self) {
        *self.token.lock().await = None;
    }

    /// Authenticated request. A rejected token is dropped and the call is
    /// retried once with a fresh one.
    pub async fn api(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Value> {
        for attempt in 0..2 {
            let token = self.access_token().await?;
            let mut req = self
                .http
                .request(method.clone(), self.url(path))
                .bearer_auth(token.expose());
            if let Some(body) = body {
                req = req.json(body);
            }

            let resp = req.send().await?;
            let status = resp.status();
            if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) && attempt == 0 {
                tracing::debug!(path, status = status.as_u16(), "Token rejected, retrying once");
                self.invalidate_token().await;
                continue;
            }
            if !status.is_success() {
                return Err(DirectoryError::Status {
                    path: path.to_string(),
                    status: status.as_u16(),
                });
            }
            return Ok(resp.json::<Value>().await?);
        }
        Err(DirectoryError::NotAuthenticated)
    }

    async fn get(&self, path: &str) -> Result<Value> {
        self.api(Method::GET, path, None).await
    }

    async fn server_entries(&self) -> Result<Vec<shapes::ServerEntry>> {
        let body = self.get("/server").await?;
        shapes::parse_servers("/server", body)
    }
}

#[async_trait]
impl ApplicationDirectory for CloudwaysClient {
    async fn list_servers(&self) -> Result<Vec<ServerDescriptor>> {
        Ok(self
            .server_entries()
            .await?
            .into_iter()
            .map(|e| e.server)
            .collect())
    }

    async fn list_applications(&self) -> Result<Vec<DeployedApplication>> {
        let mut all = Vec::new();
        for entry in self.server_entries().await? {
            let apps = if !entry.embedded_apps.is_empty() {
                entry.embedded_apps
            } else {
                let path = format!("/apps?server_id={}", entry.server.id);
                let body = match self.get(&path).await {
                    Ok(body) => body,
                    Err(e) => {
                        tracing::debug!(server_id = %entry.server.id, error = %e, "Falling back to legacy app listing");
                        self.get(&format!("/app?server_id={}", entry.server.id)).await?
                    }
                };
                shapes::parse_applications(&path, body)?
            };

            all.extend(apps.into_iter().map(|app| DeployedApplication {
                server: entry.server.clone(),
                app,
            }));
        }
        Ok(all)
    }

    async fn application_credentials(&self, app_id: &str) -> Result<CredentialBundle> {
        let paths = [
            format!("/apps/{app_id}/credentials"),
            format!("/apps/{app_id}"),
            format!("/app/{app_id}"),
            format!("/app/credentials?app_id={app_id}"),
        ];
        for path in &paths {
            match self.get(path).await {
                Ok(body) => return Ok(shapes::credentials_from_value(&body)),
                Err(DirectoryError::NotAuthenticated) => return Err(DirectoryError::NotAuthenticated),
                Err(e) => tracing::trace!(path = %path, error = %e, "Credential endpoint failed"),
            }
        }
        tracing::warn!(app_id, "No credential endpoint answered, continuing with an empty bundle");
        Ok(CredentialBundle::default())
    }

    async fn clone_application(
        &self,
        app_id: &str,
        target_server_id: &str,
        label: &str,
    ) -> Result<String> {
        let body = json!({ "app_id": app_id, "server_id": target_server_id, "label": label });
        let resp = match self.api(Method::POST, "/app/clone", Some(&body)).await {
            Ok(resp) => resp,
            Err(e) => {
                tracing::debug!(error = %e, "Clone via /app/clone failed, trying /apps/clone");
                self.api(Method::POST, "/apps/clone", Some(&body)).await?
            }
        };
        shapes::clone_id_from_value(&resp).ok_or_else(|| DirectoryError::CloneIdMissing(app_id.to_string()))
    }
}
