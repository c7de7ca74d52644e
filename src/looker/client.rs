//! Looker Client
//!
//! Main client for the Looker REST API, combining authentication
//! and HTTP functionality.

use super::auth::LookerCredentials;
use super::error::ApiError;
use super::http::LookerHttpClient;
use reqwest::Method;
use serde_json::Value;
use std::time::Duration;
use url::Url;

/// Default Looker API version
pub const DEFAULT_API_VERSION: &str = "4.0";

/// Main Looker client
#[derive(Clone, Debug)]
pub struct LookerClient {
    pub credentials: LookerCredentials,
    pub http: LookerHttpClient,
    api_root: Url,
}

impl LookerClient {
    /// Create a new Looker client for an instance base URL such as
    /// `https://mycompany.cloud.looker.com`
    pub fn new(
        base_url: &Url,
        api_version: &str,
        client_id: &str,
        client_secret: &str,
        timeout: Duration,
    ) -> Result<Self, ApiError> {
        let api_root = api_root(base_url, api_version)?;
        let http = LookerHttpClient::new(timeout)?;
        let credentials = LookerCredentials::new(
            http.inner().clone(),
            format!("{}login", api_root),
            client_id,
            client_secret,
        );

        Ok(Self {
            credentials,
            http,
            api_root,
        })
    }

    pub async fn get(&self, url: &str) -> Result<Value, ApiError> {
        self.call(Method::GET, url, None).await
    }

    pub async fn post(&self, url: &str, body: Option<&Value>) -> Result<Value, ApiError> {
        self.call(Method::POST, url, body).await
    }

    pub async fn patch(&self, url: &str, body: &Value) -> Result<Value, ApiError> {
        self.call(Method::PATCH, url, Some(body)).await
    }

    pub async fn put(&self, url: &str, body: &Value) -> Result<Value, ApiError> {
        self.call(Method::PUT, url, Some(body)).await
    }

    pub async fn delete(&self, url: &str) -> Result<Value, ApiError> {
        self.call(Method::DELETE, url, None).await
    }

    /// Send with the cached token; on 401 log in again and retry once
    async fn call(&self, method: Method, url: &str, body: Option<&Value>) -> Result<Value, ApiError> {
        let token = self.credentials.get_token().await?;
        match self.http.send(method.clone(), url, &token, body).await {
            Err(err) if err.is_unauthorized() => {
                tracing::debug!("Token rejected, logging in again");
                let token = self.credentials.refresh_token().await?;
                self.http.send(method, url, &token, body).await
            }
            other => other,
        }
    }

    // =========================================================================
    // URL helpers
    // =========================================================================

    /// Build an API URL relative to `/api/<version>/`
    pub fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.api_root, path.trim_start_matches('/'))
    }

    pub fn users_url(&self) -> String {
        self.api_url("users")
    }

    pub fn user_url(&self, user_id: &str) -> String {
        self.api_url(&format!("users/{}", urlencoding::encode(user_id)))
    }

    pub fn user_email_url(&self, user_id: &str) -> String {
        format!("{}/credentials_email", self.user_url(user_id))
    }

    pub fn user_roles_url(&self, user_id: &str) -> String {
        format!("{}/roles", self.user_url(user_id))
    }
}

/// Resolve `<base>/api/<version>/`, keeping any path prefix on the base URL
fn api_root(base_url: &Url, api_version: &str) -> Result<Url, ApiError> {
    let mut base = base_url.clone();
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    Ok(base.join(&format!("api/{}/", api_version))?)
}
