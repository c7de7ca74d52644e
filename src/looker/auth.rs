//! Looker API Authentication
//!
//! Exchanges API client credentials for short-lived access tokens via the
//! `login` endpoint and caches them until shortly before they expire.

use super::error::ApiError;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Token expiry buffer - refresh tokens this much before they actually expire
/// This prevents using tokens that are about to expire during a request
const TOKEN_EXPIRY_BUFFER: Duration = Duration::from_secs(60);

/// Token TTL used when the login response omits `expires_in` (Looker's default is one hour)
const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Deserialize)]
struct LoginResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Looker API credentials holder with token caching
#[derive(Clone)]
pub struct LookerCredentials {
    client: Client,
    login_url: String,
    client_id: String,
    client_secret: String,
    token_cache: Arc<RwLock<Option<CachedToken>>>,
}

#[derive(Clone)]
struct CachedToken {
    token: String,
    /// When this token expires (with buffer applied)
    expires_at: Instant,
}

impl CachedToken {
    fn is_valid(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

impl fmt::Debug for LookerCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LookerCredentials")
            .field("login_url", &self.login_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

impl LookerCredentials {
    pub fn new(client: Client, login_url: String, client_id: &str, client_secret: &str) -> Self {
        Self {
            client,
            login_url,
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            token_cache: Arc::new(RwLock::new(None)),
        }
    }

    /// Get an access token for API calls, logging in when the cache is empty or stale
    pub async fn get_token(&self) -> Result<String, ApiError> {
        {
            let cache = self.token_cache.read().await;
            if let Some(cached) = cache.as_ref() {
                if cached.is_valid() {
                    return Ok(cached.token.clone());
                }
                tracing::debug!("Cached token expired, logging in again");
            }
        }

        let (token, ttl) = self.login().await?;
        let expires_at = Instant::now() + ttl.saturating_sub(TOKEN_EXPIRY_BUFFER);

        {
            let mut cache = self.token_cache.write().await;
            *cache = Some(CachedToken {
                token: token.clone(),
                expires_at,
            });
        }

        tracing::debug!(
            "New token cached, expires in ~{} minutes",
            ttl.saturating_sub(TOKEN_EXPIRY_BUFFER).as_secs() / 60
        );

        Ok(token)
    }

    /// Force refresh the token
    pub async fn refresh_token(&self) -> Result<String, ApiError> {
        {
            let mut cache = self.token_cache.write().await;
            *cache = None;
        }

        self.get_token().await
    }

    async fn login(&self) -> Result<(String, Duration), ApiError> {
        tracing::debug!("POST {}", self.login_url);

        let form = format!(
            "client_id={}&client_secret={}",
            urlencoding::encode(&self.client_id),
            urlencoding::encode(&self.client_secret)
        );

        let response = self
            .client
            .post(&self.login_url)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            // Never log the body here: it may echo the submitted credentials
            tracing::error!("Looker login failed: {}", status);
            return Err(ApiError::Login(status));
        }

        let body = response.text().await?;
        let login: LoginResponse = serde_json::from_str(&body)?;
        let ttl = login
            .expires_in
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TOKEN_TTL);

        Ok((login.access_token, ttl))
    }
}
