//! HTTP utilities for Looker REST API calls

use super::error::ApiError;
use reqwest::{Client, Method, StatusCode};
use serde_json::Value;
use std::time::Duration;

/// Maximum length of response body to log (to avoid logging sensitive data)
const MAX_LOG_BODY_LENGTH: usize = 200;

/// Sanitize response body for logging
/// Truncates long responses and strips control characters
pub(crate) fn sanitize_for_log(body: &str) -> String {
    let truncated = if body.chars().count() > MAX_LOG_BODY_LENGTH {
        let head: String = body.chars().take(MAX_LOG_BODY_LENGTH).collect();
        format!("{}... [truncated, {} bytes total]", head, body.len())
    } else {
        body.to_string()
    };

    truncated.replace(|c: char| !c.is_ascii_graphic() && c != ' ', "")
}

/// HTTP client wrapper for Looker API calls
#[derive(Clone)]
pub struct LookerHttpClient {
    client: Client,
}

impl std::fmt::Debug for LookerHttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("LookerHttpClient")
    }
}

impl LookerHttpClient {
    /// Create a new HTTP client with a per-request timeout
    pub fn new(timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder()
            .user_agent(concat!("lookerctl/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;

        Ok(Self { client })
    }

    /// Underlying reqwest client, shared with the login flow
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Send one authenticated request and decode the JSON response
    pub async fn send(
        &self,
        method: Method,
        url: &str,
        token: &str,
        body: Option<&Value>,
    ) -> Result<Value, ApiError> {
        tracing::debug!("{} {}", method, url);

        let mut request = self.client.request(method, url).bearer_auth(token);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;

        let status = response.status();
        let response_body = response.text().await?;

        if !status.is_success() {
            // Only log sanitized/truncated error body to avoid leaking sensitive data
            if status == StatusCode::NOT_FOUND {
                tracing::debug!("API returned 404 for {}", url);
            } else {
                tracing::error!("API error: {} - {}", status, sanitize_for_log(&response_body));
            }
            return Err(ApiError::from_status(status, &response_body));
        }

        // DELETE and some PATCH calls answer 204 with no content
        if response_body.trim().is_empty() {
            return Ok(Value::Null);
        }

        Ok(serde_json::from_str(&response_body)?)
    }
}

/// Format a Looker API error for display
/// Maps status codes to short operator-facing messages without echoing API details
pub fn format_api_error(error: &ApiError) -> String {
    match error.status().map(|s| s.as_u16()) {
        Some(401) => {
            return "Authentication failed. Check LOOKER_API_CLIENT_ID and LOOKER_API_CLIENT_SECRET."
                .to_string()
        }
        Some(403) => return "Permission denied. The API user needs the admin role.".to_string(),
        Some(404) => return "Resource not found.".to_string(),
        Some(409) => return "Conflict. The email may already belong to another user.".to_string(),
        Some(422) => return "Invalid request. Check the declared user fields.".to_string(),
        Some(429) => return "Rate limit exceeded. Please try again later.".to_string(),
        Some(500) | Some(502) | Some(503) => {
            return "Looker temporarily unavailable. Please try again.".to_string()
        }
        _ => {}
    }

    if let ApiError::Transport(err) = error {
        if err.is_timeout() {
            return "Request timed out.".to_string();
        }
        return "Request failed. Check your network connection and base URL.".to_string();
    }

    let error_str = error.to_string();
    let sanitized = error_str
        .chars()
        .filter(|c| c.is_ascii_graphic() || *c == ' ')
        .take(80)
        .collect::<String>();

    if sanitized.len() < error_str.len() {
        format!("{}...", sanitized)
    } else {
        sanitized
    }
}
