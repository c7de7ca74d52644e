//! Looker API errors

use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;

/// Errors returned by the Looker API client
#[derive(Debug, Error)]
pub enum ApiError {
    /// The requested entity does not exist (HTTP 404)
    #[error("resource not found")]
    NotFound,

    /// Any other non-success status. The message is kept for debugging only
    /// and is never part of the display string.
    #[error("API request failed: {status}")]
    Status {
        status: StatusCode,
        message: Option<String>,
    },

    /// The login endpoint rejected the client credentials
    #[error("login failed: {0}")]
    Login(StatusCode),

    /// A response was missing a field the client relies on
    #[error("response is missing field `{0}`")]
    MissingField(&'static str),

    #[error("invalid API URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("failed to send request: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("failed to parse response JSON: {0}")]
    Decode(#[from] serde_json::Error),
}

impl ApiError {
    /// Build an error from a non-success status and the raw response body
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        if status == StatusCode::NOT_FOUND {
            return Self::NotFound;
        }

        let message = serde_json::from_str::<Value>(body).ok().and_then(|v| {
            v.get("message")
                .and_then(|m| m.as_str())
                .map(|m| m.to_string())
        });

        Self::Status { status, message }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }

    /// The bearer token was rejected, e.g. revoked before its expiry
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Status { status, .. } if *status == StatusCode::UNAUTHORIZED)
    }

    /// HTTP status associated with this error, if any
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::NotFound => Some(StatusCode::NOT_FOUND),
            Self::Status { status, .. } | Self::Login(status) => Some(*status),
            Self::Transport(err) => err.status(),
            _ => None,
        }
    }
}
