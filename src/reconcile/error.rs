//! Reconciliation errors

use super::model::ValidationError;
use crate::looker::http::format_api_error;
use crate::looker::ApiError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("invalid user: {0}")]
    Validation(#[from] ValidationError),

    #[error("invalid role id `{0}`: role ids must be integers")]
    InvalidRoleId(String),

    #[error("user {id} not found")]
    NotFound { id: String },

    #[error("record has no external id; it was never created or is already deleted")]
    MissingId,

    #[error("cancelled during {step}")]
    Cancelled { step: &'static str },

    /// A step after user creation failed and the new user is still present remotely
    #[error("user {id} was created but left incomplete: {source}")]
    PartiallyCreated {
        id: String,
        #[source]
        source: Box<ReconcileError>,
    },

    #[error(transparent)]
    Api(#[from] ApiError),
}

impl ReconcileError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Turn a generic 404 into `NotFound` for the given user
    pub(crate) fn for_user(self, id: &str) -> Self {
        match self {
            Self::Api(ApiError::NotFound) => Self::NotFound { id: id.to_string() },
            other => other,
        }
    }

    /// Short operator-facing message
    pub fn display_message(&self) -> String {
        match self {
            Self::Api(err) => format_api_error(err),
            Self::PartiallyCreated { id, source } => format!(
                "user {} was created but left incomplete ({}); import or delete it",
                id,
                source.display_message()
            ),
            other => other.to_string(),
        }
    }
}
