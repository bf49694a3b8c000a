//! Error types for the HTTP collaborator client.

use quill_scheduler::CollaboratorError;
use thiserror::Error;

/// Errors that can occur when calling the collaborator service.
#[derive(Debug, Error)]
pub enum HttpError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Rate limited.
    #[error("rate limited on {endpoint}{}", match retry_after_secs {
        Some(secs) => format!(" (retry after {}s)", secs),
        None => String::new(),
    })]
    RateLimited {
        endpoint: String,
        retry_after_secs: Option<u64>,
    },

    /// Non-success status from the service.
    #[error("{endpoint} failed ({status}): {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },
}

impl HttpError {
    /// Whether a later attempt could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            HttpError::Http(e) => !e.is_decode() && !e.is_builder(),
            HttpError::Json(_) => false,
            HttpError::RateLimited { .. } => true,
            HttpError::Status { status, .. } => *status >= 500,
        }
    }
}

impl From<HttpError> for CollaboratorError {
    fn from(e: HttpError) -> Self {
        if e.is_transient() {
            CollaboratorError::Transient(e.to_string())
        } else {
            CollaboratorError::Permanent(e.to_string())
        }
    }
}
