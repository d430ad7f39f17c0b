//! Errors surfaced to callers of the queue.
//!
//! Conditions that are part of normal operation ("no work", Negotiating timeouts, replica
//! conflicts) are not errors; they show up as element/inbox status or as
//! [`QueuedWork`](crate::queue::engine::QueuedWork) outcomes.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkQueueError {
    /// Malformed or inconsistent work specification; nothing was persisted.
    #[error("Invalid specification for {request}: {reason}")]
    Specification { request: String, reason: String },

    #[error("Unknown request: {0}")]
    UnknownRequest(String),

    #[error("Unknown element: {0}")]
    UnknownElement(String),

    /// The parent queue could not be reached or rejected the call.
    #[error("Parent queue {url} failed: {cause:#}")]
    Parent { url: String, cause: anyhow::Error },

    #[error(transparent)]
    Collaborator(#[from] anyhow::Error),
}

impl WorkQueueError {
    pub fn specification(request: &str, reason: impl Into<String>) -> Self {
        WorkQueueError::Specification {
            request: request.to_string(),
            reason: reason.into(),
        }
    }

    pub fn is_specification(&self) -> bool {
        matches!(self, WorkQueueError::Specification { .. })
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Specification { .. } => StatusCode::BAD_REQUEST,
            Self::UnknownRequest(_) | Self::UnknownElement(_) => StatusCode::NOT_FOUND,
            Self::Parent { .. } => StatusCode::BAD_GATEWAY,
            Self::Collaborator(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// JSON body of every failed API call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl IntoResponse for WorkQueueError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("Request failed: {:#}", self);
        }
        let body = ErrorResponse {
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, WorkQueueError>;
