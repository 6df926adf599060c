//! Maps the orchestrator's internal error taxonomy onto HTTP responses.
//!
//! Mirrors the control-plane's `ApiError` pattern: one enum wrapping the
//! lower layers' errors, with a single [`axum::response::IntoResponse`] impl
//! deciding the status code and JSON body, instead of scattering
//! `match`-on-error-variant logic across every handler.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use taskyard::errors::{JournalError, OrchestratorError, QueueError};

/// The error type returned by every route in [`crate::routes`].
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// See [`taskyard::errors::OrchestratorError`].
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
    /// See [`taskyard::errors::JournalError`].
    #[error(transparent)]
    Journal(#[from] JournalError),
    /// See [`taskyard::errors::QueueError`].
    #[error(transparent)]
    Queue(#[from] QueueError),
    /// The request body failed validation before reaching the Producer.
    #[error("bad request: {0}")]
    BadRequest(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Orchestrator(OrchestratorError::UnknownKind(_)) => StatusCode::BAD_REQUEST,
            Self::Orchestrator(OrchestratorError::InvalidTransition(_)) => {
                StatusCode::CONFLICT
            }
            Self::Orchestrator(OrchestratorError::Journal(JournalError::NotFound(_)))
            | Self::Journal(JournalError::NotFound(_)) => StatusCode::NOT_FOUND,
            Self::Orchestrator(_) | Self::Journal(_) | Self::Queue(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "request failed");
        }

        (status, Json(ErrorBody { error: self.to_string() })).into_response()
    }
}
