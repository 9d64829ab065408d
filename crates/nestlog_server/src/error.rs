//! HTTP error mapping for the operator surface.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use nestlog_store::StoreError;
use thiserror::Error;

/// Errors surfaced by the HTTP API.
///
/// Internal detail never crosses the wire; callers get a status code and a
/// terse message, everything else goes to the log.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Missing, unknown or expired credentials.
    #[error("unauthorized")]
    Unauthorized,
    /// The referenced entity does not exist.
    #[error("not found")]
    NotFound,
    /// The request body or parameters were invalid.
    #[error("bad request: {0}")]
    BadRequest(String),
    /// Anything unexpected; already logged at the failure site.
    #[error("internal error")]
    Internal,
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => ApiError::NotFound,
            other => {
                tracing::error!(error = %other, "store operation failed");
                ApiError::Internal
            }
        }
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(err: tokio::task::JoinError) -> Self {
        tracing::error!(error = %err, "store task failed");
        ApiError::Internal
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}
