//! Public API types

use axum::response::{IntoResponse, Response};
use http::StatusCode;

// Errors

pub const INTERNAL_SERVER_ERROR: &str = "internal server error";

pub enum ApiError {
    /// The request itself was unusable
    BadRequest(&'static str),
    Internal(anyhow::Error),
}

/// Convert `ApiError` into an Axum compatible response. Internal
/// errors are logged but never echoed back to the caller.
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(reason) => {
                tracing::warn!("Bad request: {}", reason);
                (StatusCode::BAD_REQUEST, reason).into_response()
            }
            ApiError::Internal(err) => {
                tracing::error!("{}. Root cause: {}", err, err.root_cause());
                (StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_SERVER_ERROR).into_response()
            }
        }
    }
}

/// Enables using `?` on functions that return `Result<_,
/// anyhow::Error>` to turn them into `Result<_, ApiError>`
impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self::Internal(err.into())
    }
}

// Re-export public types from each route

pub mod chat {
    pub use crate::api::routes::chat::public::*;
}
