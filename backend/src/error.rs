use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::{auth::AuthError, repository::RepoError};

/// AppError
///
/// Everything a handler or guard can fail with. Authentication failures keep
/// their 401/403 mapping; every other failure is a generic 500.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Repository(#[from] RepoError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Auth(e) => e.into_response(),
            AppError::Repository(e) => {
                tracing::error!(error = %e, "request failed");
                let message = match e {
                    // Driver details stay in the logs.
                    RepoError::Database(_) => "Internal server error".to_string(),
                    other => other.to_string(),
                };
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "message": message })),
                )
                    .into_response()
            }
        }
    }
}
