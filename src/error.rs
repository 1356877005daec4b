use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::storage::RemoteError;
use crate::validation::InvalidRecord;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Authentication required")]
    Unauthorized,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid food log")]
    InvalidRecord(Vec<String>),

    #[error("Remote store error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<InvalidRecord> for AppError {
    fn from(err: InvalidRecord) -> Self {
        AppError::InvalidRecord(err.errors)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut details = None;
        let (status, message) = match &self {
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, self.to_string()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Validation(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg.clone()),
            AppError::InvalidRecord(errors) => {
                details = Some(json!(errors));
                (StatusCode::UNPROCESSABLE_ENTITY, self.to_string())
            }
            AppError::Remote(e) => {
                tracing::error!(error = %e, "Remote store error");
                let status = match e {
                    RemoteError::IndexConfiguration(_) => StatusCode::SERVICE_UNAVAILABLE,
                    RemoteError::Permission(_) => StatusCode::FORBIDDEN,
                    RemoteError::NotFound(_) => StatusCode::NOT_FOUND,
                    RemoteError::Stale(_) => StatusCode::CONFLICT,
                    RemoteError::Network(_) | RemoteError::Other(_) => StatusCode::BAD_GATEWAY,
                };
                (status, e.user_message())
            }
            AppError::Internal(e) => {
                tracing::error!(error = %e, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".into(),
                )
            }
        };

        let mut error = json!({
            "message": message,
            "code": status.as_u16(),
        });
        if let Some(details) = details {
            error["details"] = details;
        }

        (status, Json(json!({ "error": error }))).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
