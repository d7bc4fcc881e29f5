use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use herald_core::ScheduleError;
use tracing::error;

pub const BODY_MISSING_FIELDS: &str = "Missing time or message";
pub const BODY_INVALID_TIME: &str = "Invalid time format";
pub const BODY_INTERNAL: &str = "Internal server error";

/// Errors returned by the submission endpoint. Bodies are plain text.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("missing time or message")]
    MissingFields,

    #[error("invalid time format")]
    InvalidTime,

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<ScheduleError> for ApiError {
    fn from(err: ScheduleError) -> Self {
        match err {
            ScheduleError::InvalidTime(_) => ApiError::InvalidTime,
            ScheduleError::Store(e) => ApiError::Internal(e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::MissingFields => {
                (StatusCode::BAD_REQUEST, BODY_MISSING_FIELDS).into_response()
            }
            ApiError::InvalidTime => (StatusCode::BAD_REQUEST, BODY_INVALID_TIME).into_response(),
            ApiError::Internal(detail) => {
                error!(error = %detail, "error scheduling message");
                (StatusCode::INTERNAL_SERVER_ERROR, BODY_INTERNAL).into_response()
            }
        }
    }
}
