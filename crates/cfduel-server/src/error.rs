use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::judge::JudgeError;
use crate::store::StoreError;

/// Request-level error taxonomy. The REST surface maps these to HTTP
/// statuses; the event gateway maps them to private `error` frames.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("not authenticated")]
    NotAuthenticated,
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    Conflict(String),
    #[error("could not fetch enough problems in the selected rating range")]
    InsufficientProblems,
    #[error("judge unavailable: {0}")]
    JudgeUnavailable(String),
    #[error("handle {0} not found on the judge")]
    UnknownHandle(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::RoomNotFound(code) => Self::NotFound(format!("Room {code} not found")),
            StoreError::UserNotFound(_) => Self::NotFound("User not found".to_string()),
            StoreError::NotWaiting(_) => {
                Self::Conflict("Room settings can only change before the game starts".to_string())
            },
            StoreError::InvalidTransition { from, to } => {
                Self::Conflict(format!("Invalid room transition: {from:?} -> {to:?}"))
            },
            StoreError::CodeTaken(code) => Self::Internal(format!("Room code {code} collided")),
        }
    }
}

impl From<JudgeError> for AppError {
    fn from(err: JudgeError) -> Self {
        match err {
            JudgeError::Unavailable(msg) => Self::JudgeUnavailable(msg),
            JudgeError::UnknownHandle(handle) => Self::UnknownHandle(handle),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::NotAuthenticated => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::InsufficientProblems => StatusCode::UNPROCESSABLE_ENTITY,
            Self::JudgeUnavailable(_) => StatusCode::BAD_GATEWAY,
            Self::UnknownHandle(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let message = self.to_string();
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}
