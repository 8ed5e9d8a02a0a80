//! API errors and their HTTP mapping

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;
use tracing::error;

use crate::ErrorResponse;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    /// An evaluation for the key is already running
    #[error("{0}")]
    Conflict(String),

    /// The advisory service failed for this request
    #[error("{message}")]
    Upstream { kind: String, message: String },

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Upstream { .. } => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> String {
        match self {
            Self::BadRequest(_) => "bad_request".to_string(),
            Self::NotFound(_) => "not_found".to_string(),
            Self::Conflict(_) => "evaluation_in_progress".to_string(),
            Self::Upstream { kind, .. } => format!("advisory_{}", kind),
            Self::Internal(_) => "internal_error".to_string(),
        }
    }
}

impl From<llm_advisor_core::Error> for ApiError {
    fn from(err: llm_advisor_core::Error) -> Self {
        if err.is_client_error() {
            Self::BadRequest(err.to_string())
        } else {
            Self::Internal(err.to_string())
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(status = status.as_u16(), error = %self, "Request failed");
        }
        (status, Json(ErrorResponse::new(self.code(), self.to_string()))).into_response()
    }
}
