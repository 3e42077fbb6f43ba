//! API error types and their HTTP response conversion.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ApiError>;

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub error: String,
    pub message: String,
}

/// Errors surfaced across the submission server's HTTP boundary. Distinct
/// from [`attractor_engine::EngineError`]/[`attractor_store::StoreError`],
/// which describe run-internal failures: everything here is about whether
/// the *request* was well-formed and addressed a run that exists.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid run_id: {0}")]
    InvalidRunId(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("pipeline '{0}' not found")]
    RunNotFound(String),

    #[error("question '{0}' not found or already resolved")]
    QuestionNotFound(String),

    #[error("origin '{0}' is not a localhost-family host")]
    CrossOrigin(String),

    #[error(transparent)]
    Store(#[from] attractor_store::StoreError),

    #[error(transparent)]
    Core(#[from] attractor_core::CoreError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidRunId(_) | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::RunNotFound(_) | ApiError::QuestionNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::CrossOrigin(_) => StatusCode::FORBIDDEN,
            ApiError::Core(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Store(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_type(&self) -> &'static str {
        match self {
            ApiError::InvalidRunId(_) => "invalid_run_id",
            ApiError::BadRequest(_) => "bad_request",
            ApiError::RunNotFound(_) => "run_not_found",
            ApiError::QuestionNotFound(_) => "question_not_found",
            ApiError::CrossOrigin(_) => "cross_origin",
            ApiError::Core(_) => "invalid_graph",
            ApiError::Store(_) => "store_error",
            ApiError::Internal(_) => "internal_error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "submission server error");
        }
        let body = ApiErrorBody {
            error: self.error_type().to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
