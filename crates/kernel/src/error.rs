//! Application error types.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

use crate::filter::FilterError;

/// Application errors.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Filter(#[from] FilterError),

    #[error("{message}")]
    InvalidField { field: String, message: String },

    #[error("search is not supported for {entity}")]
    SearchNotSupported { entity: String },

    #[error("Query took too long")]
    Timeout,

    #[error("unauthorized")]
    Unauthorized,

    #[error("not found")]
    NotFound,

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("internal server error")]
    Internal(#[from] anyhow::Error),

    #[error("database error")]
    Database(#[from] sqlx::Error),
}

/// JSON error body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Filter(_)
            | AppError::InvalidField { .. }
            | AppError::SearchNotSupported { .. }
            | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Timeout => StatusCode::REQUEST_TIMEOUT,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Internal(_) | AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::Filter(e) => e.code(),
            AppError::InvalidField { .. } => "invalid_field",
            AppError::SearchNotSupported { .. } => "search_not_supported",
            AppError::Timeout => "timeout",
            AppError::Unauthorized => "unauthorized",
            AppError::NotFound => "not_found",
            AppError::BadRequest(_) => "bad_request",
            AppError::Internal(_) | AppError::Database(_) => "internal_error",
        }
    }

    fn body(&self) -> ErrorBody {
        let field = match self {
            AppError::Filter(e) => e.field().map(str::to_string),
            AppError::InvalidField { field, .. } => Some(field.clone()),
            _ => None,
        };
        ErrorBody {
            code: self.code(),
            message: self.to_string(),
            field,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Internal details are logged, never returned.
        match &self {
            AppError::Internal(e) => {
                tracing::error!(error = %e, "internal server error");
            }
            AppError::Database(e) => {
                tracing::error!(error = %e, "database error");
            }
            _ => {}
        }

        (status, Json(self.body())).into_response()
    }
}

/// Result type alias using AppError.
pub type AppResult<T> = Result<T, AppError>;
