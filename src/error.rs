//! Error types and their HTTP rendering.
//!
//! Every request failure is rendered as a JSON body of the form
//! `{"statusCode": <code>, "error": <message>}` with the HTTP status set to
//! the same code. Handlers return [`AppResult`] and rely on the
//! [`IntoResponse`] impl below; nothing inside a handler can crash the
//! server.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::json::JsonAscii;

/// Application error classified by the HTTP status it maps to.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Internal(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) | AppError::Json(_) => StatusCode::BAD_REQUEST,
            AppError::Io(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        tracing::error!(status = %status, error = %self, "request failed");
        let body = json!({
            "statusCode": status.as_u16(),
            "error": self.to_string(),
        });
        (status, JsonAscii(body)).into_response()
    }
}

/// Convenient result type for request handlers and ingestion plumbing.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(
            AppError::NotFound("x".into()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::BadRequest("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::Internal("x".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
