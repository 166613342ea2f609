//! API error type and the wire error envelope.
//!
//! Every error that crosses the HTTP boundary is normalized to
//! `{"error":{"code","message","details"}}`. `code` is a stable machine
//! token; internal error chains never leak past the boundary.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use super::cursor::CursorError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{message}")]
    BadRequest { message: String },

    #[error("invalid cursor")]
    InvalidCursor,

    #[error("authentication required")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    #[error("not found")]
    NotFound,

    #[error("{message}")]
    Conflict { message: String },

    #[error("{message}")]
    Gone {
        code: &'static str,
        message: String,
    },

    #[error("{message}")]
    Validation {
        code: &'static str,
        message: String,
        details: Option<serde_json::Value>,
    },

    #[error("{message}")]
    RateLimited { message: String },

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest {
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        ApiError::Conflict {
            message: message.into(),
        }
    }

    pub fn validation(code: &'static str, message: impl Into<String>) -> Self {
        ApiError::Validation {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn validation_with_details(
        code: &'static str,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        ApiError::Validation {
            code,
            message: message.into(),
            details: Some(details),
        }
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        ApiError::RateLimited {
            message: message.into(),
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest { .. } | ApiError::InvalidCursor => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Conflict { .. } => StatusCode::CONFLICT,
            ApiError::Gone { .. } => StatusCode::GONE,
            ApiError::Validation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::BadRequest { .. } => "bad_request",
            ApiError::InvalidCursor => "invalid_cursor",
            ApiError::Unauthorized => "unauthorized",
            ApiError::Forbidden => "forbidden",
            ApiError::NotFound => "not_found",
            ApiError::Conflict { .. } => "conflict",
            ApiError::Gone { code, .. } => code,
            ApiError::Validation { code, .. } => code,
            ApiError::RateLimited { .. } => "rate_limited",
            ApiError::Internal(_) => "internal_error",
        }
    }
}

impl From<CursorError> for ApiError {
    fn from(_: CursorError) -> Self {
        // Expired and malformed cursors are indistinguishable to clients.
        ApiError::InvalidCursor
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(e: sqlx::Error) -> Self {
        ApiError::Internal(e.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "request failed");
        }
        let message = match &self {
            // Never echo internal error chains to clients.
            ApiError::Internal(_) => "internal error".to_string(),
            other => other.to_string(),
        };
        let details = match &self {
            ApiError::Validation {
                details: Some(d), ..
            } => d.clone(),
            _ => serde_json::Value::Null,
        };
        let body = json!({
            "error": {
                "code": self.code(),
                "message": message,
                "details": details,
            }
        });
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_and_code_mapping() {
        assert_eq!(ApiError::InvalidCursor.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::InvalidCursor.code(), "invalid_cursor");
        assert_eq!(ApiError::NotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError::validation("field_not_allowlisted", "no").status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        let gone = ApiError::Gone {
            code: "export_expired",
            message: "artifact expired".into(),
        };
        assert_eq!(gone.status(), StatusCode::GONE);
        assert_eq!(gone.code(), "export_expired");
    }

    #[test]
    fn cursor_errors_collapse_to_invalid_cursor() {
        assert!(matches!(
            ApiError::from(CursorError::Expired),
            ApiError::InvalidCursor
        ));
        assert!(matches!(
            ApiError::from(CursorError::Invalid),
            ApiError::InvalidCursor
        ));
    }

    #[test]
    fn internal_errors_are_opaque() {
        let err = ApiError::Internal(anyhow::anyhow!("connection refused to 10.0.0.3"));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
