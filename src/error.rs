//! Top-level error taxonomy
//!
//! Every component returns a typed, component-scoped `thiserror` error.
//! `ServiceError` is the boundary type that handlers convert into HTTP
//! responses; it never leaks backend-internal detail to the caller.

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde::Serialize;
use std::fmt;

/// Error kind taxonomy (spec §7). Stable across components so that
/// logs and responses can be correlated by kind regardless of origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidInput,
    NotFound,
    Unauthorized,
    RateLimited,
    BackendUnavailable,
    Conflict,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::BackendUnavailable => "backend_unavailable",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Internal => "internal",
        };
        write!(f, "{s}")
    }
}

/// Boundary error type returned to HTTP handlers.
#[derive(Debug, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ServiceError {
    pub kind: ErrorKind,
    pub message: String,
    /// Present only for `RateLimited`; seconds until retry is advisable.
    pub retry_after_seconds: Option<i64>,
}

impl ServiceError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retry_after_seconds: None,
        }
    }

    pub fn rate_limited(message: impl Into<String>, retry_after_seconds: i64) -> Self {
        Self {
            kind: ErrorKind::RateLimited,
            message: message.into(),
            retry_after_seconds: Some(retry_after_seconds),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthorized, message)
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    pub fn backend_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BackendUnavailable, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorKind,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after_seconds: Option<i64>,
}

impl ResponseError for ServiceError {
    fn status_code(&self) -> StatusCode {
        match self.kind {
            ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::BackendUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        // Internal messages are sanitized; callers never see DB/backend detail.
        let message = if matches!(self.kind, ErrorKind::Internal) {
            "internal error".to_string()
        } else {
            self.message.clone()
        };

        let mut builder = HttpResponse::build(self.status_code());
        if let Some(retry_after) = self.retry_after_seconds {
            builder.insert_header(("Retry-After", retry_after.to_string()));
        }
        builder.json(ErrorBody {
            error: self.kind,
            message,
            retry_after_seconds: self.retry_after_seconds,
        })
    }
}

impl From<crate::db::pool::DbError> for ServiceError {
    fn from(e: crate::db::pool::DbError) -> Self {
        ServiceError::backend_unavailable(e.to_string())
    }
}

impl From<crate::counter::CounterError> for ServiceError {
    fn from(e: crate::counter::CounterError) -> Self {
        ServiceError::backend_unavailable(e.to_string())
    }
}
