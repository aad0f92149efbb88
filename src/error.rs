use axum::http::StatusCode;
use serde::Serialize;
use thiserror::Error;

use crate::response::Response;
use crate::validation::ValidationTarget;

pub type Result<T, E = ApiError> = std::result::Result<T, E>;

/// Every failure that can escape a middleware or a route callback.
///
/// Errors travel up to the [`Router`](crate::router::Router) untouched and are
/// translated into a response exactly once, at its outermost boundary.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    #[error("{}", .target.message_key())]
    Validation {
        target: ValidationTarget,
        details: String,
    },

    #[error("{code}")]
    Domain { code: String, status: StatusCode },

    #[error("Too many requests")]
    RateLimitExceeded,

    #[error("{method} on {path} does not exist.")]
    RouteNotFound { method: String, path: String },

    #[error("{method} does not exist.")]
    MethodNotAllowed { method: String },

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn validation(target: ValidationTarget, details: impl Into<String>) -> Self {
        ApiError::Validation {
            target,
            details: details.into(),
        }
    }

    pub fn domain(code: impl Into<String>, status: StatusCode) -> Self {
        ApiError::Domain {
            code: code.into(),
            status,
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        ApiError::Internal(msg.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation {
                target: ValidationTarget::Response,
                ..
            } => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Validation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Domain { status, .. } => *status,
            ApiError::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            ApiError::RouteNotFound { .. } => StatusCode::NOT_FOUND,
            ApiError::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// The JSON envelope every error reaches the client in.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub message: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn from_api_error(err: &ApiError) -> Self {
        Self::new(err.to_string())
    }
}

/// Default error translator: echoes the error's own message and status.
pub fn default_error_response(err: &ApiError) -> Response {
    let status = err.status();

    if status.is_server_error() {
        tracing::error!(error = ?err, status = %status, "Unhandled error while dispatching request");
    } else {
        tracing::debug!(error = %err, status = %status, "Request rejected");
    }

    Response::json_with_status(status, &ErrorResponse::from_api_error(err))
}
