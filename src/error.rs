//! Request-level error type
//!
//! Every gateway operation fails with a [`GatewayError`]. The HTTP layer
//! renders it as a status code plus `{"error": "..."}`; upstream and storage
//! detail is logged here and never sent to the browser.

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::broker::BrokerError;
use crate::directory::DirectoryError;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// Missing or wrong shared secret, or no resolved identity where one is required.
    #[error("{0}")]
    Unauthenticated(String),

    /// Malformed input from the caller.
    #[error("{0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Directory(#[from] DirectoryError),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    /// Server-side wiring problem (e.g. missing request context).
    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            GatewayError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::Directory(DirectoryError::AlreadyExists(_)) => StatusCode::CONFLICT,
            GatewayError::Directory(DirectoryError::NotFound(_)) => StatusCode::NOT_FOUND,
            GatewayError::Directory(DirectoryError::Storage(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            GatewayError::Broker(_) => StatusCode::BAD_GATEWAY,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to show to the caller
    fn public_message(&self) -> String {
        match self {
            GatewayError::Unauthenticated(msg) | GatewayError::InvalidRequest(msg) => msg.clone(),
            GatewayError::Directory(DirectoryError::AlreadyExists(_))
            | GatewayError::Directory(DirectoryError::NotFound(_)) => self.to_string(),
            GatewayError::Directory(DirectoryError::Storage(_)) | GatewayError::Internal(_) => {
                "Internal server error".to_string()
            }
            GatewayError::Broker(_) => "Upstream service unavailable".to_string(),
        }
    }
}

impl From<JsonRejection> for GatewayError {
    fn from(rejection: JsonRejection) -> Self {
        GatewayError::InvalidRequest(rejection.body_text())
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        match &self {
            GatewayError::Directory(DirectoryError::Storage(detail)) => {
                tracing::error!(error = %detail, "User directory failure");
            }
            GatewayError::Broker(e) => {
                tracing::error!(error = %e, "Upstream failure");
            }
            GatewayError::Internal(detail) => {
                tracing::error!(error = %detail, "Internal gateway error");
            }
            _ => {
                tracing::debug!(error = %self, status = %self.status(), "Request rejected");
            }
        }

        (self.status(), Json(json!({ "error": self.public_message() }))).into_response()
    }
}
