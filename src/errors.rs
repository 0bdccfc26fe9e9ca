//! Error types surfaced over HTTP.
//!
//! Handlers return `Result<Response, IdpError>`; the enum implements
//! [`axum::response::IntoResponse`] so every failure maps to a status code
//! and a short plain-text body.  Internal details are logged, never sent.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::{error, warn};

use crate::store::StoreError;

/// Generate a 16-character hex request ID.
pub fn generate_request_id() -> String {
    let bytes: [u8; 8] = rand::random();
    hex::encode(bytes).to_uppercase()
}

#[derive(Debug, Error)]
pub enum IdpError {
    /// The addressed resource does not exist.
    #[error("not found: {resource}")]
    NotFound { resource: String },

    /// The request body could not be decoded.  `detail` is logged only.
    #[error("malformed request body: {detail}")]
    MalformedBody { detail: String },

    /// The request is well-formed but cannot be served; `message` is sent
    /// to the client.
    #[error("{message}")]
    BadRequest { message: String },

    /// A decoded record violates a field constraint.
    #[error("{message}")]
    Validation { message: String },

    /// Catch-all for store and other unexpected failures.
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IdpError {
    pub fn not_found(resource: impl Into<String>) -> Self {
        IdpError::NotFound {
            resource: resource.into(),
        }
    }

    pub fn malformed(detail: impl std::fmt::Display) -> Self {
        IdpError::MalformedBody {
            detail: detail.to_string(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        IdpError::BadRequest {
            message: message.into(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            IdpError::NotFound { .. } => StatusCode::NOT_FOUND,
            IdpError::MalformedBody { .. } | IdpError::BadRequest { .. } => {
                StatusCode::BAD_REQUEST
            }
            IdpError::Validation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            IdpError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Text sent to the client.
    fn public_message(&self) -> String {
        match self {
            IdpError::BadRequest { message } | IdpError::Validation { message } => {
                message.clone()
            }
            other => other
                .status_code()
                .canonical_reason()
                .unwrap_or("Error")
                .to_string(),
        }
    }
}

impl From<StoreError> for IdpError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(key) => IdpError::NotFound { resource: key },
            other => IdpError::Internal(other.into()),
        }
    }
}

impl From<garde::Report> for IdpError {
    fn from(report: garde::Report) -> Self {
        IdpError::Validation {
            message: report.to_string().trim().to_string(),
        }
    }
}

impl IntoResponse for IdpError {
    fn into_response(self) -> Response {
        match &self {
            IdpError::Internal(e) => error!(error = %e, "request failed"),
            IdpError::MalformedBody { detail } => warn!(%detail, "rejected request body"),
            IdpError::Validation { message } => warn!(%message, "validation failed"),
            _ => {}
        }

        (
            self.status_code(),
            [("content-type", "text/plain; charset=utf-8")],
            self.public_message(),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_request_id_format() {
        let id = generate_request_id();
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_store_not_found_maps_to_404() {
        let err: IdpError = StoreError::NotFound("/users/ghost".to_string()).into();
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_store_backend_failure_maps_to_500() {
        let err: IdpError = StoreError::Backend(anyhow::anyhow!("disk on fire")).into();
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.public_message(), "Internal Server Error");
    }

    #[test]
    fn test_malformed_body_hides_detail() {
        let err = IdpError::malformed("expected value at line 1 column 1");
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.public_message(), "Bad Request");
    }

    #[test]
    fn test_bad_request_shows_message() {
        let err = IdpError::bad_request("metadata contained no service provider metadata");
        assert_eq!(
            err.public_message(),
            "metadata contained no service provider metadata"
        );
    }

    #[tokio::test]
    async fn test_into_response_body() {
        let response = IdpError::not_found("/shortcuts/x").into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"Not Found");
    }
}
