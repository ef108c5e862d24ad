//! Relay error types
//!
//! Every failure that reaches the HTTP surface is a [`RelayError`]. Upstream
//! failures that are converted to fallback output never get here.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;

use crate::upstream::UpstreamError;

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Missing credentials or an HTTP client that cannot be built
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Upstream failure that is not eligible for fallback
    #[error("Generation error: {0}")]
    Generation(#[from] UpstreamError),
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let error = match &self {
            RelayError::Configuration(_) => {
                crate::logger::error("server", &self.to_string());
                self.to_string()
            }
            RelayError::Generation(_) => {
                crate::logger::error("server", &self.to_string());
                format!("Unexpected error: {}", self)
            }
        };

        (StatusCode::INTERNAL_SERVER_ERROR, Json(ErrorResponse { error })).into_response()
    }
}

/// Result type alias for relay operations
pub type RelayResult<T> = Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(err: RelayError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_configuration_error_body() {
        let (status, body) =
            body_json(RelayError::Configuration("API key not found".to_string())).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Configuration error: API key not found");
    }

    #[tokio::test]
    async fn test_generation_error_body() {
        let err = RelayError::from(UpstreamError::from_code(
            "ThrottlingException",
            "Too many requests",
        ));
        let (status, body) = body_json(err).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body["error"],
            "Unexpected error: Generation error: Too many requests (ThrottlingException)"
        );
    }
}
