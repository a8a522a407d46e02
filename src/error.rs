use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

/// The main error type for coursepay operations.
///
/// Variants map one-to-one onto HTTP status codes so that handlers can
/// return `Result<T>` and let the conversion happen in one place.
#[derive(Debug, thiserror::Error)]
pub enum CoursepayError {
    /// Bad or missing input.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Unknown order, course, or resource.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Currency unsupported or price unconfigured.
    #[error("Price integrity error: {0}")]
    PriceIntegrity(String),

    /// Provider signature did not verify; the payload is never processed.
    #[error("Signature verification failed: {0}")]
    Signature(String),

    /// Provider-reported amount/currency disagrees with the ledger snapshot.
    /// The order has been marked `mismatch` before this error is returned.
    #[error("Amount mismatch: expected {expected_minor} {expected_currency}, provider reported {reported_minor} {reported_currency}")]
    AmountMismatch {
        expected_minor: i64,
        expected_currency: String,
        reported_minor: i64,
        reported_currency: String,
    },

    /// A payment-provider call failed. The order remains `pending` and the
    /// operation is safe to retry.
    #[error("Upstream provider error: {0}")]
    UpstreamProvider(String),

    /// Rate limit exceeded; the client may retry after the indicated delay.
    #[error("Too many requests, retry after {retry_after}s")]
    TooManyRequests { retry_after: u64 },

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl CoursepayError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn price_integrity(msg: impl Into<String>) -> Self {
        Self::PriceIntegrity(msg.into())
    }

    pub fn signature(msg: impl Into<String>) -> Self {
        Self::Signature(msg.into())
    }

    pub fn upstream(msg: impl Into<String>) -> Self {
        Self::UpstreamProvider(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::PriceIntegrity(_) | Self::Signature(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::AmountMismatch { .. } => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::TooManyRequests { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::UpstreamProvider(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) | Self::Anyhow(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to expose to clients.
    ///
    /// Internal errors show a generic message to prevent information
    /// disclosure; everything else is a client-facing message already.
    fn safe_message(&self) -> String {
        match self {
            Self::Internal(_) | Self::Anyhow(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }

    /// Whether a retry of the same request can succeed without changes.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::UpstreamProvider(_) | Self::TooManyRequests { .. }
        )
    }
}

/// Standard error response format for API errors.
#[derive(Serialize)]
pub struct ErrorResponse {
    error: String,
    #[serde(rename = "errorId")]
    error_id: String,
}

impl IntoResponse for CoursepayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_id = uuid::Uuid::new_v4().to_string();

        // Full detail stays server-side; the client gets the safe message
        // plus an id it can quote back to support.
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error_id = %error_id, error = %self, "request failed");
        } else {
            tracing::debug!(status = status.as_u16(), error_id = %error_id, error = %self, "request rejected");
        }

        let body = Json(ErrorResponse {
            error: self.safe_message(),
            error_id,
        });

        if let Self::TooManyRequests { retry_after } = self {
            return (status, [("Retry-After", retry_after.to_string())], body).into_response();
        }
        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, CoursepayError>;
