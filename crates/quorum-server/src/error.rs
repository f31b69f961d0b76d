//! The wire error envelope and HTTP status mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use quorum_core::errors::{EngineError, ErrorKind};
use serde::{Deserialize, Serialize};

/// `{"error":{kind,message,retryable}}`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    /// The error payload.
    pub error: ErrorBody,
}

/// Typed error payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Closed-set classification.
    pub kind: ErrorKind,
    /// Human-readable detail.
    pub message: String,
    /// Contractual retryable flag.
    pub retryable: bool,
}

/// An error ready to leave the process.
#[derive(Clone, Debug)]
pub struct ApiError {
    /// Classification.
    pub kind: ErrorKind,
    /// Detail.
    pub message: String,
}

impl ApiError {
    /// Wrap a kind and message.
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Intake-layer schema rejection.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequest, message)
    }

    /// The HTTP status for this error's kind.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        status_for(self.kind)
    }

    /// The wire envelope.
    #[must_use]
    pub fn envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope {
            error: ErrorBody {
                kind: self.kind,
                message: self.message.clone(),
                retryable: self.kind.is_retryable(),
            },
        }
    }
}

impl From<&EngineError> for ApiError {
    fn from(err: &EngineError) -> Self {
        Self::new(err.kind(), err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.envelope())).into_response()
    }
}

/// The contractual kind → status table.
#[must_use]
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::BadRequest => StatusCode::BAD_REQUEST,
        ErrorKind::Auth => StatusCode::UNAUTHORIZED,
        ErrorKind::SafetyRefusal | ErrorKind::InvalidModel => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::RateLimit => StatusCode::TOO_MANY_REQUESTS,
        ErrorKind::ContextOverflow => StatusCode::PAYLOAD_TOO_LARGE,
        kind if kind.is_upstream() => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_per_contract() {
        assert_eq!(status_for(ErrorKind::BadRequest), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(ErrorKind::Auth), StatusCode::UNAUTHORIZED);
        assert_eq!(
            status_for(ErrorKind::SafetyRefusal),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_for(ErrorKind::RateLimit),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            status_for(ErrorKind::ContextOverflow),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            status_for(ErrorKind::InvalidModel),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(status_for(ErrorKind::Provider5xx), StatusCode::BAD_GATEWAY);
        assert_eq!(status_for(ErrorKind::Network), StatusCode::BAD_GATEWAY);
        assert_eq!(
            status_for(ErrorKind::Unknown),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status_for(ErrorKind::Cancelled),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status_for(ErrorKind::Timeout),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn envelope_carries_retryable_flag() {
        let err = ApiError::new(ErrorKind::RateLimit, "slow down");
        let envelope = err.envelope();
        assert!(envelope.error.retryable);
        assert_eq!(envelope.error.message, "slow down");

        let err = ApiError::bad_request("nope");
        assert!(!err.envelope().error.retryable);
    }

    #[test]
    fn envelope_serializes_with_wire_kind() {
        let err = ApiError::new(ErrorKind::Provider5xx, "upstream died");
        let json = serde_json::to_value(err.envelope()).unwrap();
        assert_eq!(json["error"]["kind"], "PROVIDER_5XX");
        assert_eq!(json["error"]["retryable"], true);
    }
}
