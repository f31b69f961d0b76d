//! Provider error types and upstream error-body classification.
//!
//! Every adapter failure maps onto the closed [`ErrorKind`] taxonomy here.
//! Classification is contractual: the retry loop in the branch executor
//! keys off [`ProviderError::kind`].

use quorum_core::errors::ErrorKind;

/// Result alias for adapter operations.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Failure of a single upstream call.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// Invalid or missing credentials.
    #[error("authentication failed: {message}")]
    Auth {
        /// Upstream detail.
        message: String,
    },

    /// Upstream rate limit.
    #[error("rate limited: {message}")]
    RateLimited {
        /// Suggested wait from `Retry-After`, 0 when absent.
        retry_after_ms: u64,
        /// Upstream detail.
        message: String,
    },

    /// Prompt too large for the model's context window.
    #[error("context overflow: {message}")]
    ContextOverflow {
        /// Upstream detail.
        message: String,
    },

    /// Upstream refused on safety grounds.
    #[error("safety refusal: {message}")]
    SafetyRefusal {
        /// Upstream detail.
        message: String,
    },

    /// Upstream server error (5xx or malformed success).
    #[error("provider error ({status}): {message}")]
    Api {
        /// HTTP status.
        status: u16,
        /// Upstream detail.
        message: String,
    },

    /// The upstream call exceeded its deadline.
    #[error("provider call timed out")]
    Timeout,

    /// Transport-level failure.
    #[error("network error: {0}")]
    Network(String),

    /// The call was cancelled through the branch's token.
    #[error("call cancelled")]
    Cancelled,

    /// Model not known to this adapter or the manifest.
    #[error("invalid model: {model_id}")]
    InvalidModel {
        /// The offending model ID.
        model_id: String,
    },

    /// Request/response serialization failure.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Anything that escaped classification.
    #[error("unclassified provider error: {0}")]
    Unknown(String),
}

impl ProviderError {
    /// Map to the closed taxonomy.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Auth { .. } => ErrorKind::Auth,
            Self::RateLimited { .. } => ErrorKind::RateLimit,
            Self::ContextOverflow { .. } => ErrorKind::ContextOverflow,
            Self::SafetyRefusal { .. } => ErrorKind::SafetyRefusal,
            Self::Api { .. } => ErrorKind::Provider5xx,
            Self::Timeout => ErrorKind::Timeout,
            Self::Network(_) => ErrorKind::Network,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::InvalidModel { .. } => ErrorKind::InvalidModel,
            Self::Json(_) | Self::Unknown(_) => ErrorKind::Unknown,
        }
    }

    /// Whether the retry loop may try again.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    /// Suggested minimum wait before the next attempt, if upstream said so.
    #[must_use]
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after_ms, .. } if *retry_after_ms > 0 => {
                Some(*retry_after_ms)
            }
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_connect() || err.is_request() {
            Self::Network(err.to_string())
        } else {
            Self::Unknown(err.to_string())
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Upstream error-body classification
// ─────────────────────────────────────────────────────────────────────────────

/// Classify an upstream error response into a [`ProviderError`].
///
/// Providers agree on very little, so this looks at the status first and
/// falls back to substring matching on the (JSON or plain-text) body.
#[must_use]
pub fn classify_api_error(status: u16, body: &str, retry_after_ms: Option<u64>) -> ProviderError {
    let message = extract_error_message(body);
    let lower = message.to_lowercase();

    match status {
        401 | 403 => ProviderError::Auth { message },
        429 => ProviderError::RateLimited {
            retry_after_ms: retry_after_ms.unwrap_or(0),
            message,
        },
        400 | 413 if is_context_overflow(&lower) => ProviderError::ContextOverflow { message },
        400 | 422 if is_safety_refusal(&lower) => ProviderError::SafetyRefusal { message },
        404 | 400 if lower.contains("model") && lower.contains("not") => {
            ProviderError::InvalidModel {
                model_id: message.clone(),
            }
        }
        500..=599 => ProviderError::Api { status, message },
        _ => ProviderError::Unknown(format!("status {status}: {message}")),
    }
}

fn is_context_overflow(lower: &str) -> bool {
    lower.contains("context length")
        || lower.contains("context window")
        || lower.contains("maximum context")
        || lower.contains("too many tokens")
        || lower.contains("prompt is too long")
}

fn is_safety_refusal(lower: &str) -> bool {
    lower.contains("safety") || lower.contains("content_filter") || lower.contains("content filter")
}

/// Pull a human-readable message out of an error body.
///
/// Tries the common `{"error":{"message":...}}` shape, then a top-level
/// `message`, then falls back to the raw body (truncated).
fn extract_error_message(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        if let Some(msg) = value
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(serde_json::Value::as_str)
        {
            return msg.to_string();
        }
        if let Some(msg) = value.get("message").and_then(serde_json::Value::as_str) {
            return msg.to_string();
        }
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "no error detail".to_string();
    }
    trimmed.chars().take(300).collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // ── Kind mapping ────────────────────────────────────────────────────

    #[test]
    fn kinds_map_per_contract() {
        assert_eq!(
            ProviderError::Auth {
                message: "bad key".into()
            }
            .kind(),
            ErrorKind::Auth
        );
        assert_eq!(
            ProviderError::RateLimited {
                retry_after_ms: 0,
                message: String::new()
            }
            .kind(),
            ErrorKind::RateLimit
        );
        assert_eq!(ProviderError::Timeout.kind(), ErrorKind::Timeout);
        assert_eq!(ProviderError::Cancelled.kind(), ErrorKind::Cancelled);
        assert_eq!(
            ProviderError::Network("reset".into()).kind(),
            ErrorKind::Network
        );
    }

    #[test]
    fn retryability_follows_kind() {
        assert!(
            ProviderError::Api {
                status: 503,
                message: String::new()
            }
            .is_retryable()
        );
        assert!(
            !ProviderError::SafetyRefusal {
                message: String::new()
            }
            .is_retryable()
        );
        assert!(!ProviderError::Cancelled.is_retryable());
    }

    #[test]
    fn retry_after_only_when_positive() {
        let err = ProviderError::RateLimited {
            retry_after_ms: 2000,
            message: String::new(),
        };
        assert_eq!(err.retry_after_ms(), Some(2000));

        let err = ProviderError::RateLimited {
            retry_after_ms: 0,
            message: String::new(),
        };
        assert_eq!(err.retry_after_ms(), None);
        assert_eq!(ProviderError::Timeout.retry_after_ms(), None);
    }

    // ── classify_api_error ──────────────────────────────────────────────

    #[test]
    fn classify_401_as_auth() {
        let err = classify_api_error(401, r#"{"error":{"message":"invalid x-api-key"}}"#, None);
        assert_eq!(err.kind(), ErrorKind::Auth);
        assert!(err.to_string().contains("invalid x-api-key"));
    }

    #[test]
    fn classify_429_with_retry_after() {
        let err = classify_api_error(429, r#"{"error":{"message":"rate limited"}}"#, Some(5000));
        assert_eq!(err.kind(), ErrorKind::RateLimit);
        assert_eq!(err.retry_after_ms(), Some(5000));
    }

    #[test]
    fn classify_context_overflow() {
        let err = classify_api_error(
            400,
            r#"{"error":{"message":"prompt is too long: 250000 tokens > maximum context"}}"#,
            None,
        );
        assert_eq!(err.kind(), ErrorKind::ContextOverflow);
    }

    #[test]
    fn classify_safety_refusal() {
        let err = classify_api_error(
            400,
            r#"{"error":{"message":"request blocked by safety system"}}"#,
            None,
        );
        assert_eq!(err.kind(), ErrorKind::SafetyRefusal);
    }

    #[test]
    fn classify_unknown_model() {
        let err = classify_api_error(
            404,
            r#"{"error":{"message":"model claude-9 not found"}}"#,
            None,
        );
        assert_eq!(err.kind(), ErrorKind::InvalidModel);
    }

    #[test]
    fn classify_5xx_as_provider_error() {
        let err = classify_api_error(503, "Service Unavailable", None);
        assert_eq!(err.kind(), ErrorKind::Provider5xx);
        assert!(err.is_retryable());
    }

    #[test]
    fn classify_unrecognized_status_as_unknown() {
        let err = classify_api_error(418, "teapot", None);
        assert_eq!(err.kind(), ErrorKind::Unknown);
    }

    // ── extract_error_message ───────────────────────────────────────────

    #[test]
    fn extract_nested_error_message() {
        assert_eq!(
            extract_error_message(r#"{"error":{"message":"boom"}}"#),
            "boom"
        );
    }

    #[test]
    fn extract_top_level_message() {
        assert_eq!(extract_error_message(r#"{"message":"boom"}"#), "boom");
    }

    #[test]
    fn extract_falls_back_to_raw_body() {
        assert_eq!(extract_error_message("  gateway exploded  "), "gateway exploded");
    }

    #[test]
    fn extract_empty_body() {
        assert_eq!(extract_error_message(""), "no error detail");
    }

    #[test]
    fn extract_truncates_long_bodies() {
        let body = "x".repeat(1000);
        assert_eq!(extract_error_message(&body).len(), 300);
    }
}
