//! Call outcome taxonomy.
//!
//! Every failed call settles into exactly one [`CallError`]. The error travels inside the
//! [`ResponseEnvelope`](crate::client::ResponseEnvelope) instead of being returned as `Err`,
//! so callers branch on outcome without unwinding, and so deduplicated callers can share one
//! cloned outcome.
//!
//! ## Classes
//!
//! | Kind                      | HTTP        | Retried | Counts against breaker |
//! |---------------------------|-------------|---------|------------------------|
//! | `circuit_open`            | 503 (synth) | no      | no                     |
//! | `timeout`                 | -           | yes     | yes                    |
//! | `network`                 | -           | yes     | yes                    |
//! | `rate_limited`            | 429         | yes     | yes                    |
//! | `server_error`            | 5xx         | yes     | yes                    |
//! | `client_error`            | 4xx         | no      | no                     |
//! | `authentication_required` | 401         | no      | no                     |
//! | `invalid_response`        | 2xx         | no      | no                     |
//! | `internal`                | -           | no      | no                     |
//!
//! ```rust
//! use callguard::CallError;
//!
//! let err = CallError::from_status(503, Some("maintenance".into()), None);
//! assert_eq!(err.kind(), "server_error");
//! assert!(err.is_retryable());
//! assert_eq!(err.status(), Some(503));
//! ```

use serde::Serialize;
use thiserror::Error;

/// Typed failure of a single logical call.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CallError {
    /// The endpoint's breaker is open; no network call was attempted.
    #[error("circuit open for {endpoint}")]
    CircuitOpen { endpoint: String },

    /// An attempt exceeded its wall-clock timeout.
    #[error("request timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },

    /// Connection-level failure (DNS, refused, reset, TLS).
    #[error("network error: {message}")]
    Network { message: String },

    /// Terminal 4xx other than 429.
    #[error("client error: HTTP {status}{}", format_message(.message))]
    Client {
        status: u16,
        message: Option<String>,
    },

    /// HTTP 429.
    #[error("rate limited")]
    RateLimited { retry_after_ms: Option<u64> },

    /// HTTP 5xx.
    #[error("server error: HTTP {status}{}", format_message(.message))]
    Server {
        status: u16,
        message: Option<String>,
    },

    /// A 401 could not be recovered by refreshing credentials; the caller must re-authenticate.
    #[error("authentication required: {message}")]
    AuthenticationRequired { message: String },

    /// The server answered 2xx with a body that is not JSON.
    #[error("invalid response body: {message}")]
    InvalidResponse { message: String },

    /// Internal inconsistency (e.g., the task driving a coalesced call died).
    #[error("internal error: {message}")]
    Internal { message: String },
}

fn format_message(message: &Option<String>) -> String {
    match message {
        Some(m) if !m.is_empty() => format!(" ({})", m),
        _ => String::new(),
    }
}

impl CallError {
    /// Classify a non-2xx HTTP response.
    pub fn from_status(status: u16, message: Option<String>, retry_after_ms: Option<u64>) -> Self {
        match status {
            429 => Self::RateLimited { retry_after_ms },
            500..=599 => Self::Server { status, message },
            _ => Self::Client { status, message },
        }
    }

    /// Stable snake_case name of the error class.
    #[inline]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CircuitOpen { .. } => "circuit_open",
            Self::Timeout { .. } => "timeout",
            Self::Network { .. } => "network",
            Self::Client { .. } => "client_error",
            Self::RateLimited { .. } => "rate_limited",
            Self::Server { .. } => "server_error",
            Self::AuthenticationRequired { .. } => "authentication_required",
            Self::InvalidResponse { .. } => "invalid_response",
            Self::Internal { .. } => "internal",
        }
    }

    /// HTTP status associated with the failure, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::CircuitOpen { .. } => Some(503),
            Self::Client { status, .. } | Self::Server { status, .. } => Some(*status),
            Self::RateLimited { .. } => Some(429),
            Self::AuthenticationRequired { .. } => Some(401),
            _ => None,
        }
    }

    /// Transient failures the retry loop may try again.
    #[inline]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::Network { .. } | Self::RateLimited { .. } | Self::Server { .. }
        )
    }

    /// Failures that say something about endpoint health. A 4xx means the endpoint answered.
    #[inline]
    pub fn trips_breaker(&self) -> bool {
        self.is_retryable()
    }

    /// Server-provided hint for when to try again.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after_ms } => *retry_after_ms,
            _ => None,
        }
    }
}

/// Best-effort extraction of a human-readable message from a JSON error body.
///
/// Accepts the common shapes `{"message": ".."}`, `{"error": ".."}` and
/// `{"error": {"message": ".."}}`; falls back to the trimmed raw text when it is short.
pub fn message_from_body(body: &[u8]) -> Option<String> {
    if body.is_empty() {
        return None;
    }
    if let Ok(json) = serde_json::from_slice::<serde_json::Value>(body) {
        let found = json
            .get("message")
            .and_then(|v| v.as_str())
            .or_else(|| json.get("error").and_then(|v| v.as_str()))
            .or_else(|| {
                json.get("error")
                    .and_then(|e| e.get("message"))
                    .and_then(|v| v.as_str())
            });
        return found.map(|s| s.to_string());
    }
    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    if text.is_empty() || text.len() > 512 {
        None
    } else {
        Some(text.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status_classification() {
        assert_eq!(
            CallError::from_status(429, None, Some(2000)),
            CallError::RateLimited {
                retry_after_ms: Some(2000)
            }
        );
        assert_eq!(CallError::from_status(500, None, None).kind(), "server_error");
        assert_eq!(CallError::from_status(599, None, None).kind(), "server_error");
        assert_eq!(CallError::from_status(404, None, None).kind(), "client_error");
        assert_eq!(CallError::from_status(400, None, None).kind(), "client_error");
    }

    #[test]
    fn test_retryable_classes() {
        assert!(CallError::Timeout { after_ms: 10 }.is_retryable());
        assert!(CallError::Network {
            message: "refused".into()
        }
        .is_retryable());
        assert!(CallError::from_status(429, None, None).is_retryable());
        assert!(CallError::from_status(503, None, None).is_retryable());

        assert!(!CallError::from_status(400, None, None).is_retryable());
        assert!(!CallError::from_status(404, None, None).is_retryable());
        assert!(!CallError::CircuitOpen {
            endpoint: "api.example.com/x".into()
        }
        .is_retryable());
    }

    #[test]
    fn test_circuit_open_does_not_trip_breaker() {
        let err = CallError::CircuitOpen {
            endpoint: "api.example.com/x".into(),
        };
        assert!(!err.trips_breaker());
        assert_eq!(err.status(), Some(503));
    }

    #[test]
    fn test_display_includes_server_message() {
        let err = CallError::from_status(422, Some("email is taken".into()), None);
        assert_eq!(err.to_string(), "client error: HTTP 422 (email is taken)");
        let err = CallError::from_status(500, None, None);
        assert_eq!(err.to_string(), "server error: HTTP 500");
    }

    #[test]
    fn test_message_from_body_shapes() {
        assert_eq!(
            message_from_body(br#"{"message":"nope"}"#).as_deref(),
            Some("nope")
        );
        assert_eq!(
            message_from_body(br#"{"error":"bad token"}"#).as_deref(),
            Some("bad token")
        );
        assert_eq!(
            message_from_body(br#"{"error":{"message":"deep"}}"#).as_deref(),
            Some("deep")
        );
        assert_eq!(message_from_body(br#"{"other":1}"#), None);
        assert_eq!(
            message_from_body(b"Service Unavailable").as_deref(),
            Some("Service Unavailable")
        );
        assert_eq!(message_from_body(b""), None);
    }

    #[test]
    fn test_serializes_with_kind_tag() {
        let json = serde_json::to_value(CallError::Timeout { after_ms: 5 }).unwrap();
        assert_eq!(json["kind"], "timeout");
        assert_eq!(json["after_ms"], 5);
    }
}
